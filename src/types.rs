//! Payload and parameter types shared by jobs, the backend contract and the cache

/// Axis-aligned rectangle in page coordinates (points).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Rect {
    #[must_use]
    pub const fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }
}

/// Page dimensions in points.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

/// Raw rendered pixels, RGBA, row-major.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PixelSurface {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// A payload anchored to an area of a page.
#[derive(Clone, Debug, PartialEq)]
pub struct Mapping<T> {
    pub area: Rect,
    pub data: T,
}

pub type MappingList<T> = Vec<Mapping<T>>;

/// Where a link points.
#[derive(Clone, Debug, PartialEq)]
pub enum LinkTarget {
    Internal { page: usize },
    External { uri: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Link {
    pub title: Option<String>,
    pub target: LinkTarget,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormFieldKind {
    Text,
    Button,
    Choice,
    Signature,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FormField {
    pub id: u64,
    pub kind: FormFieldKind,
    pub name: String,
}

/// An embedded raster image placed on a page.
#[derive(Clone, Debug, PartialEq)]
pub struct PageImage {
    pub id: u64,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnnotationKind {
    Text,
    Highlight,
    Attachment,
    Other,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Annotation {
    pub id: u64,
    pub kind: AnnotationKind,
    pub contents: String,
}

/// Embedded audio/video reference.
#[derive(Clone, Debug, PartialEq)]
pub struct Media {
    pub uri: String,
}

/// Style run over a span of extracted text, byte-indexed into the page text.
#[derive(Clone, Debug, PartialEq)]
pub struct TextAttr {
    pub start: usize,
    pub end: usize,
    pub font: String,
    pub size: f32,
}

/// One node of the document outline (table of contents).
#[derive(Clone, Debug, PartialEq)]
pub struct OutlineEntry {
    pub title: String,
    pub page: Option<usize>,
    pub children: Vec<OutlineEntry>,
}

/// A font discovered by the incremental font scan.
#[derive(Clone, Debug, PartialEq)]
pub struct FontInfo {
    pub name: String,
    pub embedded: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SelectionStyle {
    #[default]
    Glyph,
    Word,
    Line,
}

/// Text-selection overlay request carried by a render job.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectionSpec {
    pub bounds: Rect,
    pub style: SelectionStyle,
}

/// Parameters for a full-page render.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderOptions {
    /// Clockwise rotation in degrees: 0, 90, 180 or 270.
    pub rotation: u16,
    pub scale: f64,
    /// Pixel size to fit the output into, if the caller knows it.
    pub target_size: Option<(u32, u32)>,
    /// When set, the backend also produces a selection overlay.
    pub selection: Option<SelectionSpec>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            rotation: 0,
            scale: 1.0,
            target_size: None,
            selection: None,
        }
    }
}

/// A rendered page plus the optional selection overlay.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderedPage {
    pub surface: PixelSurface,
    pub selection: Option<PixelSurface>,
    pub selection_region: Vec<Rect>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ThumbnailOptions {
    pub rotation: u16,
    pub target_width: u32,
    pub target_height: u32,
}

impl Default for ThumbnailOptions {
    fn default() -> Self {
        Self {
            rotation: 0,
            target_width: 100,
            target_height: 100,
        }
    }
}

/// Options for incremental text search.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub case_sensitive: bool,
    pub whole_words_only: bool,
}
