//! Document backend contract and the two shared-resource locks
//!
//! The backend is external to this crate: a format-specific parser/renderer
//! exposing synchronous, possibly slow operations. It is not thread-safe, so
//! every call goes through [`SharedDocument`], whose mutex *is* the document
//! lock. Operations that also touch global font/shaping state additionally
//! take the [`FontLock`], always after the document lock.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use crate::aspect::AspectMask;
use crate::error::BackendError;
use crate::types::{
    Annotation, FindOptions, FontInfo, FormField, Link, MappingList, Media, OutlineEntry,
    PageImage, PageSize, PixelSurface, Rect, RenderOptions, RenderedPage, TextAttr,
    ThumbnailOptions,
};

/// Where a document comes from.
#[derive(Clone, Debug)]
pub enum DocumentSource {
    Path(PathBuf),
    Bytes(Arc<[u8]>),
    #[cfg(unix)]
    Fd(Arc<std::os::fd::OwnedFd>),
}

/// Factory that recognizes a source and produces a document handle.
///
/// `open` may return a handle that is still locked (encrypted); parsing is
/// completed by [`Document::load`], so a wrong-password failure keeps the
/// handle alive for a retry.
pub trait DocumentBackend: Send + Sync + 'static {
    fn open(&self, source: &DocumentSource) -> Result<Box<dyn Document>, BackendError>;
}

/// One open document.
///
/// Single-caller contract: never invoked concurrently; the engine guarantees
/// this by routing every call through the [`SharedDocument`] mutex. Aspect
/// getters default to empty so a backend only implements what it supports,
/// and advertises the subset through [`Document::supports`].
pub trait Document: Send + 'static {
    /// Complete parsing, optionally unlocking with a password.
    fn load(&mut self, password: Option<&str>) -> Result<(), BackendError>;

    fn page_count(&self) -> usize;

    fn page_size(&self, page: usize) -> PageSize;

    fn supports(&self, aspect: AspectMask) -> bool;

    fn render(&mut self, page: usize, options: &RenderOptions)
    -> Result<RenderedPage, BackendError>;

    fn thumbnail(
        &mut self,
        page: usize,
        options: &ThumbnailOptions,
    ) -> Result<PixelSurface, BackendError> {
        let opts = RenderOptions {
            rotation: options.rotation,
            ..RenderOptions::default()
        };
        self.render(page, &opts).map(|rendered| rendered.surface)
    }

    fn links(&mut self, _page: usize) -> Result<MappingList<Link>, BackendError> {
        Ok(Vec::new())
    }

    fn form_fields(&mut self, _page: usize) -> Result<MappingList<FormField>, BackendError> {
        Ok(Vec::new())
    }

    fn images(&mut self, _page: usize) -> Result<MappingList<PageImage>, BackendError> {
        Ok(Vec::new())
    }

    fn annotations(&mut self, _page: usize) -> Result<MappingList<Annotation>, BackendError> {
        Ok(Vec::new())
    }

    fn media(&mut self, _page: usize) -> Result<MappingList<Media>, BackendError> {
        Ok(Vec::new())
    }

    fn text(&mut self, _page: usize) -> Result<String, BackendError> {
        Ok(String::new())
    }

    fn text_layout(&mut self, _page: usize) -> Result<Vec<Rect>, BackendError> {
        Ok(Vec::new())
    }

    fn text_attrs(&mut self, _page: usize) -> Result<Vec<TextAttr>, BackendError> {
        Ok(Vec::new())
    }

    fn find_text(
        &mut self,
        _page: usize,
        _query: &str,
        _options: &FindOptions,
    ) -> Result<Vec<Rect>, BackendError> {
        Ok(Vec::new())
    }

    fn outline(&mut self) -> Result<Vec<OutlineEntry>, BackendError> {
        Ok(Vec::new())
    }

    /// Report the fonts used on one page; called repeatedly by the
    /// incremental font scan.
    fn scan_fonts(&mut self, _page: usize) -> Result<Vec<FontInfo>, BackendError> {
        Ok(Vec::new())
    }

    fn render_for_print(&mut self, page: usize) -> Result<PixelSurface, BackendError> {
        self.render(page, &RenderOptions::default())
            .map(|rendered| rendered.surface)
    }

    fn export_page(&mut self, _page: usize, _destination: &Path) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("page export".into()))
    }

    fn save(&mut self, destination: &Path) -> Result<(), BackendError>;
}

type DocSlot = Option<Box<dyn Document>>;

/// The document lock: a shared slot holding the open document, if any.
///
/// Jobs keep a clone and lock it for the duration of their backend call,
/// which structurally enforces that backend calls never overlap. The load
/// job installs its result here on success.
#[derive(Clone, Default)]
pub struct SharedDocument {
    slot: Arc<Mutex<DocSlot>>,
}

impl SharedDocument {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, DocSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Non-blocking lock, used by cooperative-slice jobs so they never stall
    /// the controlling thread behind a worker.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, DocSlot>> {
        match self.slot.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.lock().is_some()
    }

    /// Run `f` against the document, or return `None` when nothing is bound.
    pub fn with<R>(&self, f: impl FnOnce(&mut dyn Document) -> R) -> Option<R> {
        let mut guard = self.lock();
        guard.as_mut().map(|doc| f(doc.as_mut()))
    }

    /// Page count of the bound document, 0 when unbound.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.with(|doc| doc.page_count()).unwrap_or(0)
    }

    /// Remove and return the bound document.
    pub fn unbind(&self) -> DocSlot {
        self.lock().take()
    }
}

/// Mutual exclusion for the process-global font/shaping subsystem.
///
/// Acquired after the document lock, never before it.
#[derive(Clone, Default)]
pub struct FontLock {
    inner: Arc<Mutex<()>>,
}

impl FontLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> MutexGuard<'_, ()> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn try_acquire(&self) -> Option<MutexGuard<'_, ()>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}
