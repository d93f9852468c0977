//! Concrete job types
//!
//! Each job owns its parameters and output slot; the scheduler only sees
//! the [`crate::job::EngineJob`] trait. Constructors return `Arc<Self>` so
//! the caller keeps a typed handle while the scheduler holds the erased one.

mod find;
mod fonts;
mod load;
mod page_data;
mod render;
mod save;

pub use find::FindJob;
pub use fonts::FontsJob;
pub use load::LoadJob;
pub use page_data::{OutlineJob, PageData, PageDataJob};
pub use render::{PrintJob, RenderJob, ThumbnailJob};
pub use save::{ExportJob, SaveJob};
