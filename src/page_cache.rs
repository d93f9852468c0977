//! Per-page aspect cache in front of the scheduler
//!
//! Lives on the controlling thread. Tracks, per page, which aspects are
//! cached, which are being fetched and which are stale, and turns misses
//! into [`PageDataJob`]s. At most one fetch is in flight per page: a new
//! need on a fetching page cancels the old job and replaces it with one
//! covering the union of both masks.
//!
//! Completion events are fed through [`PageCache::absorb`], which folds
//! results into the cache and tells the caller which page became ready.

use std::sync::Arc;

use log::debug;

use crate::aspect::AspectMask;
use crate::backend::SharedDocument;
use crate::job::{EngineJob, JobEvent, JobPriority, JobRef, JobState};
use crate::jobs::{PageData, PageDataJob};
use crate::scheduler::JobScheduler;
use crate::types::{
    Annotation, FormField, Link, MappingList, Media, PageImage, Rect, TextAttr,
};

/// Pages fetched ahead on each side of the visible range.
pub const DEFAULT_PREFETCH_MARGIN: usize = 2;

struct InFlight {
    job: Arc<PageDataJob>,
    covers: AspectMask,
}

#[derive(Default)]
struct PageEntry {
    have: AspectMask,
    dirty: bool,
    in_flight: Option<InFlight>,
    data: PageData,
}

impl PageEntry {
    fn fetching(&self, id: crate::job::JobId) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|fl| fl.job.core().id() == id)
    }
}

pub struct PageCache {
    doc: SharedDocument,
    scheduler: Arc<JobScheduler>,
    /// Aspects the viewer currently wants for every page.
    mask: AspectMask,
    /// Aspects the bound document can actually produce; probed at bind.
    supported: AspectMask,
    margin: usize,
    entries: Vec<PageEntry>,
    visible: Option<(usize, usize)>,
}

impl PageCache {
    #[must_use]
    pub fn new(doc: SharedDocument, scheduler: Arc<JobScheduler>) -> Self {
        Self::with_margin(doc, scheduler, DEFAULT_PREFETCH_MARGIN)
    }

    #[must_use]
    pub fn with_margin(doc: SharedDocument, scheduler: Arc<JobScheduler>, margin: usize) -> Self {
        Self {
            doc,
            scheduler,
            mask: AspectMask::empty(),
            supported: AspectMask::empty(),
            margin,
            entries: Vec::new(),
            visible: None,
        }
    }

    /// Size the cache to the bound document and probe which aspects the
    /// backend supports. Call after a load job succeeds.
    pub fn bind(&mut self) {
        let (n_pages, supported) = self
            .doc
            .with(|doc| {
                let mut supported = AspectMask::empty();
                for bit in AspectMask::all().iter() {
                    if doc.supports(bit) {
                        supported |= bit;
                    }
                }
                (doc.page_count(), supported)
            })
            .unwrap_or((0, AspectMask::empty()));

        debug!("cache bound: {n_pages} pages, supported {supported:?}");
        self.entries = (0..n_pages).map(|_| PageEntry::default()).collect();
        self.supported = supported;
        self.visible = None;
    }

    /// Drop everything and cancel outstanding fetches.
    pub fn unbind(&mut self) {
        for entry in &mut self.entries {
            if let Some(old) = entry.in_flight.take() {
                let job: JobRef = old.job;
                self.scheduler.cancel(&job);
            }
        }
        self.entries.clear();
        self.supported = AspectMask::empty();
        self.visible = None;
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn mask(&self) -> AspectMask {
        self.mask
    }

    #[must_use]
    pub fn supported(&self) -> AspectMask {
        self.supported
    }

    #[must_use]
    pub fn is_fetching(&self, page: usize) -> bool {
        self.entries
            .get(page)
            .is_some_and(|entry| entry.in_flight.is_some())
    }

    #[must_use]
    pub fn is_dirty(&self, page: usize) -> bool {
        self.entries.get(page).is_some_and(|entry| entry.dirty)
    }

    /// Set the aspects wanted for every page. Lazy: fetches are issued by
    /// the next visibility update or getter miss, not here. Re-configuring
    /// with the current mask is a no-op.
    pub fn configure(&mut self, mask: AspectMask) {
        if mask == self.mask {
            return;
        }
        self.mask = mask;
    }

    /// Tell the cache which pages are on screen. The range is inclusive:
    /// `set_visible_range(p, p)` means page `p` alone is displayed. Visible
    /// pages missing aspects are fetched at high priority; pages within
    /// the prefetch margin at background priority.
    pub fn set_visible_range(&mut self, start: usize, end: usize) {
        let n_pages = self.entries.len();
        if n_pages == 0 {
            return;
        }
        let end = end.min(n_pages - 1);
        let start = start.min(end);
        self.visible = Some((start, end));

        for page in start..=end {
            self.schedule_page(page, AspectMask::empty(), JobPriority::High);
        }
        for page in start.saturating_sub(self.margin)..start {
            self.schedule_page(page, AspectMask::empty(), JobPriority::Background);
        }
        for page in (end + 1)..n_pages.min(end + 1 + self.margin) {
            self.schedule_page(page, AspectMask::empty(), JobPriority::Background);
        }
    }

    /// Invalidate some aspects of one page, e.g. after a form edit changed
    /// its text. Other aspects stay cached. A fetch covering any of the
    /// invalidated aspects is cancelled; a visible page is refetched
    /// immediately.
    pub fn mark_dirty(&mut self, page: usize, aspects: AspectMask) {
        let scheduler = Arc::clone(&self.scheduler);
        let Some(entry) = self.entries.get_mut(page) else {
            return;
        };
        entry.have &= !aspects;
        entry.dirty = true;

        let stale_fetch = entry
            .in_flight
            .as_ref()
            .is_some_and(|fl| fl.covers.intersects(aspects));
        if stale_fetch {
            if let Some(old) = entry.in_flight.take() {
                let job: JobRef = old.job;
                scheduler.cancel(&job);
            }
        }

        if self.is_visible(page) {
            self.schedule_page(page, AspectMask::empty(), JobPriority::High);
        }
    }

    /// Fold a scheduler event into the cache. Returns the page that became
    /// ready when the event completed a fetch, `None` otherwise. Failed
    /// fetches clear the in-flight slot and are not retried; events for
    /// jobs the cache no longer tracks are ignored.
    pub fn absorb(&mut self, event: &JobEvent) -> Option<usize> {
        let (job, cancelled) = match event {
            JobEvent::Finished(job) => (job, false),
            JobEvent::Cancelled(job) => (job, true),
            _ => return None,
        };
        let id = job.core().id();
        let page = self.entries.iter().position(|entry| entry.fetching(id))?;

        let entry = &mut self.entries[page];
        let in_flight = entry.in_flight.take()?;
        if cancelled {
            return None;
        }
        if job.core().state() != JobState::Succeeded {
            debug!("page {page} fetch failed, not retrying");
            return None;
        }

        let snapshot = in_flight.job.snapshot();
        entry.data.merge_from(&snapshot, in_flight.covers);
        entry.have |= snapshot.computed & in_flight.covers;
        entry.dirty = !((self.mask & self.supported) & !entry.have).is_empty();
        Some(page)
    }

    pub fn links(&mut self, page: usize) -> Option<MappingList<Link>> {
        self.lookup(page, AspectMask::LINKS, |data| data.links.clone())
    }

    pub fn form_fields(&mut self, page: usize) -> Option<MappingList<FormField>> {
        self.lookup(page, AspectMask::FORMS, |data| data.forms.clone())
    }

    pub fn images(&mut self, page: usize) -> Option<MappingList<PageImage>> {
        self.lookup(page, AspectMask::IMAGES, |data| data.images.clone())
    }

    pub fn annotations(&mut self, page: usize) -> Option<MappingList<Annotation>> {
        self.lookup(page, AspectMask::ANNOTATIONS, |data| data.annotations.clone())
    }

    pub fn media(&mut self, page: usize) -> Option<MappingList<Media>> {
        self.lookup(page, AspectMask::MEDIA, |data| data.media.clone())
    }

    pub fn text(&mut self, page: usize) -> Option<String> {
        self.lookup(page, AspectMask::TEXT, |data| data.text.clone())
    }

    pub fn text_layout(&mut self, page: usize) -> Option<Vec<Rect>> {
        self.lookup(page, AspectMask::TEXT_LAYOUT, |data| data.text_layout.clone())
    }

    pub fn text_attrs(&mut self, page: usize) -> Option<Vec<TextAttr>> {
        self.lookup(page, AspectMask::TEXT_ATTRS, |data| data.text_attrs.clone())
    }

    /// Getter core: cached value, else a mid-flight partial result, else a
    /// scheduled fetch and a miss.
    fn lookup<T>(
        &mut self,
        page: usize,
        aspect: AspectMask,
        read: impl Fn(&PageData) -> T,
    ) -> Option<T> {
        if !self.supported.contains(aspect) {
            return None;
        }
        {
            let entry = self.entries.get(page)?;
            if entry.have.contains(aspect) {
                return Some(read(&entry.data));
            }
            if let Some(in_flight) = &entry.in_flight {
                if in_flight.covers.contains(aspect) {
                    return in_flight
                        .job
                        .with_partial(|data| data.computed.contains(aspect).then(|| read(data)));
                }
            }
        }
        self.schedule_page(page, aspect, self.priority_for(page));
        None
    }

    /// Issue (or widen) the fetch for one page. `extra` joins the
    /// configured mask; anything unsupported or already cached is dropped.
    fn schedule_page(&mut self, page: usize, extra: AspectMask, priority: JobPriority) {
        let scheduler = Arc::clone(&self.scheduler);
        let doc = self.doc.clone();
        let mask = self.mask;
        let supported = self.supported;
        let Some(entry) = self.entries.get_mut(page) else {
            return;
        };

        let want = ((mask | extra) & supported) & !entry.have;
        if want.is_empty() {
            return;
        }

        let mut covers = want;
        if let Some(old) = entry.in_flight.take() {
            if old.covers.contains(want) {
                entry.in_flight = Some(old);
                return;
            }
            // Replace with one job covering the union of old and new.
            covers |= old.covers;
            debug!("page {page} fetch widened to {covers:?}");
            let stale: JobRef = old.job;
            scheduler.cancel(&stale);
        }

        let job = PageDataJob::new(doc, page, covers);
        entry.in_flight = Some(InFlight {
            job: Arc::clone(&job),
            covers,
        });
        scheduler.push(job, priority);
    }

    fn is_visible(&self, page: usize) -> bool {
        matches!(self.visible, Some((start, end)) if page >= start && page <= end)
    }

    fn priority_for(&self, page: usize) -> JobPriority {
        if self.is_visible(page) {
            JobPriority::High
        } else {
            JobPriority::Low
        }
    }
}
