#![allow(dead_code)]

//! Shared test fixtures: an instrumented stub backend and a gate job for
//! pinning a worker.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use quire::backend::{Document, DocumentBackend, DocumentSource, FontLock, SharedDocument};
use quire::error::{BackendError, JobError};
use quire::job::{EngineJob, JobCore, JobPriority, Progress, RunContext, RunMode};
use quire::jobs::LoadJob;
use quire::scheduler::JobScheduler;
use quire::types::{
    FindOptions, FontInfo, Link, LinkTarget, Mapping, MappingList, OutlineEntry, PageSize,
    PixelSurface, Rect, RenderOptions, RenderedPage,
};
use quire::AspectMask;

/// Call counters shared between a backend and the test body.
#[derive(Default)]
pub struct Counters {
    pub opens: AtomicUsize,
    pub loads: AtomicUsize,
    pub renders: AtomicUsize,
    pub link_calls: AtomicUsize,
    pub text_calls: AtomicUsize,
    pub find_calls: AtomicUsize,
    pub overlap_violations: AtomicUsize,
    busy: AtomicBool,
}

impl Counters {
    /// Mark a backend call in progress; overlapping calls are recorded as
    /// violations instead of panicking, so the test can assert on them.
    fn enter(&self) -> BusyGuard<'_> {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlap_violations.fetch_add(1, Ordering::SeqCst);
        }
        // Widen the race window a little.
        thread::sleep(Duration::from_millis(1));
        BusyGuard { counters: self }
    }
}

pub struct BusyGuard<'a> {
    counters: &'a Counters,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.counters.busy.store(false, Ordering::SeqCst);
    }
}

const SUPPORTED: AspectMask = AspectMask::LINKS
    .union(AspectMask::TEXT)
    .union(AspectMask::TEXT_LAYOUT)
    .union(AspectMask::IMAGES)
    .union(AspectMask::FORMS)
    .union(AspectMask::ANNOTATIONS);

/// Handshake pair making `open` block until the test releases it.
struct OpenGate {
    entered: flume::Sender<()>,
    release: flume::Receiver<()>,
}

/// In-memory backend with deterministic per-page content.
pub struct StubBackend {
    pages: usize,
    password: Option<String>,
    fail_links: bool,
    open_gate: Option<OpenGate>,
    counters: Arc<Counters>,
}

impl StubBackend {
    pub fn new(pages: usize) -> Arc<Self> {
        Arc::new(Self {
            pages,
            password: None,
            fail_links: false,
            open_gate: None,
            counters: Arc::new(Counters::default()),
        })
    }

    pub fn with_password(pages: usize, password: &str) -> Arc<Self> {
        Arc::new(Self {
            pages,
            password: Some(password.to_owned()),
            fail_links: false,
            open_gate: None,
            counters: Arc::new(Counters::default()),
        })
    }

    pub fn with_failing_links(pages: usize) -> Arc<Self> {
        Arc::new(Self {
            pages,
            password: None,
            fail_links: true,
            open_gate: None,
            counters: Arc::new(Counters::default()),
        })
    }

    /// `open` signals on the first channel when entered, then parks until
    /// the second channel is sent to.
    pub fn with_gated_open(pages: usize) -> (Arc<Self>, flume::Receiver<()>, flume::Sender<()>) {
        let (entered_tx, entered_rx) = flume::bounded(1);
        let (release_tx, release_rx) = flume::bounded(1);
        let backend = Arc::new(Self {
            pages,
            password: None,
            fail_links: false,
            open_gate: Some(OpenGate {
                entered: entered_tx,
                release: release_rx,
            }),
            counters: Arc::new(Counters::default()),
        });
        (backend, entered_rx, release_tx)
    }

    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }
}

impl DocumentBackend for StubBackend {
    fn open(&self, _source: &DocumentSource) -> Result<Box<dyn Document>, BackendError> {
        if let Some(gate) = &self.open_gate {
            let _ = gate.entered.send(());
            let _ = gate.release.recv();
        }
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubDocument {
            pages: self.pages,
            password: self.password.clone(),
            fail_links: self.fail_links,
            counters: Arc::clone(&self.counters),
        }))
    }
}

pub struct StubDocument {
    pages: usize,
    password: Option<String>,
    fail_links: bool,
    counters: Arc<Counters>,
}

impl Document for StubDocument {
    fn load(&mut self, password: Option<&str>) -> Result<(), BackendError> {
        let _busy = self.counters.enter();
        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(required) = &self.password {
            if password != Some(required.as_str()) {
                return Err(BackendError::PasswordRequired);
            }
        }
        Ok(())
    }

    fn page_count(&self) -> usize {
        self.pages
    }

    fn page_size(&self, _page: usize) -> PageSize {
        PageSize {
            width: 612.0,
            height: 792.0,
        }
    }

    fn supports(&self, aspect: AspectMask) -> bool {
        SUPPORTED.contains(aspect)
    }

    fn render(
        &mut self,
        _page: usize,
        _options: &RenderOptions,
    ) -> Result<RenderedPage, BackendError> {
        let _busy = self.counters.enter();
        self.counters.renders.fetch_add(1, Ordering::SeqCst);
        Ok(RenderedPage {
            surface: PixelSurface {
                width: 1,
                height: 1,
                pixels: vec![0; 4],
            },
            ..RenderedPage::default()
        })
    }

    fn links(&mut self, page: usize) -> Result<MappingList<Link>, BackendError> {
        let _busy = self.counters.enter();
        self.counters.link_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_links {
            return Err(BackendError::backend("stub", 1, "link extraction failed"));
        }
        Ok(vec![Mapping {
            area: Rect::new(0.0, 0.0, 10.0, 10.0),
            data: Link {
                title: None,
                target: LinkTarget::Internal { page },
            },
        }])
    }

    fn text(&mut self, page: usize) -> Result<String, BackendError> {
        let _busy = self.counters.enter();
        self.counters.text_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("text of page {page}"))
    }

    fn text_layout(&mut self, _page: usize) -> Result<Vec<Rect>, BackendError> {
        let _busy = self.counters.enter();
        Ok(vec![Rect::new(0.0, 0.0, 612.0, 12.0)])
    }

    fn find_text(
        &mut self,
        page: usize,
        _query: &str,
        _options: &FindOptions,
    ) -> Result<Vec<Rect>, BackendError> {
        let _busy = self.counters.enter();
        self.counters.find_calls.fetch_add(1, Ordering::SeqCst);
        // Even pages match, odd pages do not.
        if page % 2 == 0 {
            Ok(vec![Rect::new(1.0, 1.0, 2.0, 2.0)])
        } else {
            Ok(Vec::new())
        }
    }

    fn outline(&mut self) -> Result<Vec<OutlineEntry>, BackendError> {
        let _busy = self.counters.enter();
        Ok(vec![OutlineEntry {
            title: "Chapter 1".into(),
            page: Some(0),
            children: Vec::new(),
        }])
    }

    fn scan_fonts(&mut self, page: usize) -> Result<Vec<FontInfo>, BackendError> {
        let _busy = self.counters.enter();
        Ok(vec![FontInfo {
            name: format!("StubFont-{}", page % 2),
            embedded: true,
        }])
    }

    fn save(&mut self, destination: &std::path::Path) -> Result<(), BackendError> {
        let _busy = self.counters.enter();
        std::fs::write(destination, b"stub document").map_err(|e| BackendError::io(e.to_string()))
    }

    fn export_page(
        &mut self,
        page: usize,
        destination: &std::path::Path,
    ) -> Result<(), BackendError> {
        let _busy = self.counters.enter();
        std::fs::write(destination, format!("page {page}"))
            .map_err(|e| BackendError::io(e.to_string()))
    }
}

/// Threaded job that blocks its worker until the gate is released. Used
/// to keep later jobs queued.
pub struct GateJob {
    core: JobCore,
    gate: flume::Receiver<()>,
}

impl GateJob {
    pub fn new() -> (Arc<Self>, flume::Sender<()>) {
        let (tx, rx) = flume::bounded(1);
        let job = Arc::new(Self {
            core: JobCore::new(RunMode::Threaded),
            gate: rx,
        });
        (job, tx)
    }
}

impl EngineJob for GateJob {
    fn core(&self) -> &JobCore {
        &self.core
    }

    fn run(&self, _ctx: &RunContext) -> Result<Progress, JobError> {
        let _ = self.gate.recv();
        Ok(Progress::Finished)
    }
}

/// Open and fully load a stub document through the scheduler.
pub fn load_document(
    scheduler: &JobScheduler,
    backend: Arc<StubBackend>,
) -> (SharedDocument, FontLock) {
    let doc = SharedDocument::new();
    let fonts = FontLock::new();
    let load = LoadJob::new(
        backend,
        DocumentSource::Path(PathBuf::from("stub.doc")),
        doc.clone(),
        fonts.clone(),
    );
    scheduler.push(load, JobPriority::Urgent);
    scheduler.wait_until_idle();
    assert!(doc.is_bound(), "stub load failed");
    (doc, fonts)
}
