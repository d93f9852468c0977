//! Page cache behavior: scheduling, dedup, invalidation, readiness.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use quire::job::{JobEvent, JobPriority};
use quire::page_cache::PageCache;
use quire::scheduler::JobScheduler;
use quire::AspectMask;

use common::{GateJob, StubBackend, load_document};

fn absorb_all(cache: &mut PageCache, scheduler: &JobScheduler) -> Vec<usize> {
    scheduler
        .poll_events()
        .iter()
        .filter_map(|event| cache.absorb(event))
        .collect()
}

#[test]
fn cold_scroll_fetches_visible_and_margin_pages() {
    let scheduler = Arc::new(JobScheduler::with_workers(1));
    let backend = StubBackend::new(10);
    let (doc, _fonts) = load_document(&scheduler, backend);
    let _ = scheduler.poll_events();

    let mut cache = PageCache::new(doc, Arc::clone(&scheduler));
    cache.bind();
    assert_eq!(cache.page_count(), 10);

    cache.configure(AspectMask::LINKS | AspectMask::TEXT);
    cache.set_visible_range(0, 1);
    scheduler.wait_until_idle();

    let mut ready = absorb_all(&mut cache, &scheduler);
    ready.sort_unstable();
    // Visible pages 0 and 1 plus the default margin of two after them.
    assert_eq!(ready, vec![0, 1, 2, 3]);

    assert_eq!(cache.links(0).map(|links| links.len()), Some(1));
    assert_eq!(cache.text(1).as_deref(), Some("text of page 1"));
    assert!(!cache.is_dirty(0));
    assert!(!cache.is_fetching(5));
}

#[test]
fn single_page_window_fetches_that_page_and_the_margin() {
    let scheduler = Arc::new(JobScheduler::with_workers(1));
    let backend = StubBackend::new(10);
    let (doc, _fonts) = load_document(&scheduler, backend);
    let _ = scheduler.poll_events();

    let mut cache = PageCache::new(doc, Arc::clone(&scheduler));
    cache.bind();
    cache.configure(AspectMask::LINKS | AspectMask::TEXT);

    // Pin the worker so the misses below are observed pre-completion.
    let (gate, release) = GateJob::new();
    scheduler.push(gate, JobPriority::Urgent);

    cache.set_visible_range(0, 0);
    assert!(cache.is_fetching(0));
    assert!(cache.text(0).is_none());

    release.send(()).expect("gate");
    scheduler.wait_until_idle();

    let ready = absorb_all(&mut cache, &scheduler);
    assert_eq!(ready.iter().filter(|&&page| page == 0).count(), 1);
    let mut sorted = ready;
    sorted.sort_unstable();
    // The displayed page plus two margin pages past it.
    assert_eq!(sorted, vec![0, 1, 2]);
    assert_eq!(cache.text(0).as_deref(), Some("text of page 0"));
}

#[test]
fn widening_a_fetch_cancels_and_replaces_with_the_union() {
    let scheduler = Arc::new(JobScheduler::with_workers(1));
    let backend = StubBackend::new(5);
    let counters = backend.counters();
    let (doc, _fonts) = load_document(&scheduler, backend);
    let _ = scheduler.poll_events();

    let mut cache = PageCache::with_margin(doc, Arc::clone(&scheduler), 0);
    cache.bind();

    // Pin the only worker so the first fetch stays queued.
    let (gate, release) = GateJob::new();
    scheduler.push(gate, JobPriority::Urgent);

    cache.configure(AspectMask::LINKS);
    cache.set_visible_range(0, 0);
    assert!(cache.is_fetching(0));

    cache.configure(AspectMask::LINKS | AspectMask::TEXT);
    assert!(cache.text(0).is_none());
    assert!(cache.is_fetching(0));

    release.send(()).expect("gate");
    scheduler.wait_until_idle();

    let ready = absorb_all(&mut cache, &scheduler);
    assert_eq!(ready, vec![0]);
    assert!(cache.links(0).is_some());
    assert!(cache.text(0).is_some());
    // The replaced job never touched the backend.
    assert_eq!(counters.link_calls.load(Ordering::SeqCst), 1);
    assert_eq!(counters.text_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn partial_invalidation_refetches_only_the_dirty_aspect() {
    let scheduler = Arc::new(JobScheduler::with_workers(1));
    let backend = StubBackend::new(3);
    let counters = backend.counters();
    let (doc, _fonts) = load_document(&scheduler, backend);
    let _ = scheduler.poll_events();

    let mut cache = PageCache::with_margin(doc, Arc::clone(&scheduler), 0);
    cache.bind();
    cache.configure(AspectMask::LINKS | AspectMask::TEXT);
    cache.set_visible_range(0, 0);
    scheduler.wait_until_idle();
    assert_eq!(absorb_all(&mut cache, &scheduler), vec![0]);

    cache.mark_dirty(0, AspectMask::TEXT);
    assert!(cache.is_dirty(0));
    // The untouched aspect stays served from cache.
    assert!(cache.links(0).is_some());

    scheduler.wait_until_idle();
    assert_eq!(absorb_all(&mut cache, &scheduler), vec![0]);
    assert!(!cache.is_dirty(0));
    assert_eq!(cache.text(0).as_deref(), Some("text of page 0"));
    assert_eq!(counters.link_calls.load(Ordering::SeqCst), 1);
    assert_eq!(counters.text_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn reconfiguring_with_the_same_mask_issues_no_work() {
    let scheduler = Arc::new(JobScheduler::with_workers(1));
    let backend = StubBackend::new(3);
    let counters = backend.counters();
    let (doc, _fonts) = load_document(&scheduler, backend);
    let _ = scheduler.poll_events();

    let mut cache = PageCache::with_margin(doc, Arc::clone(&scheduler), 0);
    cache.bind();
    cache.configure(AspectMask::LINKS);
    cache.set_visible_range(0, 0);
    scheduler.wait_until_idle();
    assert_eq!(absorb_all(&mut cache, &scheduler), vec![0]);
    let calls_before = counters.link_calls.load(Ordering::SeqCst);

    cache.configure(AspectMask::LINKS);
    cache.set_visible_range(0, 0);
    let _ = cache.links(0);
    let _ = cache.links(0);
    scheduler.wait_until_idle();

    assert!(scheduler.poll_events().is_empty());
    assert_eq!(counters.link_calls.load(Ordering::SeqCst), calls_before);
}

#[test]
fn repeated_misses_keep_a_single_fetch_in_flight() {
    let scheduler = Arc::new(JobScheduler::with_workers(1));
    let backend = StubBackend::new(5);
    let counters = backend.counters();
    let (doc, _fonts) = load_document(&scheduler, backend);
    let _ = scheduler.poll_events();

    let mut cache = PageCache::with_margin(doc, Arc::clone(&scheduler), 0);
    cache.bind();
    cache.configure(AspectMask::LINKS);

    let (gate, release) = GateJob::new();
    scheduler.push(gate, JobPriority::Urgent);

    assert!(cache.links(4).is_none());
    assert!(cache.is_fetching(4));
    // Second miss reads the in-flight partial result, no second job.
    assert!(cache.links(4).is_none());

    release.send(()).expect("gate");
    scheduler.wait_until_idle();

    assert_eq!(absorb_all(&mut cache, &scheduler), vec![4]);
    assert_eq!(cache.links(4).map(|links| links.len()), Some(1));
    assert_eq!(counters.link_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn unsupported_aspects_are_filtered_out() {
    let scheduler = Arc::new(JobScheduler::with_workers(1));
    let backend = StubBackend::new(3);
    let (doc, _fonts) = load_document(&scheduler, backend);
    let _ = scheduler.poll_events();

    let mut cache = PageCache::with_margin(doc, Arc::clone(&scheduler), 0);
    cache.bind();
    assert!(!cache.supported().contains(AspectMask::MEDIA));

    cache.configure(AspectMask::MEDIA);
    cache.set_visible_range(0, 0);
    assert!(!cache.is_fetching(0));
    assert!(cache.media(0).is_none());
    assert!(!cache.is_fetching(0));

    // A mixed mask fetches only the supported part and still settles.
    cache.configure(AspectMask::MEDIA | AspectMask::LINKS);
    cache.set_visible_range(0, 0);
    scheduler.wait_until_idle();
    assert_eq!(absorb_all(&mut cache, &scheduler), vec![0]);
    assert!(cache.links(0).is_some());
    assert!(cache.media(0).is_none());
    assert!(!cache.is_dirty(0));
}

#[test]
fn failed_fetch_is_not_retried_automatically() {
    let scheduler = Arc::new(JobScheduler::with_workers(1));
    let backend = StubBackend::with_failing_links(3);
    let counters = backend.counters();
    let (doc, _fonts) = load_document(&scheduler, backend);
    let _ = scheduler.poll_events();

    let mut cache = PageCache::with_margin(doc, Arc::clone(&scheduler), 0);
    cache.bind();
    cache.configure(AspectMask::LINKS);
    cache.set_visible_range(0, 0);
    scheduler.wait_until_idle();

    let ready = absorb_all(&mut cache, &scheduler);
    assert!(ready.is_empty());
    assert!(!cache.is_fetching(0));
    assert_eq!(counters.link_calls.load(Ordering::SeqCst), 1);

    // No background retry appears on its own.
    scheduler.wait_until_idle();
    assert!(scheduler.poll_events().is_empty());
    assert!(!cache.is_fetching(0));
}

#[test]
fn unbind_cancels_outstanding_fetches() {
    let scheduler = Arc::new(JobScheduler::with_workers(1));
    let backend = StubBackend::new(4);
    let counters = backend.counters();
    let (doc, _fonts) = load_document(&scheduler, backend);
    let _ = scheduler.poll_events();

    let mut cache = PageCache::with_margin(doc, Arc::clone(&scheduler), 0);
    cache.bind();
    cache.configure(AspectMask::LINKS);

    let (gate, release) = GateJob::new();
    scheduler.push(gate, JobPriority::Urgent);
    cache.set_visible_range(0, 1);
    assert!(cache.is_fetching(0));

    cache.unbind();
    assert_eq!(cache.page_count(), 0);

    release.send(()).expect("gate");
    scheduler.wait_until_idle();

    let cancelled = scheduler
        .poll_events()
        .iter()
        .filter(|event| matches!(event, JobEvent::Cancelled(_)))
        .count();
    assert_eq!(cancelled, 2);
    assert_eq!(counters.link_calls.load(Ordering::SeqCst), 0);
}
