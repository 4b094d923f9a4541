//! Mark-sweep collection
//!
//! A cycle marks everything reachable from the registered root sources,
//! optionally verifies the result, then sweeps every pool and the large
//! object space. With more than one GC thread, marking is shared through a
//! lock-free work queue; mark bits are set with an atomic test-and-set so
//! each object is traced exactly once.

use crate::error::{HeapError, HeapResult};
use crate::heap::{next_interval, CollectorState, Heap, RootFn, RootId, Space};
use crate::layout::ObjectLayout;
use crate::pool::SweepResult;
use crate::size_class::SizeClasses;
use crate::stats::CollectionStats;
use crate::visitor::{ObjectRef, Tracer, Visitor};
use crossbeam_queue::SegQueue;
use crossbeam_utils::Backoff;
use gcfiber_core::VerifyMode;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// What a tracer needs to know about the heap
#[derive(Clone, Copy)]
struct TraceContext<'a> {
    classes: &'a SizeClasses,
    layouts: &'a [Arc<dyn ObjectLayout>],
    validate: bool,
}

impl TraceContext<'_> {
    fn check(&self, obj: ObjectRef) -> HeapResult<()> {
        unsafe { obj.header() }
            .check(self.classes, self.layouts.len())
            .map_err(|reason| HeapError::Corruption {
                addr: obj.addr(),
                reason,
            })
    }

    fn trace_children(&self, obj: ObjectRef, tracer: &mut dyn Tracer) {
        let header = unsafe { obj.header() };
        if let Some(layout) = self.layouts.get(header.layout().index()) {
            layout.trace(obj, &mut Visitor::new(tracer));
        }
    }

    fn scan_roots(&self, roots: &[(RootId, Box<RootFn>)], tracer: &mut dyn Tracer) {
        let mut visitor = Visitor::new(tracer);
        for (_, source) in roots {
            source(&mut visitor);
        }
    }
}

/// Sets mark bits and collects newly marked objects
struct Marker<'c, 'a> {
    ctx: &'c TraceContext<'a>,
    grey: Vec<ObjectRef>,
    objects: usize,
    bytes: usize,
    error: Option<HeapError>,
}

impl<'c, 'a> Marker<'c, 'a> {
    fn new(ctx: &'c TraceContext<'a>) -> Self {
        Self {
            ctx,
            grey: Vec::new(),
            objects: 0,
            bytes: 0,
            error: None,
        }
    }

    fn drain(&mut self) {
        let ctx = self.ctx;
        while let Some(obj) = self.grey.pop() {
            if self.error.is_some() {
                break;
            }
            ctx.trace_children(obj, self);
        }
    }
}

impl Tracer for Marker<'_, '_> {
    fn visit(&mut self, obj: ObjectRef) {
        if self.error.is_some() {
            return;
        }
        if self.ctx.validate {
            if let Err(e) = self.ctx.check(obj) {
                self.error = Some(e);
                return;
            }
        }
        let header = unsafe { obj.header() };
        if header.try_mark() {
            self.objects += 1;
            self.bytes += header.size();
            self.grey.push(obj);
        }
    }
}

/// Independent trace that records reachability without touching mark bits
struct Snapshot<'c, 'a> {
    ctx: &'c TraceContext<'a>,
    seen: HashSet<usize>,
    grey: Vec<ObjectRef>,
    error: Option<HeapError>,
}

impl Tracer for Snapshot<'_, '_> {
    fn visit(&mut self, obj: ObjectRef) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = self.ctx.check(obj) {
            self.error = Some(e);
            return;
        }
        if self.seen.insert(obj.addr()) {
            self.grey.push(obj);
        }
    }
}

fn mark(
    ctx: &TraceContext<'_>,
    roots: &[(RootId, Box<RootFn>)],
    threads: usize,
) -> HeapResult<(usize, usize)> {
    let mut marker = Marker::new(ctx);
    ctx.scan_roots(roots, &mut marker);
    if let Some(e) = marker.error.take() {
        return Err(e);
    }

    if threads <= 1 || marker.grey.len() < 2 {
        marker.drain();
        return match marker.error {
            Some(e) => Err(e),
            None => Ok((marker.objects, marker.bytes)),
        };
    }
    mark_parallel(ctx, marker, threads)
}

fn mark_parallel(
    ctx: &TraceContext<'_>,
    mut initial: Marker<'_, '_>,
    threads: usize,
) -> HeapResult<(usize, usize)> {
    let queue = SegQueue::new();
    // Objects queued or being traced; marking is done when it reaches zero.
    let pending = AtomicUsize::new(initial.grey.len());
    for obj in initial.grey.drain(..) {
        queue.push(obj);
    }
    let objects = AtomicUsize::new(initial.objects);
    let bytes = AtomicUsize::new(initial.bytes);
    let failed = AtomicBool::new(false);
    let error = Mutex::new(None);

    std::thread::scope(|s| {
        for _ in 0..threads {
            s.spawn(|| {
                let mut marker = Marker::new(ctx);
                let backoff = Backoff::new();
                while !failed.load(Ordering::Acquire) {
                    match queue.pop() {
                        Some(obj) => {
                            backoff.reset();
                            ctx.trace_children(obj, &mut marker);
                            if let Some(e) = marker.error.take() {
                                error.lock().get_or_insert(e);
                                failed.store(true, Ordering::Release);
                                break;
                            }
                            pending.fetch_add(marker.grey.len(), Ordering::AcqRel);
                            for child in marker.grey.drain(..) {
                                queue.push(child);
                            }
                            pending.fetch_sub(1, Ordering::AcqRel);
                        }
                        None if pending.load(Ordering::Acquire) == 0 => break,
                        None => backoff.snooze(),
                    }
                }
                objects.fetch_add(marker.objects, Ordering::Relaxed);
                bytes.fetch_add(marker.bytes, Ordering::Relaxed);
            });
        }
    });

    match error.into_inner() {
        Some(e) => Err(e),
        None => Ok((objects.into_inner(), bytes.into_inner())),
    }
}

/// Header check of every allocated object, which must also be unmarked
fn check_space(space: &Space, ctx: &TraceContext<'_>) -> HeapResult<()> {
    for payload in space.objects() {
        let obj = ObjectRef::from_non_null(payload);
        ctx.check(obj)?;
        if unsafe { obj.header() }.is_marked() {
            return Err(HeapError::Corruption {
                addr: obj.addr(),
                reason: "mark bit set outside a collection",
            });
        }
    }
    Ok(())
}

/// Drop the mark bits left behind by an aborted cycle
fn clear_marks(space: &Space) {
    for payload in space.objects() {
        let header = unsafe { ObjectRef::from_non_null(payload).header() };
        header.clear_mark();
    }
}

/// Re-trace the graph serially and compare with the mark bits
fn verify_marks(space: &Space, ctx: &TraceContext<'_>, roots: &[(RootId, Box<RootFn>)]) -> HeapResult<()> {
    let marked: HashSet<usize> = space
        .objects()
        .map(ObjectRef::from_non_null)
        .filter(|obj| unsafe { obj.header() }.is_marked())
        .map(ObjectRef::addr)
        .collect();

    let strict = TraceContext {
        validate: true,
        ..*ctx
    };
    let mut snapshot = Snapshot {
        ctx: &strict,
        seen: HashSet::new(),
        grey: Vec::new(),
        error: None,
    };
    strict.scan_roots(roots, &mut snapshot);
    while let Some(obj) = snapshot.grey.pop() {
        if snapshot.error.is_some() {
            break;
        }
        strict.trace_children(obj, &mut snapshot);
    }
    if let Some(e) = snapshot.error {
        return Err(e);
    }

    if marked != snapshot.seen {
        let first_difference = marked
            .symmetric_difference(&snapshot.seen)
            .min()
            .copied()
            .unwrap_or(0);
        return Err(HeapError::VerificationMismatch {
            marked: marked.len(),
            traced: snapshot.seen.len(),
            first_difference,
        });
    }
    Ok(())
}

impl Heap {
    /// Run a full collection cycle.
    ///
    /// The caller must ensure no mutator touches heap objects until this
    /// returns. Root sources run with the heap locked.
    ///
    /// A failed cycle frees nothing and leaves no mark bit behind. A fatal
    /// failure also poisons the heap: every later allocation and collection
    /// returns [`HeapError::Poisoned`].
    pub fn collect(&self) -> HeapResult<CollectionStats> {
        let mut space = self.space.lock();
        if self.is_poisoned() {
            return Err(HeapError::Poisoned);
        }
        let layouts = self.layouts.read().clone();
        let result = self.run_cycle(&mut space, &layouts);
        if let Err(e) = &result {
            clear_marks(&space);
            if e.is_fatal() {
                self.poisoned.store(true, Ordering::Release);
            }
            tracing::error!(error = %e, poisoned = e.is_fatal(), "collection failed");
        }
        self.set_state(CollectorState::Idle);
        result
    }

    fn run_cycle(&self, space: &mut Space, layouts: &[Arc<dyn ObjectLayout>]) -> HeapResult<CollectionStats> {
        let config = &self.config;
        let ctx = TraceContext {
            classes: &self.classes,
            layouts,
            validate: config.parent_validity,
        };

        self.set_state(CollectorState::Marking);
        if config.verify >= VerifyMode::Quick {
            check_space(space, &ctx)?;
        }

        let mark_start = Instant::now();
        let (marked_objects, marked_bytes) = {
            let roots = self.roots.lock();
            let marked = mark(&ctx, &roots, config.gc_threads)?;
            if config.verify == VerifyMode::Full {
                verify_marks(space, &ctx, &roots)?;
            }
            marked
        };
        let mark_time = mark_start.elapsed();

        self.set_state(CollectorState::Sweeping);
        let sweep_start = Instant::now();
        let mut swept = SweepResult::default();
        for pool in &mut space.pools {
            swept.merge(pool.sweep(config.debug_fill));
        }
        swept.merge(space.large.sweep(config.debug_fill));
        let sweep_time = sweep_start.elapsed();
        debug_assert_eq!(swept.live_objects, marked_objects);

        if config.verify >= VerifyMode::Quick {
            check_space(space, &ctx)?;
        }

        let cycle = CollectionStats {
            marked_objects,
            marked_bytes,
            freed_objects: swept.freed_objects,
            freed_bytes: swept.freed_bytes,
            pages_released: swept.pages_released,
            mark_time,
            sweep_time,
        };
        space.stats.record_collection(&cycle);
        space.interval = next_interval(config, marked_bytes);
        self.collect_requested.store(false, Ordering::Release);

        tracing::debug!(
            marked = cycle.marked_objects,
            freed = cycle.freed_objects,
            freed_bytes = cycle.freed_bytes,
            next_interval = space.interval,
            "collection finished"
        );
        if config.gc_time {
            tracing::info!(mark = ?mark_time, sweep = ?sweep_time, "gc time");
        }
        if config.memprofile {
            log_memprofile(space);
        }
        Ok(cycle)
    }
}

fn log_memprofile(space: &Space) {
    for pool in space.pools.iter().filter(|pool| pool.page_count() > 0) {
        tracing::info!(
            slot_size = pool.slot_size(),
            pages = pool.page_count(),
            live = pool.live_objects(),
            capacity = pool.capacity(),
            "pool"
        );
    }
    tracing::info!(
        objects = space.large.len(),
        bytes = space.large.bytes(),
        "large objects"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::corrupt_magic;
    use crate::layout::{LayoutId, RefSlots};
    use crate::page::POISON;
    use gcfiber_core::Configuration;
    use std::sync::atomic::AtomicUsize;

    /// Roots held in a shared vector, like a mutator's handle table
    #[derive(Clone, Default)]
    struct Roots(Arc<Mutex<Vec<ObjectRef>>>);

    impl Roots {
        fn install(&self, heap: &Heap) {
            let roots = self.clone();
            heap.add_root_source(move |visitor| visitor.visit_all(roots.0.lock().iter().copied()));
        }

        fn push(&self, obj: ObjectRef) {
            self.0.lock().push(obj);
        }

        fn clear(&self) {
            self.0.lock().clear();
        }
    }

    fn heap_with(config: Configuration) -> (Heap, Roots, LayoutId) {
        let heap = Heap::new(Arc::new(config));
        let roots = Roots::default();
        roots.install(&heap);
        let pair = heap.register_layout(Arc::new(RefSlots(2)));
        (heap, roots, pair)
    }

    /// root -> a -> b -> a (cycle), plus unreachable c
    fn build_graph(heap: &Heap, roots: &Roots, pair: LayoutId) -> [ObjectRef; 3] {
        let a = heap.allocate_with_layout(32, pair).unwrap();
        let b = heap.allocate_with_layout(32, pair).unwrap();
        let c = heap.allocate_with_layout(32, pair).unwrap();
        unsafe {
            a.set_ref(0, Some(b));
            b.set_ref(0, Some(a));
            c.set_ref(1, Some(a));
        }
        roots.push(a);
        [a, b, c]
    }

    #[test]
    fn test_reclaims_unreachable() {
        let (heap, roots, pair) = heap_with(Configuration::new());
        let [a, b, c] = build_graph(&heap, &roots, pair);
        let big = heap.allocate(10_000).unwrap();

        let cycle = heap.collect().unwrap();
        assert_eq!(cycle.marked_objects, 2);
        assert_eq!(cycle.freed_objects, 2);
        assert!(heap.contains(a));
        assert!(heap.contains(b));
        assert!(!heap.contains(c));
        assert!(!heap.contains(big));
        assert_eq!(heap.state(), CollectorState::Idle);

        roots.clear();
        let cycle = heap.collect().unwrap();
        assert_eq!(cycle.freed_objects, 2);
        assert_eq!(heap.stats().live_objects, 0);
        assert_eq!(heap.stats().collections, 2);
    }

    #[test]
    fn test_large_object_survives_through_reference() {
        let (heap, roots, pair) = heap_with(Configuration::new());
        let holder = heap.allocate_with_layout(16, pair).unwrap();
        let big = heap.allocate(1 << 20).unwrap();
        unsafe { holder.set_ref(1, Some(big)) };
        roots.push(holder);

        heap.collect().unwrap();
        assert!(heap.contains(big));
        assert_eq!(heap.stats().large_objects, 1);
    }

    #[test]
    fn test_debug_fill_poisons_reclaimed() {
        let (heap, roots, pair) = heap_with(Configuration::new().debug_fill(true));
        let [_, _, c] = build_graph(&heap, &roots, pair);

        heap.collect().unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(c.as_ptr(), 32) };
        assert!(bytes.iter().all(|&b| b == POISON));
    }

    #[test]
    fn test_parallel_marking_matches_serial() {
        for threads in [1, 4] {
            let (heap, roots, pair) = heap_with(Configuration::new().gc_threads(threads));
            // A wide tree: every root holds a chain of 50 objects.
            for _ in 0..20 {
                let head = heap.allocate_with_layout(16, pair).unwrap();
                let mut tail = head;
                for _ in 0..49 {
                    let next = heap.allocate_with_layout(16, pair).unwrap();
                    unsafe { tail.set_ref(0, Some(next)) };
                    tail = next;
                }
                roots.push(head);
            }
            for _ in 0..100 {
                heap.allocate(64).unwrap();
            }

            let cycle = heap.collect().unwrap();
            assert_eq!(cycle.marked_objects, 1000, "threads {}", threads);
            assert_eq!(cycle.freed_objects, 100, "threads {}", threads);
        }
    }

    #[test]
    fn test_full_verification_agrees_with_quick() {
        for verify in [VerifyMode::Quick, VerifyMode::Full] {
            let (heap, roots, pair) = heap_with(Configuration::new().verify(verify).gc_threads(2));
            build_graph(&heap, &roots, pair);
            let cycle = heap.collect().unwrap();
            assert_eq!(cycle.marked_objects, 2);
            assert_eq!(cycle.freed_objects, 1);
        }
    }

    #[test]
    fn test_corrupted_header_is_fatal() {
        let (heap, roots, pair) = heap_with(Configuration::new().verify(VerifyMode::Full));
        let [_, b, _] = build_graph(&heap, &roots, pair);
        unsafe { corrupt_magic(b.as_ptr()) };

        let err = heap.collect().unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, HeapError::Corruption { .. }));
        assert_eq!(heap.state(), CollectorState::Idle);
    }

    #[test]
    fn test_parent_validity_catches_bad_child() {
        let (heap, roots, pair) = heap_with(Configuration::new().parent_validity(true));
        let [a, b, _] = build_graph(&heap, &roots, pair);
        unsafe { corrupt_magic(b.as_ptr()) };

        let err = heap.collect().unwrap_err();
        assert_eq!(
            err,
            HeapError::Corruption {
                addr: b.addr(),
                reason: "bad header magic"
            }
        );
        let _ = a;
    }

    #[test]
    fn test_failed_collection_frees_nothing_and_poisons() {
        let (heap, roots, pair) = heap_with(Configuration::new().parent_validity(true));
        // x -> y is healthy; a -> b has a corrupted child
        let x = heap.allocate_with_layout(32, pair).unwrap();
        let y = heap.allocate_with_layout(32, pair).unwrap();
        let a = heap.allocate_with_layout(32, pair).unwrap();
        let b = heap.allocate_with_layout(32, pair).unwrap();
        unsafe {
            x.set_ref(0, Some(y));
            a.set_ref(0, Some(b));
        }
        roots.push(x);
        roots.push(a);
        unsafe { corrupt_magic(b.as_ptr()) };

        let err = heap.collect().unwrap_err();
        assert!(matches!(err, HeapError::Corruption { .. }));
        assert!(heap.is_poisoned());
        for obj in [x, y, a] {
            assert!(heap.contains(obj));
            assert!(!unsafe { obj.header() }.is_marked());
        }

        // Dropping the bad branch does not make the heap usable again
        roots.clear();
        roots.push(x);
        assert_eq!(heap.collect().unwrap_err(), HeapError::Poisoned);
        assert_eq!(heap.allocate(16).unwrap_err(), HeapError::Poisoned);
        assert!(heap.contains(y));
        assert_eq!(heap.stats().collections, 0);
    }

    #[test]
    fn test_unstable_roots_fail_verification() {
        let heap = Heap::new(Arc::new(Configuration::new().verify(VerifyMode::Full)));
        let obj = heap.allocate(24).unwrap();
        // Reports the object to the first trace only.
        let calls = AtomicUsize::new(0);
        heap.add_root_source(move |visitor| {
            if calls.fetch_add(1, Ordering::Relaxed) % 2 == 0 {
                visitor.visit(obj);
            }
        });

        let err = heap.collect().unwrap_err();
        assert_eq!(
            err,
            HeapError::VerificationMismatch {
                marked: 1,
                traced: 0,
                first_difference: obj.addr(),
            }
        );
    }

    #[test]
    fn test_collect_clears_request() {
        let (heap, _roots, _) = heap_with(Configuration::new().collect_interval(256));
        for _ in 0..4 {
            heap.allocate(64).unwrap();
        }
        assert!(heap.collection_requested());
        let cycle = heap.collect_if_needed().unwrap().unwrap();
        assert_eq!(cycle.freed_objects, 4);
        assert!(!heap.collection_requested());
        assert!(heap.collect_if_needed().unwrap().is_none());
    }
}
