//! The heap: size-class pools, large objects, layouts and roots

use crate::error::{HeapError, HeapResult};
use crate::layout::{LayoutId, Leaf, ObjectLayout};
use crate::large::LargeSpace;
use crate::pool::Pool;
use crate::size_class::SizeClasses;
use crate::stats::HeapStats;
use crate::visitor::{ObjectRef, Visitor};
use gcfiber_core::Configuration;
use parking_lot::{Mutex, RwLock};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Phase of the collector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CollectorState {
    Idle = 0,
    Marking = 1,
    Sweeping = 2,
}

impl From<u8> for CollectorState {
    fn from(v: u8) -> Self {
        match v {
            1 => CollectorState::Marking,
            2 => CollectorState::Sweeping,
            _ => CollectorState::Idle,
        }
    }
}

/// Handle for a registered root source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootId(u64);

pub(crate) type RootFn = dyn Fn(&mut Visitor<'_>) + Send + Sync;

/// Heap state guarded by the heap lock
pub(crate) struct Space {
    pub(crate) pools: Vec<Pool>,
    pub(crate) large: LargeSpace,
    pub(crate) stats: HeapStats,
    /// Bytes to allocate before the next collection is requested
    pub(crate) interval: usize,
}

impl Space {
    /// Payload address of every allocated object
    pub(crate) fn objects(&self) -> impl Iterator<Item = NonNull<u8>> + '_ {
        self.pools
            .iter()
            .flat_map(|pool| pool.objects())
            .chain(self.large.objects())
    }
}

/// Garbage-collected heap
///
/// Allocation is safe from any thread. A collection must only run while no
/// mutator touches heap objects; the `gcfiber` runtime guarantees this with
/// its safepoint.
pub struct Heap {
    pub(crate) config: Arc<Configuration>,
    pub(crate) classes: SizeClasses,
    pub(crate) space: Mutex<Space>,
    pub(crate) layouts: RwLock<Vec<Arc<dyn ObjectLayout>>>,
    pub(crate) roots: Mutex<Vec<(RootId, Box<RootFn>)>>,
    next_root: AtomicU64,
    state: AtomicU8,
    pub(crate) collect_requested: AtomicBool,
    /// Latched by a fatal collection error
    pub(crate) poisoned: AtomicBool,
}

impl Heap {
    pub fn new(config: Arc<Configuration>) -> Self {
        let classes = SizeClasses::new(config.large_object_threshold);
        let pools = classes
            .iter()
            .enumerate()
            .map(|(class, slot_size)| Pool::new(class as u8, slot_size, config.page_size))
            .collect();

        tracing::debug!(
            classes = classes.len(),
            threshold = classes.threshold(),
            page_size = config.page_size,
            "heap created"
        );

        let space = Space {
            pools,
            large: LargeSpace::new(config.cache_align_threshold),
            stats: HeapStats::default(),
            interval: next_interval(&config, 0),
        };

        Self {
            classes,
            space: Mutex::new(space),
            layouts: RwLock::new(vec![Arc::new(Leaf) as Arc<dyn ObjectLayout>]),
            roots: Mutex::new(Vec::new()),
            next_root: AtomicU64::new(1),
            state: AtomicU8::new(CollectorState::Idle as u8),
            collect_requested: AtomicBool::new(false),
            poisoned: AtomicBool::new(false),
            config,
        }
    }

    /// Allocate a zeroed object without references
    pub fn allocate(&self, size: usize) -> HeapResult<ObjectRef> {
        self.allocate_with_layout(size, LayoutId::LEAF)
    }

    /// Allocate a zeroed object traced through `layout`.
    ///
    /// The payload is rounded up to the layout's minimum size.
    pub fn allocate_with_layout(&self, size: usize, layout: LayoutId) -> HeapResult<ObjectRef> {
        if self.is_poisoned() {
            return Err(HeapError::Poisoned);
        }
        let size = match self.layouts.read().get(layout.index()) {
            Some(desc) => size.max(desc.min_size()),
            None => return Err(HeapError::UnknownLayout(layout.as_u16())),
        };

        let mut space = self.space.lock();
        let ptr = match self.classes.class_for(size) {
            Some(class) => space.pools[class].allocate(size, layout, self.config.debug_fill)?,
            None => space.large.allocate(size, layout)?,
        };
        space.stats.record_allocation(size);

        if space.stats.allocated_since_collect >= space.interval
            && !self.collect_requested.swap(true, Ordering::AcqRel)
        {
            tracing::debug!(
                allocated = space.stats.allocated_since_collect,
                interval = space.interval,
                "collection requested"
            );
        }
        Ok(ObjectRef::from_non_null(ptr))
    }

    /// Register an object layout; objects allocated with the returned id are
    /// traced through it.
    pub fn register_layout(&self, layout: Arc<dyn ObjectLayout>) -> LayoutId {
        let mut layouts = self.layouts.write();
        assert!(layouts.len() < u16::MAX as usize, "too many object layouts");
        layouts.push(layout);
        LayoutId::from_u16((layouts.len() - 1) as u16)
    }

    /// Register a root source, invoked at the start of every marking phase.
    ///
    /// The callback runs with the heap locked and must not allocate.
    pub fn add_root_source<F>(&self, source: F) -> RootId
    where
        F: Fn(&mut Visitor<'_>) + Send + Sync + 'static,
    {
        let id = RootId(self.next_root.fetch_add(1, Ordering::Relaxed));
        self.roots.lock().push((id, Box::new(source)));
        id
    }

    /// Unregister a root source; returns false if it was not registered
    pub fn remove_root_source(&self, id: RootId) -> bool {
        let mut roots = self.roots.lock();
        let before = roots.len();
        roots.retain(|(root, _)| *root != id);
        roots.len() != before
    }

    /// Whether the allocation watermark asked for a collection
    #[inline]
    pub fn collection_requested(&self) -> bool {
        self.collect_requested.load(Ordering::Acquire)
    }

    /// Ask for a collection at the next opportunity
    pub fn request_collection(&self) {
        self.collect_requested.store(true, Ordering::Release);
    }

    /// Collect if the watermark was crossed.
    ///
    /// For standalone use; under the runtime, collections are driven by the
    /// safepoint.
    pub fn collect_if_needed(&self) -> HeapResult<Option<crate::CollectionStats>> {
        if self.collection_requested() {
            self.collect().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Whether a fatal collection error has disabled the heap
    #[inline]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    #[inline]
    pub fn state(&self) -> CollectorState {
        CollectorState::from(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: CollectorState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Whether `obj` is a currently allocated object
    pub fn contains(&self, obj: ObjectRef) -> bool {
        let space = self.space.lock();
        let found = space.objects().any(|p| p.as_ptr() == obj.as_ptr());
        found
    }

    /// Snapshot of the heap's counters
    pub fn stats(&self) -> HeapStats {
        let space = self.space.lock();
        let mut stats = space.stats;
        stats.pages = space.pools.iter().map(Pool::page_count).sum();
        stats.large_objects = space.large.len();
        stats
    }

    #[inline]
    pub fn size_classes(&self) -> &SizeClasses {
        &self.classes
    }

    #[inline]
    pub fn config(&self) -> &Arc<Configuration> {
        &self.config
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        if self.config.final_stats {
            let stats = self.stats();
            tracing::info!(
                collections = stats.collections,
                total_allocated = stats.total_allocated,
                total_objects = stats.total_objects,
                total_freed_objects = stats.total_freed_objects,
                total_freed_bytes = stats.total_freed_bytes,
                live_objects = stats.live_objects,
                live_bytes = stats.live_bytes,
                mark_time = ?stats.total_mark_time,
                sweep_time = ?stats.total_sweep_time,
                "gc final stats"
            );
        }
    }
}

/// Bytes to allocate before requesting the next collection.
///
/// With a heap-size hint the interval shrinks to half the remaining headroom,
/// but never below one page.
pub(crate) fn next_interval(config: &Configuration, live_bytes: usize) -> usize {
    let interval = config.collect_interval.max(1);
    match config.heap_size_hint {
        Some(hint) => {
            let headroom = hint.saturating_sub(live_bytes as u64) / 2;
            let headroom = usize::try_from(headroom).unwrap_or(usize::MAX);
            interval.min(headroom.max(config.page_size))
        }
        None => interval,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::RefSlots;
    use gcfiber_core::constants::CACHE_LINE_SIZE;

    fn heap_with(config: Configuration) -> Heap {
        Heap::new(Arc::new(config))
    }

    #[test]
    fn test_same_class_same_pool() {
        let heap = heap_with(Configuration::new());
        let a = heap.allocate(100).unwrap();
        let b = heap.allocate(110).unwrap();
        let c = heap.allocate(200).unwrap();
        unsafe {
            assert_eq!(a.header().class(), b.header().class());
            assert_ne!(a.header().class(), c.header().class());
            assert_eq!(a.size(), 100);
        }
    }

    #[test]
    fn test_threshold_boundary_2048() {
        let config = Configuration::new()
            .large_object_threshold(2048)
            .cache_align_threshold(2048);
        let heap = heap_with(config);

        let large = heap.allocate(2048).unwrap();
        let pooled = heap.allocate(2047).unwrap();
        unsafe {
            assert!(large.header().is_large());
            assert!(!pooled.header().is_large());
        }
        assert_eq!(large.addr() % CACHE_LINE_SIZE, 0);
        assert_eq!(heap.stats().large_objects, 1);
    }

    #[test]
    fn test_zero_sized_allocation() {
        let heap = heap_with(Configuration::new());
        let a = heap.allocate(0).unwrap();
        let b = heap.allocate(0).unwrap();
        assert_ne!(a, b);
        unsafe { assert_eq!(a.header().class(), 0) };
        assert!(heap.contains(a));
    }

    #[test]
    fn test_layout_min_size() {
        let heap = heap_with(Configuration::new());
        let pair = heap.register_layout(Arc::new(RefSlots(2)));
        assert_eq!(pair.index(), 1);
        let obj = heap.allocate_with_layout(0, pair).unwrap();
        unsafe {
            assert_eq!(obj.size(), 16);
            assert_eq!(obj.get_ref(0), None);
            assert_eq!(obj.get_ref(1), None);
        }

        let err = heap.allocate_with_layout(8, LayoutId::from_u16(7)).unwrap_err();
        assert_eq!(err, HeapError::UnknownLayout(7));
    }

    #[test]
    fn test_watermark_requests_collection() {
        let heap = heap_with(Configuration::new().collect_interval(1024));
        assert!(!heap.collection_requested());
        for _ in 0..7 {
            heap.allocate(128).unwrap();
        }
        assert!(!heap.collection_requested());
        heap.allocate(128).unwrap();
        assert!(heap.collection_requested());
        assert_eq!(heap.stats().allocated_since_collect, 1024);
    }

    #[test]
    fn test_interval_follows_heap_hint() {
        let config = Configuration::new()
            .collect_interval(1 << 30)
            .heap_size_hint(Some(1 << 20));
        assert_eq!(next_interval(&config, 0), 1 << 19);
        assert_eq!(next_interval(&config, 1 << 19), 1 << 18);
        // Never below one page, even past the hint.
        assert_eq!(next_interval(&config, 4 << 20), config.page_size);

        let config = Configuration::new().collect_interval(4096);
        assert_eq!(next_interval(&config, 1 << 40), 4096);
    }

    #[test]
    fn test_root_source_registration() {
        let heap = heap_with(Configuration::new());
        let a = heap.add_root_source(|_| {});
        let b = heap.add_root_source(|_| {});
        assert_ne!(a, b);
        assert!(heap.remove_root_source(a));
        assert!(!heap.remove_root_source(a));
        assert_eq!(heap.roots.lock().len(), 1);
    }

    #[test]
    fn test_concurrent_allocation() {
        let heap = Arc::new(heap_with(Configuration::new()));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let heap = Arc::clone(&heap);
                std::thread::spawn(move || {
                    (0..500)
                        .map(|i| heap.allocate(8 + (i + t) % 300).unwrap().addr())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut addrs: Vec<usize> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        let total = addrs.len();
        addrs.sort_unstable();
        addrs.dedup();
        assert_eq!(addrs.len(), total);
        assert_eq!(heap.stats().total_objects, 2000);
    }
}
