//! Heap and collection statistics

use std::time::Duration;

/// Result of one collection cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub marked_objects: usize,
    pub marked_bytes: usize,
    pub freed_objects: usize,
    pub freed_bytes: usize,
    pub pages_released: usize,
    pub mark_time: Duration,
    pub sweep_time: Duration,
}

/// Running totals for a heap
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Completed collection cycles
    pub collections: u64,
    /// Bytes requested since the heap was created
    pub total_allocated: u64,
    /// Objects requested since the heap was created
    pub total_objects: u64,
    /// Bytes requested since the last collection
    pub allocated_since_collect: usize,
    /// Objects alive after the last sweep plus those allocated since
    pub live_objects: usize,
    /// Bytes alive after the last sweep plus those allocated since
    pub live_bytes: usize,
    /// Objects reclaimed over the heap's lifetime
    pub total_freed_objects: u64,
    /// Bytes reclaimed over the heap's lifetime
    pub total_freed_bytes: u64,
    /// Pool pages currently mapped
    pub pages: usize,
    /// Large objects currently allocated
    pub large_objects: usize,
    /// Time spent marking over the heap's lifetime
    pub total_mark_time: Duration,
    /// Time spent sweeping over the heap's lifetime
    pub total_sweep_time: Duration,
}

impl HeapStats {
    pub(crate) fn record_allocation(&mut self, size: usize) {
        self.total_allocated += size as u64;
        self.total_objects += 1;
        self.allocated_since_collect += size;
        self.live_objects += 1;
        self.live_bytes += size;
    }

    pub(crate) fn record_collection(&mut self, cycle: &CollectionStats) {
        self.collections += 1;
        self.allocated_since_collect = 0;
        self.live_objects = cycle.marked_objects;
        self.live_bytes = cycle.marked_bytes;
        self.total_freed_objects += cycle.freed_objects as u64;
        self.total_freed_bytes += cycle.freed_bytes as u64;
        self.total_mark_time += cycle.mark_time;
        self.total_sweep_time += cycle.sweep_time;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accounting() {
        let mut stats = HeapStats::default();
        stats.record_allocation(100);
        stats.record_allocation(28);
        assert_eq!(stats.allocated_since_collect, 128);
        assert_eq!(stats.live_objects, 2);

        stats.record_collection(&CollectionStats {
            marked_objects: 1,
            marked_bytes: 100,
            freed_objects: 1,
            freed_bytes: 28,
            mark_time: Duration::from_micros(5),
            ..Default::default()
        });
        assert_eq!(stats.collections, 1);
        assert_eq!(stats.allocated_since_collect, 0);
        assert_eq!(stats.live_bytes, 100);
        assert_eq!(stats.total_freed_bytes, 28);
        assert_eq!(stats.total_allocated, 128);
        assert_eq!(stats.total_mark_time, Duration::from_micros(5));
    }
}
