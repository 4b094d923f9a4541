//! Collector hook handed to every scheduler

use gcfiber_heap::Heap;
use gcfiber_runtime::GcHook;
use std::sync::Arc;

/// Runs heap collections at worker safepoints
pub(crate) struct HeapHook {
    heap: Arc<Heap>,
}

impl HeapHook {
    pub(crate) fn new(heap: Arc<Heap>) -> Self {
        Self { heap }
    }
}

impl GcHook for HeapHook {
    fn pending(&self) -> bool {
        self.heap.collection_requested()
    }

    fn collect(&self) {
        match self.heap.collect() {
            Ok(stats) => tracing::debug!(
                freed = stats.freed_objects,
                live = stats.marked_objects,
                "automatic collection finished"
            ),
            Err(err) if err.is_fatal() => {
                tracing::error!(%err, "fatal heap error during automatic collection");
                std::process::abort();
            }
            Err(err) => tracing::warn!(%err, "automatic collection failed"),
        }
    }
}
