//! # gcfiber-heap
//!
//! Pooled size-class allocator with a stop-the-world mark-sweep collector.
//!
//! Objects below the large-object threshold live in fixed-size slots of
//! per-class pools; larger objects get their own allocation. Every object
//! carries a 16-byte header with its layout, size class and mark bit.
//! Reachability starts at registered root sources and follows references
//! reported by registered [`ObjectLayout`]s.
//!
//! ## Modules
//!
//! - `size_class` - Size-to-class mapping
//! - `header` - In-band object header
//! - `page` / `pool` - Pool pages and per-class pools
//! - `large` - Large object space
//! - `layout` / `visitor` - Object introspection and tracing
//! - `heap` - Allocation, roots, accounting
//! - `collector` - Marking, sweeping, verification
//!
//! ## Example
//!
//! ```rust,ignore
//! use gcfiber_heap::{Heap, RefSlots};
//!
//! let heap = Heap::new(Arc::new(Configuration::resolve()?));
//! let pair = heap.register_layout(Arc::new(RefSlots(2)));
//! let obj = heap.allocate_with_layout(16, pair)?;
//! heap.add_root_source(move |v| v.visit(obj));
//! heap.collect()?;
//! ```

pub mod error;
pub mod size_class;
pub mod header;
pub mod page;
pub mod pool;
pub mod large;
pub mod layout;
pub mod visitor;
pub mod stats;
pub mod heap;
mod collector;

pub use error::{HeapError, HeapResult};
pub use heap::{CollectorState, Heap, RootId};
pub use layout::{LayoutId, Leaf, ObjectLayout, RefSlots};
pub use size_class::SizeClasses;
pub use stats::{CollectionStats, HeapStats};
pub use visitor::{ObjectRef, Visitor};
