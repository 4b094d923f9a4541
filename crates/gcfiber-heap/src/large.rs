//! Large object space
//!
//! Objects at or above the large-object threshold get their own allocation
//! from the global allocator, with the usual header placed right before the
//! payload. Payloads of at least the cache-alignment threshold start on a
//! cache line.

use crate::error::{HeapError, HeapResult};
use crate::header::{ObjectHeader, HEADER_SIZE, LARGE_CLASS};
use crate::layout::LayoutId;
use crate::page::POISON;
use crate::pool::SweepResult;
use gcfiber_core::constants::CACHE_LINE_SIZE;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

/// Minimum payload alignment of every object
pub const MIN_ALIGN: usize = 16;

struct LargeObject {
    base: NonNull<u8>,
    layout: Layout,
    payload: NonNull<u8>,
}

impl LargeObject {
    fn create(size: usize, align: usize) -> Option<Self> {
        let offset = HEADER_SIZE.max(align);
        let total = offset.checked_add(size)?;
        let layout = Layout::from_size_align(total, align).ok()?;
        let base = NonNull::new(unsafe { alloc_zeroed(layout) })?;
        let payload = unsafe { NonNull::new_unchecked(base.as_ptr().add(offset)) };
        Some(Self {
            base,
            layout,
            payload,
        })
    }

    #[inline]
    fn header(&self) -> &ObjectHeader {
        unsafe { ObjectHeader::from_payload(self.payload.as_ptr()) }
    }

    fn destroy(self, poison: bool) {
        unsafe {
            if poison {
                std::ptr::write_bytes(self.base.as_ptr(), POISON, self.layout.size());
            }
            dealloc(self.base.as_ptr(), self.layout);
        }
    }
}

pub struct LargeSpace {
    objects: Vec<LargeObject>,
    bytes: usize,
    cache_align_threshold: usize,
}

// Records are only touched under the heap lock.
unsafe impl Send for LargeSpace {}

impl LargeSpace {
    pub fn new(cache_align_threshold: usize) -> Self {
        Self {
            objects: Vec::new(),
            bytes: 0,
            cache_align_threshold,
        }
    }

    /// Alignment used for a payload of `size` bytes
    #[inline]
    pub fn alignment_for(&self, size: usize) -> usize {
        if size >= self.cache_align_threshold {
            CACHE_LINE_SIZE
        } else {
            MIN_ALIGN
        }
    }

    pub fn allocate(&mut self, size: usize, layout: LayoutId) -> HeapResult<NonNull<u8>> {
        let align = self.alignment_for(size);
        let object = LargeObject::create(size, align).ok_or(HeapError::OutOfMemory { requested: size })?;
        let payload = object.payload;
        unsafe {
            ObjectHeader::init(
                payload.as_ptr().sub(HEADER_SIZE),
                layout,
                LARGE_CLASS,
                size,
                true,
            );
        }
        self.bytes += size;
        self.objects.push(object);
        tracing::trace!(size, align, "large object allocated");
        Ok(payload)
    }

    /// Free every unmarked large object and clear the marks of the rest
    pub fn sweep(&mut self, poison: bool) -> SweepResult {
        let mut result = SweepResult::default();
        let mut kept = Vec::with_capacity(self.objects.len());
        for object in self.objects.drain(..) {
            let header = object.header();
            let size = header.size();
            if header.is_marked() {
                header.clear_mark();
                result.live_objects += 1;
                result.live_bytes += size;
                kept.push(object);
            } else {
                result.freed_objects += 1;
                result.freed_bytes += size;
                object.destroy(poison);
            }
        }
        self.objects = kept;
        self.bytes = result.live_bytes;
        result
    }

    /// Payload addresses of every large object
    pub fn objects(&self) -> impl Iterator<Item = NonNull<u8>> + '_ {
        self.objects.iter().map(|object| object.payload)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Payload bytes held by large objects
    #[inline]
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for LargeSpace {
    fn drop(&mut self) {
        for object in self.objects.drain(..) {
            object.destroy(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_alignment() {
        let mut space = LargeSpace::new(2048);
        for size in [2048, 3000, 1 << 16] {
            let p = space.allocate(size, LayoutId::LEAF).unwrap();
            assert_eq!(p.as_ptr() as usize % CACHE_LINE_SIZE, 0, "size {}", size);
        }
        assert_eq!(space.len(), 3);
        assert_eq!(space.bytes(), 2048 + 3000 + (1 << 16));
    }

    #[test]
    fn test_below_align_threshold() {
        let mut space = LargeSpace::new(4096);
        assert_eq!(space.alignment_for(2048), MIN_ALIGN);
        let p = space.allocate(2048, LayoutId::LEAF).unwrap();
        assert_eq!(p.as_ptr() as usize % MIN_ALIGN, 0);
        let header = unsafe { ObjectHeader::from_payload(p.as_ptr()) };
        assert!(header.is_large());
        assert_eq!(header.size(), 2048);
    }

    #[test]
    fn test_sweep() {
        let mut space = LargeSpace::new(2048);
        let keep = space.allocate(4096, LayoutId::LEAF).unwrap();
        space.allocate(8192, LayoutId::LEAF).unwrap();
        unsafe { ObjectHeader::from_payload(keep.as_ptr()).try_mark() };

        let result = space.sweep(false);
        assert_eq!(result.freed_objects, 1);
        assert_eq!(result.freed_bytes, 8192);
        assert_eq!(space.objects().collect::<Vec<_>>(), vec![keep]);
        assert_eq!(space.bytes(), 4096);
    }
}
