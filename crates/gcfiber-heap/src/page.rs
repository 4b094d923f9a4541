//! Pool pages
//!
//! A page is one OS mapping partitioned into equal slots of
//! `HEADER_SIZE + slot_size` bytes. Free slots are kept on an index stack, so
//! both allocation and release are O(1). An allocated bitmap lets the sweeper
//! walk live slots without trusting their headers.

use crate::error::{HeapError, HeapResult};
use crate::header::HEADER_SIZE;
use std::ptr::NonNull;

/// Byte written over freed memory in debug-fill mode
pub const POISON: u8 = 0xbb;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        unsafe fn map_memory(size: usize) -> Option<NonNull<u8>> {
            let ptr = libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            );
            if ptr == libc::MAP_FAILED {
                None
            } else {
                NonNull::new(ptr.cast::<u8>())
            }
        }

        unsafe fn unmap_memory(ptr: NonNull<u8>, size: usize) {
            libc::munmap(ptr.as_ptr().cast(), size);
        }
    } else {
        use std::alloc::{alloc_zeroed, dealloc, Layout};

        const MAP_ALIGN: usize = gcfiber_core::constants::SMALL_PAGE_SIZE;

        unsafe fn map_memory(size: usize) -> Option<NonNull<u8>> {
            let layout = Layout::from_size_align(size, MAP_ALIGN).ok()?;
            NonNull::new(alloc_zeroed(layout))
        }

        unsafe fn unmap_memory(ptr: NonNull<u8>, size: usize) {
            dealloc(ptr.as_ptr(), Layout::from_size_align_unchecked(size, MAP_ALIGN));
        }
    }
}

pub struct Page {
    base: NonNull<u8>,
    size: usize,
    stride: usize,
    capacity: u16,
    free: Vec<u16>,
    allocated: Vec<u64>,
}

// A page is only touched under the heap lock.
unsafe impl Send for Page {}

impl Page {
    /// Map a page holding slots of `slot_size` payload bytes.
    pub fn new(size: usize, slot_size: usize, poison: bool) -> HeapResult<Self> {
        let stride = HEADER_SIZE + slot_size;
        let capacity = (size / stride).min(u16::MAX as usize);
        debug_assert!(capacity >= 1);

        let base = unsafe { map_memory(size) }.ok_or(HeapError::OutOfMemory { requested: size })?;
        if poison {
            unsafe { std::ptr::write_bytes(base.as_ptr(), POISON, size) };
        }

        Ok(Self {
            base,
            size,
            stride,
            capacity: capacity as u16,
            // Pop order is ascending slot index.
            free: (0..capacity as u16).rev().collect(),
            allocated: vec![0; (capacity + 63) / 64],
        })
    }

    /// Take a free slot; returns its index and header address
    #[inline]
    pub fn pop(&mut self) -> Option<(u16, NonNull<u8>)> {
        let index = self.free.pop()?;
        self.allocated[index as usize / 64] |= 1 << (index % 64);
        Some((index, self.slot(index)))
    }

    /// Return a slot to the free-list
    #[inline]
    pub fn release(&mut self, index: u16) {
        debug_assert!(self.is_allocated(index));
        self.allocated[index as usize / 64] &= !(1 << (index % 64));
        self.free.push(index);
    }

    #[inline]
    pub fn is_allocated(&self, index: u16) -> bool {
        self.allocated[index as usize / 64] & (1 << (index % 64)) != 0
    }

    /// Header address of slot `index`
    #[inline]
    pub fn slot(&self, index: u16) -> NonNull<u8> {
        debug_assert!(index < self.capacity);
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(index as usize * self.stride)) }
    }

    /// Indices of allocated slots
    pub fn allocated_slots(&self) -> impl Iterator<Item = u16> + '_ {
        (0..self.capacity).filter(move |&i| self.is_allocated(i))
    }

    #[inline]
    pub fn has_free(&self) -> bool {
        !self.free.is_empty()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.free.len() == self.capacity as usize
    }

    #[inline]
    pub fn live(&self) -> usize {
        self.capacity as usize - self.free.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        let base = self.base.as_ptr() as usize;
        addr >= base && addr < base + self.size
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        unsafe { unmap_memory(self.base, self.size) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_are_disjoint() {
        let mut page = Page::new(16 * 1024, 48, false).unwrap();
        assert_eq!(page.stride(), 64);
        assert_eq!(page.capacity(), 256);

        let (i0, s0) = page.pop().unwrap();
        let (i1, s1) = page.pop().unwrap();
        assert_eq!((i0, i1), (0, 1));
        assert_eq!(s1.as_ptr() as usize - s0.as_ptr() as usize, 64);
        assert!(page.contains(s1.as_ptr() as usize));
        assert_eq!(page.live(), 2);
    }

    #[test]
    fn test_release_reuses_slot() {
        let mut page = Page::new(4096, 16, false).unwrap();
        let (a, _) = page.pop().unwrap();
        let (b, _) = page.pop().unwrap();
        page.release(a);
        assert!(!page.is_allocated(a));
        assert!(page.is_allocated(b));
        assert_eq!(page.pop().unwrap().0, a);
        assert_eq!(page.allocated_slots().collect::<Vec<_>>(), vec![a, b]);
    }

    #[test]
    fn test_fill_and_drain() {
        let mut page = Page::new(4096, 2032, false).unwrap();
        assert_eq!(page.capacity(), 2);
        assert!(page.pop().is_some());
        assert!(page.pop().is_some());
        assert!(!page.has_free());
        assert!(page.pop().is_none());
        page.release(0);
        page.release(1);
        assert!(page.is_empty());
    }

    #[test]
    fn test_poisoned_page() {
        let mut page = Page::new(4096, 32, true).unwrap();
        let (_, slot) = page.pop().unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(slot.as_ptr(), page.stride()) };
        assert!(bytes.iter().all(|&b| b == POISON));
    }
}
