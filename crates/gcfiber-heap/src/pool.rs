//! Per-size-class pools

use crate::error::{HeapError, HeapResult};
use crate::header::{ObjectHeader, HEADER_SIZE};
use crate::layout::LayoutId;
use crate::page::{Page, POISON};
use std::ptr::NonNull;

/// Outcome of sweeping one pool
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepResult {
    pub freed_objects: usize,
    pub freed_bytes: usize,
    pub live_objects: usize,
    pub live_bytes: usize,
    pub pages_released: usize,
}

impl SweepResult {
    pub fn merge(&mut self, other: SweepResult) {
        self.freed_objects += other.freed_objects;
        self.freed_bytes += other.freed_bytes;
        self.live_objects += other.live_objects;
        self.live_bytes += other.live_bytes;
        self.pages_released += other.pages_released;
    }
}

pub struct Pool {
    class: u8,
    slot_size: usize,
    page_size: usize,
    pages: Vec<Page>,
    /// Pages with at least one free slot; the last entry is tried first
    available: Vec<usize>,
}

impl Pool {
    pub fn new(class: u8, slot_size: usize, page_size: usize) -> Self {
        Self {
            class,
            slot_size,
            page_size,
            pages: Vec::new(),
            available: Vec::new(),
        }
    }

    /// Allocate a zeroed object of `size` bytes; returns the payload address.
    ///
    /// Grows the pool by one page when every page is full.
    pub fn allocate(&mut self, size: usize, layout: LayoutId, debug_fill: bool) -> HeapResult<NonNull<u8>> {
        debug_assert!(size <= self.slot_size);
        let (page, index, slot) = match self.pop() {
            Some(found) => found,
            None => {
                self.grow(debug_fill)?;
                self.pop().ok_or(HeapError::OutOfMemory { requested: size })?
            }
        };

        unsafe {
            let payload = slot.as_ptr().add(HEADER_SIZE);
            if debug_fill {
                let bytes = std::slice::from_raw_parts(payload, self.slot_size);
                if bytes.iter().any(|&b| b != POISON) {
                    self.release(page, index);
                    return Err(HeapError::Corruption {
                        addr: payload as usize,
                        reason: "write after free",
                    });
                }
            }
            ObjectHeader::init(slot.as_ptr(), layout, self.class, size, false);
            std::ptr::write_bytes(payload, 0, self.slot_size);
            Ok(NonNull::new_unchecked(payload))
        }
    }

    fn pop(&mut self) -> Option<(usize, u16, NonNull<u8>)> {
        while let Some(&page) = self.available.last() {
            if let Some((index, slot)) = self.pages[page].pop() {
                if !self.pages[page].has_free() {
                    self.available.pop();
                }
                return Some((page, index, slot));
            }
            self.available.pop();
        }
        None
    }

    fn grow(&mut self, poison: bool) -> HeapResult<()> {
        let page = Page::new(self.page_size, self.slot_size, poison)?;
        self.pages.push(page);
        self.available.push(self.pages.len() - 1);
        tracing::trace!(slot_size = self.slot_size, pages = self.pages.len(), "pool grew");
        Ok(())
    }

    fn release(&mut self, page: usize, index: u16) {
        let was_full = !self.pages[page].has_free();
        self.pages[page].release(index);
        if was_full {
            self.available.push(page);
        }
    }

    /// Free every unmarked object and clear the marks of the rest.
    ///
    /// With `poison` set, freed slots are overwritten with the poison byte
    /// and empty pages are kept; otherwise empty pages beyond one spare are
    /// unmapped.
    pub fn sweep(&mut self, poison: bool) -> SweepResult {
        let mut result = SweepResult::default();

        for page in &mut self.pages {
            let slots: Vec<u16> = page.allocated_slots().collect();
            for index in slots {
                let slot = page.slot(index).as_ptr();
                let header = unsafe { ObjectHeader::from_payload(slot.add(HEADER_SIZE)) };
                let size = header.size();
                if header.is_marked() {
                    header.clear_mark();
                    result.live_objects += 1;
                    result.live_bytes += size;
                } else {
                    if poison {
                        unsafe { std::ptr::write_bytes(slot, POISON, page.stride()) };
                    }
                    page.release(index);
                    result.freed_objects += 1;
                    result.freed_bytes += size;
                }
            }
        }

        if !poison {
            let before = self.pages.len();
            let mut spare = false;
            self.pages.retain(|page| {
                if !page.is_empty() {
                    return true;
                }
                !std::mem::replace(&mut spare, true)
            });
            result.pages_released = before - self.pages.len();
        }

        self.available = (0..self.pages.len())
            .rev()
            .filter(|&i| self.pages[i].has_free())
            .collect();
        result
    }

    /// Payload addresses of every allocated object
    pub fn objects(&self) -> impl Iterator<Item = NonNull<u8>> + '_ {
        self.pages.iter().flat_map(|page| {
            page.allocated_slots().map(move |index| unsafe {
                NonNull::new_unchecked(page.slot(index).as_ptr().add(HEADER_SIZE))
            })
        })
    }

    #[inline]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    #[inline]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn live_objects(&self) -> usize {
        self.pages.iter().map(Page::live).sum()
    }

    pub fn capacity(&self) -> usize {
        self.pages.iter().map(Page::capacity).sum()
    }
}
