//! In-band object header
//!
//! Every object, pooled or large, is preceded by a 16-byte header:
//!
//! ```text
//! +--------+--------+-------+-------+----------+----------------+
//! | magic  | layout | flags | class | reserved | size           |
//! | u16    | u16    | u8    | u8    | u16      | u64            |
//! +--------+--------+-------+-------+----------+----------------+
//! ```
//!
//! `flags` carries the mark bit and is the only field touched concurrently
//! (during parallel marking), so it is atomic.

use crate::layout::LayoutId;
use crate::size_class::SizeClasses;
use std::mem::size_of;
use std::sync::atomic::{AtomicU8, Ordering};

/// Tag identifying a live header
pub const MAGIC: u16 = 0x6766;

/// Bytes reserved in front of every payload
pub const HEADER_SIZE: usize = 16;

/// Class index stored in the header of large objects
pub const LARGE_CLASS: u8 = u8::MAX;

const FLAG_MARK: u8 = 1 << 0;
const FLAG_LARGE: u8 = 1 << 1;

#[repr(C)]
pub struct ObjectHeader {
    magic: u16,
    layout: u16,
    flags: AtomicU8,
    class: u8,
    reserved: u16,
    size: u64,
}

const _: () = assert!(size_of::<ObjectHeader>() == HEADER_SIZE);

impl ObjectHeader {
    /// Write a fresh header into `slot`.
    ///
    /// # Safety
    ///
    /// `slot` must be valid for `HEADER_SIZE` bytes and 8-byte aligned.
    pub(crate) unsafe fn init(slot: *mut u8, layout: LayoutId, class: u8, size: usize, large: bool) {
        slot.cast::<ObjectHeader>().write(ObjectHeader {
            magic: MAGIC,
            layout: layout.as_u16(),
            flags: AtomicU8::new(if large { FLAG_LARGE } else { 0 }),
            class,
            reserved: 0,
            size: size as u64,
        });
    }

    /// Header in front of `payload`.
    ///
    /// # Safety
    ///
    /// `payload` must have been returned by the heap and not yet reclaimed.
    #[inline(always)]
    pub(crate) unsafe fn from_payload<'a>(payload: *const u8) -> &'a ObjectHeader {
        &*payload.sub(HEADER_SIZE).cast::<ObjectHeader>()
    }

    #[inline(always)]
    pub fn payload(&self) -> *mut u8 {
        (self as *const Self as usize + HEADER_SIZE) as *mut u8
    }

    #[inline(always)]
    pub fn layout(&self) -> LayoutId {
        LayoutId::from_u16(self.layout)
    }

    #[inline(always)]
    pub fn class(&self) -> u8 {
        self.class
    }

    /// Requested payload size in bytes
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size as usize
    }

    #[inline(always)]
    pub fn is_large(&self) -> bool {
        self.flags.load(Ordering::Relaxed) & FLAG_LARGE != 0
    }

    #[inline(always)]
    pub fn is_marked(&self) -> bool {
        self.flags.load(Ordering::Acquire) & FLAG_MARK != 0
    }

    /// Set the mark bit; returns true if this call marked the object
    #[inline(always)]
    pub fn try_mark(&self) -> bool {
        self.flags.fetch_or(FLAG_MARK, Ordering::AcqRel) & FLAG_MARK == 0
    }

    #[inline(always)]
    pub fn clear_mark(&self) {
        self.flags.fetch_and(!FLAG_MARK, Ordering::Release);
    }

    /// Check the header for internal consistency.
    pub fn check(&self, classes: &SizeClasses, layouts: usize) -> Result<(), &'static str> {
        if self.magic != MAGIC {
            return Err("bad header magic");
        }
        if self.layout as usize >= layouts {
            return Err("unknown object layout");
        }
        let flags = self.flags.load(Ordering::Relaxed);
        if flags & !(FLAG_MARK | FLAG_LARGE) != 0 {
            return Err("unknown header flags");
        }
        if flags & FLAG_LARGE != 0 {
            if self.class != LARGE_CLASS {
                return Err("large object with a size class");
            }
            if (self.size as usize) < classes.threshold() {
                return Err("large object below threshold");
            }
        } else {
            let class = self.class as usize;
            if class >= classes.len() {
                return Err("size class out of range");
            }
            if self.size as usize > classes.slot_size(class) {
                return Err("size exceeds its size class");
            }
        }
        Ok(())
    }
}

/// Overwrite the magic of the header in front of `payload` (stray-write simulation).
///
/// # Safety
///
/// `payload` must point at a live object.
#[cfg(test)]
pub(crate) unsafe fn corrupt_magic(payload: *mut u8) {
    payload.sub(HEADER_SIZE).cast::<u16>().write(0xdead);
}
