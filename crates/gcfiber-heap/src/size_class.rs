//! Size classes for pooled objects
//!
//! Classes advance in 16-byte steps up to 256 bytes, then grow by roughly
//! 12.5% per class (rounded to 16) and always end with the class that holds
//! `threshold - 1` bytes. A dense table indexed by 16-byte granule maps any
//! pooled size to its class in O(1).

/// Granularity of every size class
pub const SIZE_STEP: usize = 16;

/// Classes below this size are spaced exactly one step apart
pub const PRECISE_CUTOFF: usize = 256;

/// Maximum number of classes (class indices are stored in a `u8` header field)
pub const MAX_CLASSES: usize = u8::MAX as usize;

#[inline]
pub(crate) const fn round_up(x: usize, to: usize) -> usize {
    (x + to - 1) & !(to - 1)
}

/// Size class table for one large-object threshold
#[derive(Debug, Clone)]
pub struct SizeClasses {
    classes: Vec<usize>,
    lookup: Vec<u8>,
    threshold: usize,
}

impl SizeClasses {
    /// Build the classes for objects strictly below `threshold` bytes.
    ///
    /// `threshold` must be at least one step.
    pub fn new(threshold: usize) -> Self {
        debug_assert!(threshold >= SIZE_STEP);
        let last = round_up(threshold - 1, SIZE_STEP).max(SIZE_STEP);

        let mut classes = Vec::new();
        let mut size = SIZE_STEP;
        while size < last && size <= PRECISE_CUTOFF {
            classes.push(size);
            size += SIZE_STEP;
        }
        if let Some(&top) = classes.last() {
            let mut size = top;
            loop {
                size = round_up(size + size / 8, SIZE_STEP);
                if size >= last {
                    break;
                }
                classes.push(size);
            }
        }
        classes.push(last);
        debug_assert!(classes.len() <= MAX_CLASSES);

        let granules = last / SIZE_STEP;
        let mut lookup = Vec::with_capacity(granules + 1);
        let mut class = 0;
        for granule in 0..=granules {
            while classes[class] < granule * SIZE_STEP {
                class += 1;
            }
            lookup.push(class as u8);
        }

        Self {
            classes,
            lookup,
            threshold,
        }
    }

    /// Class index for a pooled size, or `None` if `size` is large.
    ///
    /// A request of 0 bytes maps to the smallest class.
    #[inline]
    pub fn class_for(&self, size: usize) -> Option<usize> {
        if size >= self.threshold {
            return None;
        }
        let granule = (size + SIZE_STEP - 1) / SIZE_STEP;
        Some(self.lookup[granule] as usize)
    }

    /// Payload bytes held by each slot of class `index`
    #[inline]
    pub fn slot_size(&self, index: usize) -> usize {
        self.classes[index]
    }

    /// Number of classes
    #[inline]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// First size that bypasses the pools
    #[inline]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.classes.iter().copied()
    }
}
