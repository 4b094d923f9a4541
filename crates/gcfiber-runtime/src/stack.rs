//! Task stack regions
//!
//! A task's frame lives in a [`StackBuffer`] that grows downward from the
//! end of its allocation. Tasks either own a dedicated buffer for their
//! whole life, or borrow the running worker's [`SharedStack`] and keep only
//! a save buffer holding the live bytes between steps.

use gcfiber_core::{SchedError, SchedResult, TaskId};

/// A byte-addressed stack region growing downward
pub struct StackBuffer {
    buf: Box<[u8]>,
    /// Offset of the lowest live byte; `buf.len()` when empty
    sp: usize,
}

impl StackBuffer {
    /// Allocate a region of `size` bytes
    pub fn new(size: usize) -> Self {
        Self {
            buf: vec![0u8; size].into_boxed_slice(),
            sp: size,
        }
    }

    /// Total size of the region
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes currently in use
    #[inline]
    pub fn depth(&self) -> usize {
        self.buf.len() - self.sp
    }

    /// Bytes still available below the stack pointer
    #[inline]
    pub fn available(&self) -> usize {
        self.sp
    }

    /// The live portion, lowest address first
    #[inline]
    pub fn live(&self) -> &[u8] {
        &self.buf[self.sp..]
    }

    /// Push `bytes`; the first byte ends up at the new stack pointer
    pub fn push(&mut self, bytes: &[u8]) -> SchedResult<()> {
        if bytes.len() > self.sp {
            return Err(SchedError::StackOverflow {
                requested: bytes.len(),
                available: self.sp,
            });
        }
        self.sp -= bytes.len();
        self.buf[self.sp..self.sp + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Pop the topmost `n` bytes
    pub fn pop(&mut self, n: usize) -> Option<Vec<u8>> {
        let bytes = self.peek(n)?.to_vec();
        self.sp += n;
        Some(bytes)
    }

    /// Look at the topmost `n` bytes without popping them
    pub fn peek(&self, n: usize) -> Option<&[u8]> {
        if n > self.depth() {
            return None;
        }
        Some(&self.buf[self.sp..self.sp + n])
    }

    pub fn push_u64(&mut self, value: u64) -> SchedResult<()> {
        self.push(&value.to_ne_bytes())
    }

    pub fn pop_u64(&mut self) -> Option<u64> {
        let bytes = self.peek(8)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(bytes);
        self.sp += 8;
        Some(u64::from_ne_bytes(word))
    }

    /// Drop every live byte
    #[inline]
    pub fn clear(&mut self) {
        self.sp = self.buf.len();
    }

    /// Replace the live portion with `saved`
    pub(crate) fn restore(&mut self, saved: &[u8]) -> SchedResult<()> {
        if saved.len() > self.buf.len() {
            return Err(SchedError::StackOverflow {
                requested: saved.len(),
                available: self.buf.len(),
            });
        }
        self.sp = self.buf.len() - saved.len();
        self.buf[self.sp..].copy_from_slice(saved);
        Ok(())
    }
}

impl std::fmt::Debug for StackBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackBuffer")
            .field("capacity", &self.capacity())
            .field("depth", &self.depth())
            .finish()
    }
}

/// Live bytes of a copy-stack task between steps
#[derive(Debug, Default)]
pub(crate) struct SavedStack {
    bytes: Vec<u8>,
    /// Bumped on every save, so a worker can tell whether its shared
    /// buffer still holds exactly this frame
    epoch: u64,
}

/// Where a task's frame lives
#[derive(Debug)]
pub(crate) enum TaskStack {
    /// Owned region, used in place
    Dedicated(StackBuffer),
    /// Copied into the worker's shared region for each step
    Copied(SavedStack),
    /// Task finished; memory returned
    Released,
}

/// A worker's shared stack region for copy-stack tasks
///
/// Owned by the worker thread; at most one task's frame occupies it.
pub(crate) struct SharedStack {
    stack: StackBuffer,
    occupant: Option<(TaskId, u64)>,
}

impl SharedStack {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            stack: StackBuffer::new(size),
            occupant: None,
        }
    }

    /// Make `saved` the live frame. Returns the number of bytes copied,
    /// zero when the buffer already holds this exact frame.
    pub(crate) fn load(&mut self, task: TaskId, saved: &SavedStack) -> SchedResult<usize> {
        if self.occupant == Some((task, saved.epoch)) {
            return Ok(0);
        }
        self.stack.restore(&saved.bytes)?;
        self.occupant = Some((task, saved.epoch));
        Ok(saved.bytes.len())
    }

    /// Copy the live frame out into `saved`. Returns the bytes copied.
    pub(crate) fn save(&mut self, task: TaskId, saved: &mut SavedStack) -> usize {
        saved.bytes.clear();
        saved.bytes.extend_from_slice(self.stack.live());
        saved.epoch += 1;
        self.occupant = Some((task, saved.epoch));
        saved.bytes.len()
    }

    /// Forget `task`'s frame once it has finished
    pub(crate) fn release(&mut self, task: TaskId) {
        if matches!(self.occupant, Some((id, _)) if id == task) {
            self.occupant = None;
            self.stack.clear();
        }
    }

    #[inline]
    pub(crate) fn buffer(&mut self) -> &mut StackBuffer {
        &mut self.stack
    }

    #[cfg(test)]
    pub(crate) fn occupant(&self) -> Option<TaskId> {
        self.occupant.map(|(id, _)| id)
    }
}
