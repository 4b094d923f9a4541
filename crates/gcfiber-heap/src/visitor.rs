//! Object references and the tracing visitor

use crate::header::ObjectHeader;
use std::fmt;
use std::mem::size_of;
use std::ptr::NonNull;

/// Untyped reference to a heap object (points at the payload)
///
/// Copying an `ObjectRef` does not keep the object alive: only objects
/// reachable from a root source survive a collection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(NonNull<u8>);

// Objects are plain memory; synchronisation of their contents is the
// mutator's business, and the collector only runs at a safepoint.
unsafe impl Send for ObjectRef {}
unsafe impl Sync for ObjectRef {}

impl ObjectRef {
    #[inline]
    pub(crate) fn from_non_null(ptr: NonNull<u8>) -> Self {
        ObjectRef(ptr)
    }

    /// Rebuild a reference from a payload address.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a payload address returned by the heap.
    #[inline]
    pub unsafe fn from_raw(ptr: *mut u8) -> Option<Self> {
        NonNull::new(ptr).map(ObjectRef)
    }

    #[inline]
    pub fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr()
    }

    #[inline]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    /// # Safety
    ///
    /// The object must still be live.
    #[inline]
    pub(crate) unsafe fn header<'a>(self) -> &'a ObjectHeader {
        ObjectHeader::from_payload(self.0.as_ptr())
    }

    /// Requested payload size.
    ///
    /// # Safety
    ///
    /// The object must still be live.
    #[inline]
    pub unsafe fn size(self) -> usize {
        self.header().size()
    }

    /// Read reference slot `slot` (the `slot`-th payload word).
    ///
    /// # Safety
    ///
    /// The object must be live and its payload must hold at least
    /// `slot + 1` words.
    #[inline]
    pub unsafe fn get_ref(self, slot: usize) -> Option<ObjectRef> {
        let word = self.0.as_ptr().add(slot * size_of::<usize>()).cast::<*mut u8>();
        ObjectRef::from_raw(word.read())
    }

    /// Store `value` into reference slot `slot`.
    ///
    /// # Safety
    ///
    /// Same as [`ObjectRef::get_ref`]; the caller must also not race with a
    /// collection.
    #[inline]
    pub unsafe fn set_ref(self, slot: usize, value: Option<ObjectRef>) {
        let word = self.0.as_ptr().add(slot * size_of::<usize>()).cast::<*mut u8>();
        word.write(value.map_or(std::ptr::null_mut(), ObjectRef::as_ptr));
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({:p})", self.0)
    }
}

/// Receives every reference reported during a trace
pub(crate) trait Tracer {
    fn visit(&mut self, obj: ObjectRef);
}

/// Handed to root sources and object layouts to report references
pub struct Visitor<'a> {
    tracer: &'a mut dyn Tracer,
}

impl<'a> Visitor<'a> {
    pub(crate) fn new(tracer: &'a mut dyn Tracer) -> Self {
        Self { tracer }
    }

    /// Report a reference
    #[inline]
    pub fn visit(&mut self, obj: ObjectRef) {
        self.tracer.visit(obj);
    }

    /// Report a reference that may be null
    #[inline]
    pub fn visit_opt(&mut self, obj: Option<ObjectRef>) {
        if let Some(obj) = obj {
            self.tracer.visit(obj);
        }
    }

    /// Report every reference in `objs`
    pub fn visit_all<I: IntoIterator<Item = ObjectRef>>(&mut self, objs: I) {
        for obj in objs {
            self.tracer.visit(obj);
        }
    }
}
