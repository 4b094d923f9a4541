//! Object-layout introspection
//!
//! The collector knows nothing about what objects contain. Each object names
//! a registered [`ObjectLayout`] in its header, and the layout reports the
//! references held by an object of that shape.

use crate::visitor::{ObjectRef, Visitor};
use std::mem::size_of;

/// Index of a registered layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayoutId(u16);

impl LayoutId {
    /// Objects without outgoing references. Always registered.
    pub const LEAF: LayoutId = LayoutId(0);

    #[inline]
    pub(crate) const fn from_u16(id: u16) -> Self {
        LayoutId(id)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Describes where an object keeps its references.
///
/// `trace` runs during marking with every mutator stopped; it must only read
/// the object and report children to the visitor.
pub trait ObjectLayout: Send + Sync {
    /// Report every reference held by `obj`
    fn trace(&self, obj: ObjectRef, visitor: &mut Visitor<'_>);

    /// Smallest payload an object of this layout may have
    fn min_size(&self) -> usize {
        0
    }
}

/// Layout of objects that hold no references
#[derive(Debug, Clone, Copy, Default)]
pub struct Leaf;

impl ObjectLayout for Leaf {
    fn trace(&self, _obj: ObjectRef, _visitor: &mut Visitor<'_>) {}
}

/// The first `n` payload words are references (null = none); the rest is data
#[derive(Debug, Clone, Copy)]
pub struct RefSlots(pub usize);

impl ObjectLayout for RefSlots {
    fn trace(&self, obj: ObjectRef, visitor: &mut Visitor<'_>) {
        for slot in 0..self.0 {
            // SAFETY: allocation rounds the payload up to `min_size`.
            visitor.visit_opt(unsafe { obj.get_ref(slot) });
        }
    }

    fn min_size(&self) -> usize {
        self.0 * size_of::<usize>()
    }
}
