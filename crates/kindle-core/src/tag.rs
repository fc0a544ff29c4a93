//! Revision tags.
//!
//! A [`Tag`] answers one question: "at which revision did this value, or
//! anything it was derived from, last change?". Tags are pulled, never pushed:
//! a consumer remembers the revision it last validated against and compares it
//! with [`Tag::value`] later on.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::revision::{self, Revision};

/// A tag bound to one mutable cell.
///
/// Cloning shares the underlying revision, so every clone observes
/// [`DirtyableTag::dirty`] calls made through any other clone.
#[derive(Clone)]
pub struct DirtyableTag {
    revision: Rc<Cell<Revision>>,
}

impl DirtyableTag {
    pub fn new() -> Self {
        Self {
            revision: Rc::new(Cell::new(revision::current())),
        }
    }

    /// Revision of the last write to the bound cell.
    pub fn value(&self) -> Revision {
        self.revision.get()
    }

    /// Records a write: allocates a fresh revision and stores it.
    pub fn dirty(&self) -> Revision {
        let next = revision::bump();
        self.revision.set(next);
        next
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.revision, &other.revision)
    }
}

impl Default for DirtyableTag {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DirtyableTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DirtyableTag").field(&self.value()).finish()
    }
}

/// Change-tracking capability carried by every reference and updating opcode.
#[derive(Clone, Debug, Default)]
pub enum Tag {
    /// Never changes; always reports [`Revision::CONSTANT`].
    #[default]
    Constant,
    /// Reports the last-write revision of one cell.
    Dirtyable(DirtyableTag),
    /// Reports the maximum of its children, evaluated on every read.
    Combinator(Rc<[Tag]>),
}

impl Tag {
    pub const CONSTANT: Tag = Tag::Constant;

    pub fn value(&self) -> Revision {
        match self {
            Tag::Constant => Revision::CONSTANT,
            Tag::Dirtyable(tag) => tag.value(),
            Tag::Combinator(children) => children
                .iter()
                .map(Tag::value)
                .max()
                .unwrap_or(Revision::CONSTANT),
        }
    }

    /// Returns `true` when nothing behind this tag changed after `snapshot`.
    pub fn validate(&self, snapshot: Revision) -> bool {
        self.value() <= snapshot
    }

    /// Returns `true` when this tag can never report a change.
    ///
    /// Consumers use this to skip caches and updating opcodes entirely.
    pub fn is_const(&self) -> bool {
        match self {
            Tag::Constant => true,
            Tag::Dirtyable(_) => false,
            Tag::Combinator(children) => children.iter().all(Tag::is_const),
        }
    }
}

impl From<DirtyableTag> for Tag {
    fn from(tag: DirtyableTag) -> Self {
        Tag::Dirtyable(tag)
    }
}

/// Combines tags into one that changes whenever any of them changes.
///
/// Constant operands are dropped. Zero remaining operands yield
/// [`Tag::Constant`] and a single remaining operand is returned as is.
pub fn combine<I>(tags: I) -> Tag
where
    I: IntoIterator<Item = Tag>,
{
    let mut live: SmallVec<[Tag; 4]> = tags.into_iter().filter(|tag| !tag.is_const()).collect();
    match live.len() {
        0 => Tag::Constant,
        1 => live.swap_remove(0),
        _ => Tag::Combinator(live.into_iter().collect()),
    }
}
