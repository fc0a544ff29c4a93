//! Tracked mutable cells, the only sources of change in a render tree.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::error::StaleReferenceError;
use crate::reference::CellReference;
use crate::revision::Revision;
use crate::tag::{DirtyableTag, Tag};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CellId(u64);

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

thread_local! {
    static NEXT_CELL_ID: Cell<u64> = const { Cell::new(1) };
}

fn next_cell_id() -> CellId {
    NEXT_CELL_ID.with(|next| CellId(next.replace(next.get() + 1)))
}

struct CellInner<T> {
    id: CellId,
    value: RefCell<T>,
    tag: DirtyableTag,
    destroyed: Cell<bool>,
}

/// Single-threaded mutable cell with its own dirtyable tag.
///
/// Every write goes through the revision clock. Once [`MutableCell::destroy`]
/// has run, reads and writes fail with [`StaleReferenceError`].
pub struct MutableCell<T> {
    inner: Rc<CellInner<T>>,
}

impl<T> Clone for MutableCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> MutableCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(CellInner {
                id: next_cell_id(),
                value: RefCell::new(value),
                tag: DirtyableTag::new(),
                destroyed: Cell::new(false),
            }),
        }
    }

    pub fn id(&self) -> CellId {
        self.inner.id
    }

    pub fn tag(&self) -> Tag {
        Tag::Dirtyable(self.inner.tag.clone())
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// Destroys the cell. Dependents are dirtied so the next revalidation
    /// observes the stale read instead of silently keeping an old value.
    pub fn destroy(&self) {
        if !self.inner.destroyed.replace(true) {
            self.inner.tag.dirty();
        }
    }

    fn ensure_live(&self) -> Result<(), StaleReferenceError> {
        if self.is_destroyed() {
            return Err(StaleReferenceError { cell: self.id() });
        }
        Ok(())
    }

    /// Run `f` with a shared borrow of the stored value.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, StaleReferenceError> {
        self.ensure_live()?;
        let borrow = self.inner.value.borrow();
        Ok(f(&borrow))
    }

    pub fn set(&self, value: T) -> Result<Revision, StaleReferenceError> {
        self.ensure_live()?;
        *self.inner.value.borrow_mut() = value;
        Ok(self.inner.tag.dirty())
    }

    /// Mutate the stored value in place. Always counts as a write.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, StaleReferenceError> {
        self.ensure_live()?;
        let result = {
            let mut borrow = self.inner.value.borrow_mut();
            f(&mut borrow)
        };
        self.inner.tag.dirty();
        Ok(result)
    }
}

impl<T: Clone> MutableCell<T> {
    pub fn get(&self) -> Result<T, StaleReferenceError> {
        self.with(T::clone)
    }
}

impl<T: Clone + 'static> MutableCell<T> {
    pub fn reference(&self) -> Rc<CellReference<T>> {
        Rc::new(CellReference::new(self.clone()))
    }
}

impl<T: fmt::Debug> fmt::Debug for MutableCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("MutableCell");
        debug.field("id", &self.inner.id);
        if self.is_destroyed() {
            debug.field("destroyed", &true);
        } else {
            debug.field("value", &*self.inner.value.borrow());
        }
        debug.field("revision", &self.inner.tag.value()).finish()
    }
}
