use std::rc::Rc;

use crate::error::StaleReferenceError;
use crate::reference::{PathReference, Reference};
use crate::revision::Revision;
use crate::tag::Tag;
use crate::value::Value;

/// Outcome of [`ReferenceCache::revalidate`].
#[derive(Debug, Clone, PartialEq)]
pub enum Validation<T> {
    Unchanged,
    Changed(T),
}

/// Memoizes a reactive reference against its tag.
///
/// The cache stores the tag value observed at the last compute. It recomputes
/// only when the tag moved past that revision or after [`invalidate`](Self::invalidate).
/// A recomputed value equal to the cached one reports [`Validation::Unchanged`].
pub struct ReferenceCache<T, R: ?Sized + Reference<T> = dyn Reference<T>> {
    reference: Rc<R>,
    last_value: T,
    last_revision: Revision,
    dirty: bool,
}

pub type ValueCache = ReferenceCache<Value, dyn PathReference>;

impl<T, R> ReferenceCache<T, R>
where
    T: Clone + PartialEq,
    R: Reference<T> + ?Sized,
{
    pub fn new(reference: Rc<R>) -> Result<Self, StaleReferenceError> {
        // Snapshot before computing so a write racing the compute is seen next time.
        let last_revision = reference.tag().value();
        let last_value = reference.value()?;
        Ok(Self {
            reference,
            last_value,
            last_revision,
            dirty: false,
        })
    }

    /// The last computed value. Does not consult the tag.
    pub fn peek(&self) -> &T {
        &self.last_value
    }

    pub fn reference(&self) -> &Rc<R> {
        &self.reference
    }

    pub fn tag(&self) -> Tag {
        self.reference.tag()
    }

    /// Tag value observed at the last compute.
    pub fn revision(&self) -> Revision {
        self.last_revision
    }

    pub fn is_valid(&self) -> bool {
        !self.dirty && self.reference.tag().validate(self.last_revision)
    }

    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    pub fn revalidate(&mut self) -> Result<Validation<T>, StaleReferenceError> {
        if self.is_valid() {
            return Ok(Validation::Unchanged);
        }
        let revision = self.reference.tag().value();
        let value = self.reference.value()?;
        self.last_revision = revision;
        self.dirty = false;
        if value == self.last_value {
            return Ok(Validation::Unchanged);
        }
        self.last_value = value.clone();
        Ok(Validation::Changed(value))
    }

    /// Revalidates and returns the current value.
    pub fn value(&mut self) -> Result<&T, StaleReferenceError> {
        self.revalidate()?;
        Ok(&self.last_value)
    }
}
