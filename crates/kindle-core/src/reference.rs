//! Lazily evaluated, tagged handles to values.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::cell::MutableCell;
use crate::error::StaleReferenceError;
use crate::tag::{self, Tag};
use crate::value::Value;

/// A handle producing a value together with the tag that tracks it.
///
/// `value` recomputes from the underlying state on every call. Wrap the
/// reference in a [`ReferenceCache`](crate::cache::ReferenceCache) to memoize.
pub trait Reference<T> {
    fn tag(&self) -> Tag;
    fn value(&self) -> Result<T, StaleReferenceError>;
}

/// A [`Value`] reference that can be navigated by property name.
pub trait PathReference: Reference<Value> {
    fn get(&self, _key: &str) -> PathRef {
        undefined()
    }
}

pub type PathRef = Rc<dyn PathReference>;

pub fn is_const_reference<T, R>(reference: &R) -> bool
where
    R: Reference<T> + ?Sized,
{
    reference.tag().is_const()
}

pub fn undefined() -> PathRef {
    Rc::new(ConstReference::new(Value::Undefined))
}

pub fn constant(value: impl Into<Value>) -> PathRef {
    Rc::new(ConstReference::new(value.into()))
}

/// A reference whose value never changes.
#[derive(Clone, Debug)]
pub struct ConstReference<T> {
    value: T,
}

impl<T> ConstReference<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T: Clone> Reference<T> for ConstReference<T> {
    fn tag(&self) -> Tag {
        Tag::CONSTANT
    }

    fn value(&self) -> Result<T, StaleReferenceError> {
        Ok(self.value.clone())
    }
}

impl PathReference for ConstReference<Value> {}

/// A reference reading straight through to a [`MutableCell`].
pub struct CellReference<T> {
    cell: MutableCell<T>,
}

impl<T> CellReference<T> {
    pub fn new(cell: MutableCell<T>) -> Self {
        Self { cell }
    }

    pub fn cell(&self) -> &MutableCell<T> {
        &self.cell
    }
}

impl<T: Clone> Reference<T> for CellReference<T> {
    fn tag(&self) -> Tag {
        self.cell.tag()
    }

    fn value(&self) -> Result<T, StaleReferenceError> {
        self.cell.get()
    }
}

impl PathReference for CellReference<Value> {}

type Compute<U> = Box<dyn Fn() -> Result<U, StaleReferenceError>>;

/// A value derived from another reference. Shares the source's tag.
pub struct MapReference<U> {
    tag: Tag,
    compute: Compute<U>,
}

impl<U> MapReference<U> {
    pub fn new<T, R>(source: Rc<R>, f: impl Fn(T) -> U + 'static) -> Self
    where
        T: 'static,
        U: 'static,
        R: Reference<T> + ?Sized + 'static,
    {
        let tag = source.tag();
        Self {
            tag,
            compute: Box::new(move || source.value().map(&f)),
        }
    }
}

impl<U> Reference<U> for MapReference<U> {
    fn tag(&self) -> Tag {
        self.tag.clone()
    }

    fn value(&self) -> Result<U, StaleReferenceError> {
        (self.compute)()
    }
}

impl PathReference for MapReference<Value> {}

/// Shorthand for `Rc::new(MapReference::new(source, f))` typed as a [`PathRef`].
pub fn map<T, R>(source: Rc<R>, f: impl Fn(T) -> Value + 'static) -> PathRef
where
    T: 'static,
    R: Reference<T> + ?Sized + 'static,
{
    Rc::new(MapReference::new(source, f))
}

/// Named child references, navigable with [`PathReference::get`].
///
/// Records have no scalar value of their own and read as
/// [`Value::Undefined`]. Their tag changes whenever any field's tag does.
#[derive(Default)]
pub struct RecordReference {
    fields: IndexMap<Rc<str>, PathRef>,
    tag: Tag,
}

impl RecordReference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, reference: PathRef) -> Self {
        self.fields.insert(Rc::from(name), reference);
        self.tag = tag::combine(self.fields.values().map(|field| field.tag()));
        self
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_ref(self) -> PathRef {
        Rc::new(self)
    }
}

impl Reference<Value> for RecordReference {
    fn tag(&self) -> Tag {
        self.tag.clone()
    }

    fn value(&self) -> Result<Value, StaleReferenceError> {
        Ok(Value::Undefined)
    }
}

impl PathReference for RecordReference {
    fn get(&self, key: &str) -> PathRef {
        self.fields.get(key).cloned().unwrap_or_else(undefined)
    }
}

impl fmt::Debug for RecordReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.fields.keys()).finish()
    }
}
