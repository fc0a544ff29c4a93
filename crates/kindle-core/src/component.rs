//! Component definitions, managers and the per-invocation lifecycle state.

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::collections::map::HashMap;
use crate::error::LifecycleViolationError;
use crate::host::NodeId;
use crate::program::Program;
use crate::reference::{self, PathRef, RecordReference};
use crate::tag::{self, Tag};
use crate::value::Value;
use crate::vm::Bounds;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

thread_local! {
    static NEXT_INSTANCE_ID: Cell<u64> = const { Cell::new(1) };
}

struct InstanceInner {
    id: InstanceId,
    data: Box<dyn Any>,
    destroyed: Cell<bool>,
}

/// A live component instance: manager-defined data plus a liveness flag.
///
/// Clones share the instance. Once destroyed, every access through
/// [`downcast`](Self::downcast) fails with `UseAfterDestroy`.
#[derive(Clone)]
pub struct ComponentInstance {
    inner: Rc<InstanceInner>,
}

impl ComponentInstance {
    pub fn new<T: Any>(data: T) -> Self {
        let id = NEXT_INSTANCE_ID.with(|next| InstanceId(next.replace(next.get() + 1)));
        Self {
            inner: Rc::new(InstanceInner {
                id,
                data: Box::new(data),
                destroyed: Cell::new(false),
            }),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.inner.id
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    pub fn ensure_live(&self) -> Result<(), LifecycleViolationError> {
        if self.is_destroyed() {
            return Err(LifecycleViolationError::UseAfterDestroy {
                instance: self.id(),
            });
        }
        Ok(())
    }

    pub fn downcast<T: Any>(&self) -> Result<&T, LifecycleViolationError> {
        self.ensure_live()?;
        self.inner
            .data
            .downcast_ref::<T>()
            .ok_or(LifecycleViolationError::InstanceTypeMismatch {
                instance: self.id(),
                expected: std::any::type_name::<T>(),
            })
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn mark_destroyed(&self) {
        self.inner.destroyed.set(true);
    }
}

impl fmt::Debug for ComponentInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInstance")
            .field("id", &self.inner.id)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// Teardown work registered by a manager at creation time.
pub trait Destructor {
    fn destroy(self: Box<Self>);
}

impl<F: FnOnce()> Destructor for F {
    fn destroy(self: Box<Self>) {
        (*self)()
    }
}

/// Lifecycle hooks for one kind of component.
///
/// Hooks that can fail return `anyhow::Result`; the VM wraps the error in
/// [`VmError::ManagerFailure`](crate::error::VmError::ManagerFailure) and
/// aborts the pass.
pub trait ComponentManager {
    fn create(
        &self,
        definition: &ComponentDefinition,
        args: &Arguments,
        dynamic_scope: &DynamicScope,
        caller: &PathRef,
        has_default_block: bool,
    ) -> anyhow::Result<ComponentInstance>;

    /// The `self` reference the layout renders against.
    fn get_self(&self, instance: &ComponentInstance) -> anyhow::Result<PathRef>;

    fn layout_for(
        &self,
        definition: &ComponentDefinition,
        instance: &ComponentInstance,
    ) -> anyhow::Result<Program>;

    /// Runs once, while the wrapper element is still under construction.
    fn did_create_element(
        &self,
        _instance: &ComponentInstance,
        _element: NodeId,
        _operations: &mut ElementOperations,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn did_render_layout(
        &self,
        _instance: &ComponentInstance,
        _bounds: &Bounds,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn did_update_layout(
        &self,
        _instance: &ComponentInstance,
        _bounds: &Bounds,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Tag covering state the instance reads outside its arguments.
    fn get_tag(&self, _instance: &ComponentInstance) -> Option<Tag> {
        None
    }

    fn update(
        &self,
        _instance: &ComponentInstance,
        _dynamic_scope: &DynamicScope,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn get_destructor(&self, _instance: &ComponentInstance) -> Option<Box<dyn Destructor>> {
        None
    }
}

struct DefinitionInner {
    name: Rc<str>,
    manager: Rc<dyn ComponentManager>,
}

/// What kind of component to render. Compared by identity.
#[derive(Clone)]
pub struct ComponentDefinition {
    inner: Rc<DefinitionInner>,
}

impl ComponentDefinition {
    pub fn new(name: &str, manager: Rc<dyn ComponentManager>) -> Self {
        Self {
            inner: Rc::new(DefinitionInner {
                name: Rc::from(name),
                manager,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn manager(&self) -> &Rc<dyn ComponentManager> {
        &self.inner.manager
    }
}

impl PartialEq for ComponentDefinition {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ComponentDefinition {}

impl fmt::Debug for ComponentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ComponentDefinition")
            .field(&self.inner.name)
            .finish()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LifecyclePhase {
    Defined,
    StateBound,
    Created,
    ElementAttached,
    LayoutResolved,
    Rendered,
    Destroyed,
}

impl LifecyclePhase {
    pub fn can_advance_to(self, next: LifecyclePhase) -> bool {
        use LifecyclePhase::*;
        matches!(
            (self, next),
            (Defined, StateBound)
                | (StateBound, Created)
                | (Created, ElementAttached)
                | (Created | ElementAttached, LayoutResolved)
                | (LayoutResolved, Rendered)
        ) || (next == Destroyed && self != Destroyed)
    }
}

/// The {definition, manager, instance} triple owned by one local slot.
pub struct ComponentState {
    definition: ComponentDefinition,
    manager: Rc<dyn ComponentManager>,
    instance: Option<ComponentInstance>,
    phase: LifecyclePhase,
    args_tag: Tag,
    dynamic_scope: DynamicScope,
}

impl ComponentState {
    pub fn new(definition: ComponentDefinition, manager: Rc<dyn ComponentManager>) -> Self {
        Self {
            definition,
            manager,
            instance: None,
            phase: LifecyclePhase::Defined,
            args_tag: Tag::CONSTANT,
            dynamic_scope: DynamicScope::new(),
        }
    }

    pub fn definition(&self) -> &ComponentDefinition {
        &self.definition
    }

    pub fn manager(&self) -> &Rc<dyn ComponentManager> {
        &self.manager
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    pub fn args_tag(&self) -> &Tag {
        &self.args_tag
    }

    pub fn dynamic_scope(&self) -> &DynamicScope {
        &self.dynamic_scope
    }

    pub fn advance(&mut self, next: LifecyclePhase) -> Result<(), LifecycleViolationError> {
        if !self.phase.can_advance_to(next) {
            return Err(LifecycleViolationError::InvalidTransition {
                component: self.definition.name().to_owned(),
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }

    /// Records the freshly created instance. Valid exactly once.
    pub fn set_instance(
        &mut self,
        instance: ComponentInstance,
        args_tag: Tag,
        dynamic_scope: DynamicScope,
    ) -> Result<(), LifecycleViolationError> {
        if self.instance.is_some() {
            return Err(LifecycleViolationError::AlreadyCreated {
                component: self.definition.name().to_owned(),
            });
        }
        self.advance(LifecyclePhase::Created)?;
        self.instance = Some(instance);
        self.args_tag = args_tag;
        self.dynamic_scope = dynamic_scope;
        Ok(())
    }

    pub fn instance(&self) -> Result<&ComponentInstance, LifecycleViolationError> {
        let instance = self
            .instance
            .as_ref()
            .ok_or_else(|| LifecycleViolationError::NotCreated {
                component: self.definition.name().to_owned(),
            })?;
        instance.ensure_live()?;
        Ok(instance)
    }
}

impl fmt::Debug for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentState")
            .field("definition", &self.definition)
            .field("instance", &self.instance)
            .field("phase", &self.phase)
            .finish()
    }
}

/// Evaluated argument references handed to [`ComponentManager::create`].
#[derive(Clone, Default)]
pub struct Arguments {
    positional: SmallVec<[PathRef; 4]>,
    named: IndexMap<Rc<str>, PathRef>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_positional(mut self, reference: PathRef) -> Self {
        self.positional.push(reference);
        self
    }

    pub fn with_named(mut self, name: &str, reference: PathRef) -> Self {
        self.named.insert(Rc::from(name), reference);
        self
    }

    pub(crate) fn from_parts(
        positional: SmallVec<[PathRef; 4]>,
        named: IndexMap<Rc<str>, PathRef>,
    ) -> Self {
        Self { positional, named }
    }

    pub fn positional(&self, index: usize) -> Option<&PathRef> {
        self.positional.get(index)
    }

    pub fn named(&self, name: &str) -> Option<&PathRef> {
        self.named.get(name)
    }

    /// Named argument, or an undefined reference when absent.
    pub fn get(&self, name: &str) -> PathRef {
        self.named.get(name).cloned().unwrap_or_else(reference::undefined)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.named.keys().map(|name| &**name)
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.named.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Changes whenever any argument does.
    pub fn tag(&self) -> Tag {
        tag::combine(
            self.positional
                .iter()
                .chain(self.named.values())
                .map(|reference| reference.tag()),
        )
    }

    /// Named arguments as a navigable record.
    pub fn to_record(&self) -> PathRef {
        self.named
            .iter()
            .fold(RecordReference::new(), |record, (name, reference)| {
                record.field(name, reference.clone())
            })
            .into_ref()
    }
}

impl fmt::Debug for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arguments")
            .field("positional", &self.positional.len())
            .field("named", &self.named.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Name-keyed references visible to every component below a binding point.
#[derive(Clone, Default)]
pub struct DynamicScope {
    bindings: Rc<HashMap<Rc<str>, PathRef>>,
}

impl DynamicScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> PathRef {
        self.bindings
            .get(name)
            .cloned()
            .unwrap_or_else(reference::undefined)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// A child scope with `bindings` layered over this one.
    pub fn child(&self, bindings: impl IntoIterator<Item = (Rc<str>, PathRef)>) -> Self {
        let mut merged = (*self.bindings).clone();
        merged.extend(bindings);
        Self {
            bindings: Rc::new(merged),
        }
    }
}

impl fmt::Debug for DynamicScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.bindings.keys()).finish()
    }
}

/// Attribute writes for an element under construction. Later writes to the
/// same name replace earlier ones but keep the first write's position.
#[derive(Default)]
pub struct ElementOperations {
    attributes: IndexMap<Rc<str>, PathRef>,
}

impl ElementOperations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_attribute(&mut self, name: &str, reference: PathRef) {
        self.attributes.insert(Rc::from(name), reference);
    }

    pub fn set_static(&mut self, name: &str, value: impl Into<Value>) {
        self.set_attribute(name, reference::constant(value));
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = (Rc<str>, PathRef)> + '_ {
        self.attributes.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::MutableCell;

    struct Inert;

    impl ComponentManager for Inert {
        fn create(
            &self,
            _definition: &ComponentDefinition,
            _args: &Arguments,
            _dynamic_scope: &DynamicScope,
            _caller: &PathRef,
            _has_default_block: bool,
        ) -> anyhow::Result<ComponentInstance> {
            Ok(ComponentInstance::new(()))
        }

        fn get_self(&self, _instance: &ComponentInstance) -> anyhow::Result<PathRef> {
            Ok(reference::undefined())
        }

        fn layout_for(
            &self,
            _definition: &ComponentDefinition,
            _instance: &ComponentInstance,
        ) -> anyhow::Result<Program> {
            Ok(crate::program::ProgramBuilder::new().build())
        }
    }

    fn state() -> ComponentState {
        let manager: Rc<dyn ComponentManager> = Rc::new(Inert);
        let mut state =
            ComponentState::new(ComponentDefinition::new("inert", manager.clone()), manager);
        assert_eq!(state.phase(), LifecyclePhase::Defined);
        state.advance(LifecyclePhase::StateBound).unwrap();
        state
    }

    #[test]
    fn instances_are_assigned_once() {
        let mut state = state();
        assert!(matches!(
            state.instance(),
            Err(LifecycleViolationError::NotCreated { .. })
        ));

        state
            .set_instance(ComponentInstance::new(1_u8), Tag::CONSTANT, DynamicScope::new())
            .unwrap();
        assert_eq!(state.phase(), LifecyclePhase::Created);

        let again = state.set_instance(
            ComponentInstance::new(2_u8),
            Tag::CONSTANT,
            DynamicScope::new(),
        );
        assert!(matches!(
            again,
            Err(LifecycleViolationError::AlreadyCreated { .. })
        ));
        assert_eq!(*state.instance().unwrap().downcast::<u8>().unwrap(), 1);
    }

    #[test]
    fn transitions_are_checked() {
        let mut state = state();
        let error = state.advance(LifecyclePhase::Rendered).unwrap_err();
        assert_eq!(
            error,
            LifecycleViolationError::InvalidTransition {
                component: "inert".into(),
                from: LifecyclePhase::StateBound,
                to: LifecyclePhase::Rendered,
            }
        );

        state.advance(LifecyclePhase::Destroyed).unwrap();
        assert!(state.advance(LifecyclePhase::Destroyed).is_err());
        assert!(state.advance(LifecyclePhase::Created).is_err());
    }

    #[test]
    fn element_attachment_is_optional() {
        assert!(LifecyclePhase::Created.can_advance_to(LifecyclePhase::LayoutResolved));
        assert!(LifecyclePhase::ElementAttached.can_advance_to(LifecyclePhase::LayoutResolved));
        assert!(!LifecyclePhase::ElementAttached.can_advance_to(LifecyclePhase::ElementAttached));
    }

    #[test]
    fn destroyed_instances_reject_access() {
        let instance = ComponentInstance::new("data");
        instance.mark_destroyed();
        assert_eq!(
            instance.downcast::<&str>().unwrap_err(),
            LifecycleViolationError::UseAfterDestroy {
                instance: instance.id()
            }
        );
    }

    #[test]
    fn downcast_reports_the_expected_type() {
        let instance = ComponentInstance::new(7_i32);
        assert!(matches!(
            instance.downcast::<String>(),
            Err(LifecycleViolationError::InstanceTypeMismatch { .. })
        ));
    }

    #[test]
    fn argument_tags_track_every_argument() {
        let color = MutableCell::new(Value::from("red"));
        let args = Arguments::new()
            .with_positional(reference::constant(1))
            .with_named("color", color.reference());
        let snapshot = args.tag().value();
        assert_eq!(args.len(), 2);

        color.set(Value::from("blue")).unwrap();
        assert!(!args.tag().validate(snapshot));
        assert_eq!(
            args.to_record().get("color").value().unwrap(),
            Value::from("blue")
        );
        assert_eq!(args.get("missing").value().unwrap(), Value::Undefined);
    }

    #[test]
    fn child_scopes_shadow_their_parent() {
        let parent = DynamicScope::new().child([(Rc::from("theme"), reference::constant("dark"))]);
        let child = parent.child([(Rc::from("theme"), reference::constant("light"))]);
        assert_eq!(parent.get("theme").value().unwrap(), Value::from("dark"));
        assert_eq!(child.get("theme").value().unwrap(), Value::from("light"));
        assert!(!child.contains("locale"));
    }

    #[test]
    fn later_attribute_writes_win() {
        let mut operations = ElementOperations::new();
        operations.set_static("class", "a");
        operations.set_static("id", "x");
        operations.set_static("class", "b");
        let written: Vec<_> = operations
            .drain()
            .map(|(name, reference)| (name.to_string(), reference.value().unwrap()))
            .collect();
        assert_eq!(
            written,
            vec![
                ("class".to_string(), Value::from("b")),
                ("id".to_string(), Value::from("x")),
            ]
        );
    }

    #[test]
    fn closures_are_destructors() {
        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        let destructor: Box<dyn Destructor> = Box::new(move || flag.set(true));
        destructor.destroy();
        assert!(ran.get());
    }
}
