//! A component manager that records which lifecycle hooks ran.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use kindle_core::{
    combine, Arguments, Bounds, ComponentDefinition, ComponentInstance, ComponentManager,
    Destructor, DynamicScope, ElementOperations, LifecycleViolationError, MutableCell, NodeId,
    PathRef, Program, RecordReference, Tag, Value,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Hook {
    Create,
    DidCreateElement,
    DidRenderLayout,
    DidUpdateLayout,
    Update,
    Destroy,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Hook::Create => "create",
            Hook::DidCreateElement => "did_create_element",
            Hook::DidRenderLayout => "did_render_layout",
            Hook::DidUpdateLayout => "did_update_layout",
            Hook::Update => "update",
            Hook::Destroy => "destroy",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HookCall {
    pub component: String,
    pub hook: Hook,
}

impl fmt::Display for HookCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.component, self.hook)
    }
}

/// Shared, append-only record of hook calls. Clones observe the same log.
#[derive(Clone, Default)]
pub struct HookLog {
    calls: Rc<RefCell<Vec<HookCall>>>,
}

impl HookLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, component: &str, hook: Hook) {
        self.calls.borrow_mut().push(HookCall {
            component: component.to_owned(),
            hook,
        });
    }

    pub fn calls(&self) -> Vec<HookCall> {
        self.calls.borrow().clone()
    }

    /// Hooks that ran for `component`, in call order.
    pub fn hooks_for(&self, component: &str) -> Vec<Hook> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.component == component)
            .map(|call| call.hook)
            .collect()
    }

    pub fn count(&self, component: &str, hook: Hook) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.component == component && call.hook == hook)
            .count()
    }

    pub fn ran(&self, component: &str, hook: Hook) -> bool {
        self.count(component, hook) > 0
    }

    pub fn len(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
    }
}

impl fmt::Debug for HookLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.calls.borrow().iter().map(ToString::to_string))
            .finish()
    }
}

/// Per-instance data of a [`RecordingManager`] component.
pub struct RecordingInstance {
    component: String,
    self_ref: PathRef,
    state: Vec<(String, MutableCell<Value>)>,
    state_tag: Tag,
}

impl RecordingInstance {
    /// The recording data behind `instance`. Fails once the instance is destroyed.
    pub fn of(
        instance: &ComponentInstance,
    ) -> Result<&RecordingInstance, LifecycleViolationError> {
        instance.downcast::<RecordingInstance>()
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    /// The record the layout renders against: named arguments, then state cells.
    pub fn self_ref(&self) -> PathRef {
        Rc::clone(&self.self_ref)
    }

    /// A state cell owned by this instance. Destroyed with the instance.
    pub fn state(&self, name: &str) -> Option<&MutableCell<Value>> {
        self.state
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, cell)| cell)
    }
}

/// Component manager whose hooks append to a [`HookLog`].
///
/// Each instance owns one fresh cell per configured state field; the cells are
/// exposed to the layout through the instance's `self` record and destroyed by
/// the instance's destructor.
pub struct RecordingManager {
    log: HookLog,
    layout: Program,
    state: Vec<(String, Value)>,
    track_state: bool,
    element_attributes: Vec<(String, Value)>,
    failing: Option<Hook>,
}

impl RecordingManager {
    pub fn new(log: &HookLog, layout: Program) -> Self {
        Self {
            log: log.clone(),
            layout,
            state: Vec::new(),
            track_state: false,
            element_attributes: Vec::new(),
            failing: None,
        }
    }

    pub fn with_state(mut self, name: &str, initial: impl Into<Value>) -> Self {
        self.state.push((name.to_owned(), initial.into()));
        self
    }

    /// Reports the state cells through `get_tag`, so writes to them re-run `update`.
    pub fn tracking_state(mut self) -> Self {
        self.track_state = true;
        self
    }

    /// Static attribute written onto the wrapper element in `did_create_element`.
    pub fn with_element_attribute(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.element_attributes.push((name.to_owned(), value.into()));
        self
    }

    /// Makes `hook` return an error after recording the call.
    pub fn failing_at(mut self, hook: Hook) -> Self {
        self.failing = Some(hook);
        self
    }

    pub fn into_definition(self, name: &str) -> ComponentDefinition {
        ComponentDefinition::new(name, Rc::new(self))
    }

    fn record(&self, component: &str, hook: Hook) -> anyhow::Result<()> {
        self.log.record(component, hook);
        if self.failing == Some(hook) {
            anyhow::bail!("`{component}` refused {hook}");
        }
        Ok(())
    }

    fn recorded(&self, instance: &ComponentInstance, hook: Hook) -> anyhow::Result<()> {
        let data = RecordingInstance::of(instance)?;
        self.record(&data.component, hook)
    }
}

impl ComponentManager for RecordingManager {
    fn create(
        &self,
        definition: &ComponentDefinition,
        args: &Arguments,
        _dynamic_scope: &DynamicScope,
        _caller: &PathRef,
        _has_default_block: bool,
    ) -> anyhow::Result<ComponentInstance> {
        let component = definition.name().to_owned();
        self.record(&component, Hook::Create)?;

        let state: Vec<(String, MutableCell<Value>)> = self
            .state
            .iter()
            .map(|(name, initial)| (name.clone(), MutableCell::new(initial.clone())))
            .collect();
        let state_tag = combine(state.iter().map(|(_, cell)| cell.tag()));
        let record = args.names().fold(RecordReference::new(), |record, name| {
            record.field(name, args.get(name))
        });
        let self_ref = state
            .iter()
            .fold(record, |record, (name, cell)| {
                record.field(name, cell.reference())
            })
            .into_ref();

        Ok(ComponentInstance::new(RecordingInstance {
            component,
            self_ref,
            state,
            state_tag,
        }))
    }

    fn get_self(&self, instance: &ComponentInstance) -> anyhow::Result<PathRef> {
        Ok(RecordingInstance::of(instance)?.self_ref())
    }

    fn layout_for(
        &self,
        _definition: &ComponentDefinition,
        _instance: &ComponentInstance,
    ) -> anyhow::Result<Program> {
        Ok(self.layout.clone())
    }

    fn did_create_element(
        &self,
        instance: &ComponentInstance,
        _element: NodeId,
        operations: &mut ElementOperations,
    ) -> anyhow::Result<()> {
        self.recorded(instance, Hook::DidCreateElement)?;
        for (name, value) in &self.element_attributes {
            operations.set_static(name, value.clone());
        }
        Ok(())
    }

    fn did_render_layout(
        &self,
        instance: &ComponentInstance,
        bounds: &Bounds,
    ) -> anyhow::Result<()> {
        log::debug!("{} rendered {} nodes", instance.id(), bounds.nodes().len());
        self.recorded(instance, Hook::DidRenderLayout)
    }

    fn did_update_layout(
        &self,
        instance: &ComponentInstance,
        _bounds: &Bounds,
    ) -> anyhow::Result<()> {
        self.recorded(instance, Hook::DidUpdateLayout)
    }

    fn get_tag(&self, instance: &ComponentInstance) -> Option<Tag> {
        if !self.track_state {
            return None;
        }
        RecordingInstance::of(instance)
            .ok()
            .map(|data| data.state_tag.clone())
    }

    fn update(
        &self,
        instance: &ComponentInstance,
        _dynamic_scope: &DynamicScope,
    ) -> anyhow::Result<()> {
        self.recorded(instance, Hook::Update)
    }

    fn get_destructor(&self, instance: &ComponentInstance) -> Option<Box<dyn Destructor>> {
        let data = RecordingInstance::of(instance).ok()?;
        let log = self.log.clone();
        let component = data.component.clone();
        let cells: Vec<MutableCell<Value>> =
            data.state.iter().map(|(_, cell)| cell.clone()).collect();
        Some(Box::new(move || {
            for cell in &cells {
                cell.destroy();
            }
            log.record(&component, Hook::Destroy);
        }))
    }
}
