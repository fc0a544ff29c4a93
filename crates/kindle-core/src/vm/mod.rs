//! The append VM.
//!
//! Executes a [`Program`] once, in order, building output through the host
//! [`Environment`] and registering updating opcodes for every piece of output
//! that reads a non-constant reference. Handlers are listed in [`AppendVm::dispatch`];
//! each documents its stack effect as `pops -> pushes`.

mod component_ops;
mod elements;

use std::cell::RefCell;
use std::rc::Rc;

use crate::cache::ValueCache;
use crate::component::{
    Arguments, ComponentDefinition, ComponentInstance, ComponentManager, ComponentState,
    Destructor, DynamicScope,
};
use crate::error::{MalformedProgramError, UnbalancedRegionError, VmError};
use crate::host::{Environment, NodeId};
use crate::options::VmOptions;
use crate::program::{DefinitionRef, Op, Opcode, Program};
use crate::reference::{self, PathRef, PathReference, Reference};
use crate::revision::{self, Revision};
use crate::update::{CacheGroup, UpdateList, UpdatingOpcode};

pub use elements::Bounds;
use elements::ElementStack;

/// One slot of the evaluation stack or of a frame's locals.
pub(crate) enum StackValue {
    Reference(PathRef),
    Definition(ComponentDefinition),
    DefinitionRef(DefinitionRef),
    Manager(Rc<dyn ComponentManager>),
    Arguments(Arguments),
    Layout(Program),
    Component(Box<ComponentState>),
}

impl StackValue {
    fn kind(&self) -> &'static str {
        match self {
            StackValue::Reference(_) => "reference",
            StackValue::Definition(_) => "definition",
            StackValue::DefinitionRef(_) => "definition reference",
            StackValue::Manager(_) => "manager",
            StackValue::Arguments(_) => "arguments",
            StackValue::Layout(_) => "layout",
            StackValue::Component(_) => "component state",
        }
    }

    /// Component state is owned by exactly one slot and cannot be copied.
    fn duplicate(&self) -> Option<StackValue> {
        Some(match self {
            StackValue::Reference(reference) => StackValue::Reference(Rc::clone(reference)),
            StackValue::Definition(definition) => StackValue::Definition(definition.clone()),
            StackValue::DefinitionRef(reference) => StackValue::DefinitionRef(Rc::clone(reference)),
            StackValue::Manager(manager) => StackValue::Manager(Rc::clone(manager)),
            StackValue::Arguments(args) => StackValue::Arguments(args.clone()),
            StackValue::Layout(program) => StackValue::Layout(program.clone()),
            StackValue::Component(_) => return None,
        })
    }
}

struct Frame {
    locals: Vec<Option<StackValue>>,
    self_ref: PathRef,
}

struct OpenList {
    list: UpdateList,
    on_modified: Vec<Box<dyn UpdatingOpcode>>,
    begun_at: Revision,
}

impl OpenList {
    fn new() -> Self {
        Self {
            list: UpdateList::new(),
            on_modified: Vec::new(),
            begun_at: revision::current(),
        }
    }
}

/// A component instance together with the destructor its manager registered.
pub struct Destroyable {
    instance: ComponentInstance,
    destructor: Option<Box<dyn Destructor>>,
}

impl Destroyable {
    pub fn instance(&self) -> &ComponentInstance {
        &self.instance
    }

    /// Runs the destructor, then marks the instance destroyed.
    pub fn destroy(self) {
        if let Some(destructor) = self.destructor {
            destructor.destroy();
        }
        self.instance.mark_destroyed();
    }
}

/// Output of one append pass.
pub struct RenderResult {
    pub(crate) updates: UpdateList,
    pub(crate) bounds: Bounds,
    pub(crate) destroyables: Vec<Destroyable>,
}

impl RenderResult {
    pub fn updates(&self) -> &UpdateList {
        &self.updates
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// Live component instances, in creation order.
    pub fn instances(&self) -> impl Iterator<Item = &ComponentInstance> {
        self.destroyables.iter().map(Destroyable::instance)
    }
}

#[derive(Clone, Copy)]
struct Marks {
    stack: usize,
    elements: usize,
    blocks: usize,
    updates: usize,
    scopes: usize,
}

pub struct AppendVm<'a> {
    env: &'a mut dyn Environment,
    options: VmOptions,
    stack: Vec<StackValue>,
    frames: Vec<Frame>,
    elements: ElementStack,
    updates: Vec<OpenList>,
    dynamic_scopes: Vec<DynamicScope>,
    destroyables: Vec<Destroyable>,
    current: (Op, usize),
    next_guid: u32,
}

impl<'a> AppendVm<'a> {
    /// A VM appending into `parent`, with the root block and root update list open.
    pub fn new(
        env: &'a mut dyn Environment,
        options: VmOptions,
        parent: NodeId,
        dynamic_scope: DynamicScope,
    ) -> Self {
        let mut elements = ElementStack::new(parent);
        elements.push_block();
        Self {
            env,
            stack: Vec::with_capacity(options.initial_stack_capacity),
            options,
            frames: Vec::new(),
            elements,
            updates: vec![OpenList::new()],
            dynamic_scopes: vec![dynamic_scope],
            destroyables: Vec::new(),
            current: (Op::PushConstant, 0),
            next_guid: 1,
        }
    }

    /// Runs `program` in a fresh frame whose `self` is `self_ref`.
    ///
    /// The program must leave the stack, open elements, blocks, cache groups
    /// and dynamic scopes exactly as it found them.
    pub fn execute(&mut self, program: &Program, self_ref: PathRef) -> Result<(), VmError> {
        if self.frames.len() >= self.options.max_invocation_depth {
            return Err(MalformedProgramError::InvocationTooDeep {
                limit: self.options.max_invocation_depth,
            }
            .into());
        }
        let marks = self.marks();
        let saved = self.current;
        self.frames.push(Frame {
            locals: (0..program.locals()).map(|_| None).collect(),
            self_ref,
        });

        for (offset, opcode) in program.ops().iter().enumerate() {
            self.current = (opcode.op, offset);
            if self.options.trace_opcodes {
                log::trace!(
                    "[{}] {offset:>4} {:?} {} {} {} (stack {})",
                    self.frames.len(),
                    opcode.op,
                    opcode.op1,
                    opcode.op2,
                    opcode.op3,
                    self.stack.len()
                );
            }
            self.dispatch(program, *opcode)?;
        }

        self.frames.pop().ok_or(MalformedProgramError::NoActiveFrame)?;
        self.current = saved;
        self.check_balanced(marks)?;
        Ok(())
    }

    /// Seals the root block and update list.
    pub fn finish(mut self) -> Result<RenderResult, VmError> {
        self.elements.ensure_not_constructing()?;
        if self.elements.depth() != 1 {
            return Err(UnbalancedRegionError::FrameMismatch {
                region: "element",
                entered: 1,
                exited: self.elements.depth(),
            }
            .into());
        }
        let bounds = self.elements.pop_block()?;
        if self.elements.block_depth() != 0 {
            return Err(UnbalancedRegionError::FrameMismatch {
                region: "block",
                entered: 1,
                exited: self.elements.block_depth() + 1,
            }
            .into());
        }
        if self.updates.len() != 1 {
            return Err(UnbalancedRegionError::FrameMismatch {
                region: "cache group",
                entered: 1,
                exited: self.updates.len(),
            }
            .into());
        }
        let root = self
            .updates
            .pop()
            .ok_or(UnbalancedRegionError::CacheGroupUnderflow)?;
        Ok(RenderResult {
            updates: root.list,
            bounds,
            destroyables: self.destroyables,
        })
    }

    fn marks(&self) -> Marks {
        Marks {
            stack: self.stack.len(),
            elements: self.elements.depth(),
            blocks: self.elements.block_depth(),
            updates: self.updates.len(),
            scopes: self.dynamic_scopes.len(),
        }
    }

    fn check_balanced(&self, entered: Marks) -> Result<(), UnbalancedRegionError> {
        let exited = self.marks();
        let regions = [
            ("evaluation stack", entered.stack, exited.stack),
            ("element", entered.elements, exited.elements),
            ("block", entered.blocks, exited.blocks),
            ("cache group", entered.updates, exited.updates),
            ("dynamic scope", entered.scopes, exited.scopes),
        ];
        for (region, entered, exited) in regions {
            if entered != exited {
                return Err(UnbalancedRegionError::FrameMismatch {
                    region,
                    entered,
                    exited,
                });
            }
        }
        self.elements.ensure_not_constructing()
    }

    fn dispatch(&mut self, program: &Program, opcode: Opcode) -> Result<(), VmError> {
        let constants = program.constants();
        match opcode.op {
            // -> reference
            Op::PushConstant => {
                let value = constants.value(opcode.op1)?.clone();
                self.push(StackValue::Reference(reference::constant(value)));
            }
            // -> value
            Op::PushLocal => {
                let value = self.local(opcode.op1)?;
                self.push(value);
            }
            // value ->
            Op::SetLocal => {
                let value = self.pop()?;
                *self.local_slot(opcode.op1)? = Some(value);
            }
            // value{op1} ->
            Op::Pop => {
                for _ in 0..opcode.op1 {
                    self.pop()?;
                }
            }
            // value -> value, value
            Op::Dup => {
                let top = self.stack.last().ok_or_else(|| self.underflow())?;
                let copy = top
                    .duplicate()
                    .ok_or_else(|| self.unexpected("copyable value", top.kind()))?;
                self.push(copy);
            }
            // -> reference
            Op::PushSelf => {
                let self_ref = Rc::clone(&self.frame()?.self_ref);
                self.push(StackValue::Reference(self_ref));
            }
            // reference -> reference
            Op::GetProperty => {
                let parent = self.pop_reference()?;
                let name = constants.string(opcode.op1)?;
                self.push(StackValue::Reference(parent.get(name)));
            }
            // reference ->
            Op::AppendText => {
                let reference = self.pop_reference()?;
                self.append_text(reference)?;
            }
            // ->
            Op::OpenElement => {
                self.elements.ensure_not_constructing()?;
                let tag = constants.string(opcode.op1)?;
                let node = self.env.create_element(tag);
                self.append_node(node)?;
                self.elements.open(node)?;
            }
            // ->
            Op::StaticAttr => {
                let name = constants.string(opcode.op1)?;
                let value = constants.value(opcode.op2)?.clone();
                self.elements
                    .constructing_mut()?
                    .operations
                    .set_static(name, value);
            }
            // reference ->
            Op::DynamicAttr => {
                let reference = self.pop_reference()?;
                let name = constants.string(opcode.op1)?;
                self.elements
                    .constructing_mut()?
                    .operations
                    .set_attribute(name, reference);
            }
            // ->
            Op::FlushElement => {
                let mut constructing = self.elements.flush()?;
                for (name, reference) in constructing.operations.drain() {
                    self.apply_attribute(constructing.node, name, reference)?;
                }
            }
            // ->
            Op::CloseElement => {
                self.elements.close()?;
            }
            Op::PushBlock => self.elements.push_block(),
            Op::PopBlock => {
                self.elements.pop_block()?;
            }
            Op::BeginCacheGroup => self.begin_cache_group(),
            Op::CommitCacheGroup => self.commit_cache_group()?,
            // reference{names} ->
            Op::BindDynamicScope => {
                let names = Rc::clone(constants.names(opcode.op1)?);
                let references = self.pop_references(names.len())?;
                let scope = self.dynamic_scope().child(names.iter().cloned().zip(references));
                self.dynamic_scopes.push(scope);
            }
            Op::PopDynamicScope => {
                if self.dynamic_scopes.len() <= 1 {
                    return Err(UnbalancedRegionError::DynamicScopeUnderflow.into());
                }
                self.dynamic_scopes.pop();
            }
            Op::InvokeBlock => {
                let block = constants.program(opcode.op1)?.clone();
                let self_ref = Rc::clone(&self.frame()?.self_ref);
                self.execute(&block, self_ref)?;
            }
            Op::PushComponentManager => self.push_component_manager(program, opcode)?,
            Op::PushDefinitionRef => {
                let reference = Rc::clone(constants.definition_ref(opcode.op1)?);
                self.push(StackValue::DefinitionRef(reference));
            }
            Op::PushDynamicComponentManager => self.push_dynamic_component_manager(opcode)?,
            Op::SetComponentState => self.set_component_state(opcode)?,
            Op::PushArgs => self.push_args(program, opcode)?,
            Op::CreateComponent => self.create_component(opcode)?,
            Op::RegisterComponentDestructor => self.register_component_destructor(opcode)?,
            Op::BeginComponentTransaction => {
                self.begin_cache_group();
                self.elements.push_block();
            }
            Op::PushComponentOperations => self.elements.set_pending_operations(),
            Op::DidCreateElement => self.did_create_element(opcode)?,
            Op::GetComponentSelf => self.get_component_self(opcode)?,
            Op::GetComponentLayout => self.get_component_layout(opcode)?,
            Op::InvokeLayout => {
                let layout = self.pop_layout()?;
                let self_ref = self.pop_reference()?;
                self.execute(&layout, self_ref)?;
            }
            Op::UpdateComponent => self.update_component(opcode)?,
            Op::DidRenderLayout => self.did_render_layout(opcode)?,
            Op::CommitComponentTransaction => self.commit_cache_group()?,
        }
        Ok(())
    }

    fn underflow(&self) -> MalformedProgramError {
        MalformedProgramError::StackUnderflow {
            op: self.current.0,
            offset: self.current.1,
        }
    }

    fn unexpected(&self, expected: &'static str, found: &'static str) -> MalformedProgramError {
        MalformedProgramError::UnexpectedOperand {
            op: self.current.0,
            offset: self.current.1,
            expected,
            found,
        }
    }

    fn push(&mut self, value: StackValue) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<StackValue, MalformedProgramError> {
        self.stack.pop().ok_or_else(|| self.underflow())
    }

    fn pop_reference(&mut self) -> Result<PathRef, MalformedProgramError> {
        match self.pop()? {
            StackValue::Reference(reference) => Ok(reference),
            other => Err(self.unexpected("reference", other.kind())),
        }
    }

    fn pop_layout(&mut self) -> Result<Program, MalformedProgramError> {
        match self.pop()? {
            StackValue::Layout(program) => Ok(program),
            other => Err(self.unexpected("layout", other.kind())),
        }
    }

    /// Pops `count` references, returned in push order.
    fn pop_references(&mut self, count: usize) -> Result<Vec<PathRef>, MalformedProgramError> {
        let start = self
            .stack
            .len()
            .checked_sub(count)
            .ok_or_else(|| self.underflow())?;
        let values: Vec<StackValue> = self.stack.drain(start..).collect();
        values
            .into_iter()
            .map(|value| match value {
                StackValue::Reference(reference) => Ok(reference),
                other => Err(self.unexpected("reference", other.kind())),
            })
            .collect()
    }

    fn frame(&self) -> Result<&Frame, MalformedProgramError> {
        self.frames.last().ok_or(MalformedProgramError::NoActiveFrame)
    }

    fn local_slot(&mut self, slot: u32) -> Result<&mut Option<StackValue>, MalformedProgramError> {
        let frame = self
            .frames
            .last_mut()
            .ok_or(MalformedProgramError::NoActiveFrame)?;
        let locals = frame.locals.len();
        usize::try_from(slot)
            .ok()
            .and_then(|index| frame.locals.get_mut(index))
            .ok_or(MalformedProgramError::LocalOutOfRange { slot, locals })
    }

    fn local(&mut self, slot: u32) -> Result<StackValue, MalformedProgramError> {
        let (op, offset) = self.current;
        let value = self
            .local_slot(slot)?
            .as_ref()
            .ok_or(MalformedProgramError::UninitializedLocal { slot })?;
        value
            .duplicate()
            .ok_or(MalformedProgramError::UnexpectedOperand {
                op,
                offset,
                expected: "copyable value",
                found: value.kind(),
            })
    }

    fn dynamic_scope(&self) -> DynamicScope {
        self.dynamic_scopes.last().cloned().unwrap_or_default()
    }

    fn append_node(&mut self, node: NodeId) -> Result<(), VmError> {
        self.env.append_child(self.elements.parent(), node)?;
        self.elements.did_append_node(node);
        Ok(())
    }

    fn append_text(&mut self, reference: PathRef) -> Result<(), VmError> {
        self.elements.ensure_not_constructing()?;
        if reference.tag().is_const() {
            let text = reference.value()?.to_string();
            let node = self.env.create_text(&text);
            return self.append_node(node);
        }
        let cache = ValueCache::new(reference)?;
        let node = self.env.create_text(&cache.peek().to_string());
        self.append_node(node)?;
        let validated_at = cache.revision();
        let opcode = elements::UpdateText {
            node,
            tag: cache.tag(),
            cache: RefCell::new(cache),
        };
        self.register(Box::new(opcode), validated_at)
    }

    fn apply_attribute(
        &mut self,
        element: NodeId,
        name: Rc<str>,
        reference: PathRef,
    ) -> Result<(), VmError> {
        if reference.tag().is_const() {
            let value = reference.value()?;
            self.env.set_attribute(element, &name, &value)?;
            return Ok(());
        }
        let cache = ValueCache::new(reference)?;
        self.env.set_attribute(element, &name, cache.peek())?;
        let validated_at = cache.revision();
        let opcode = elements::UpdateAttribute {
            element,
            name,
            tag: cache.tag(),
            cache: RefCell::new(cache),
        };
        self.register(Box::new(opcode), validated_at)
    }

    /// Appends to the innermost open update list.
    fn register(
        &mut self,
        opcode: Box<dyn UpdatingOpcode>,
        validated_at: Revision,
    ) -> Result<(), VmError> {
        let guid = self.next_guid;
        self.next_guid += 1;
        let open = self
            .updates
            .last_mut()
            .ok_or(UnbalancedRegionError::CacheGroupUnderflow)?;
        open.list.push(guid, opcode, validated_at);
        Ok(())
    }

    /// Adds a hook run whenever the innermost cache group is entered.
    fn register_on_modified(&mut self, hook: Box<dyn UpdatingOpcode>) -> Result<(), VmError> {
        if self.updates.len() <= 1 {
            return Err(UnbalancedRegionError::CacheGroupUnderflow.into());
        }
        let open = self
            .updates
            .last_mut()
            .ok_or(UnbalancedRegionError::CacheGroupUnderflow)?;
        open.on_modified.push(hook);
        Ok(())
    }

    fn begin_cache_group(&mut self) {
        self.updates.push(OpenList::new());
    }

    fn commit_cache_group(&mut self) -> Result<(), VmError> {
        if self.updates.len() <= 1 {
            return Err(UnbalancedRegionError::CacheGroupUnderflow.into());
        }
        let open = self
            .updates
            .pop()
            .ok_or(UnbalancedRegionError::CacheGroupUnderflow)?;
        if open.list.is_empty() && open.on_modified.is_empty() {
            return Ok(());
        }
        // Leaves that observed writes made inside the group keep it current as
        // of its tag. A leaf that went stale keeps it at `begun_at`.
        let validated_at = if open.list.is_current() {
            open.begun_at.max(open.list.tag().value())
        } else {
            open.begun_at
        };
        let group = CacheGroup::new(open.list, open.on_modified);
        self.register(Box::new(group), validated_at)
    }
}
