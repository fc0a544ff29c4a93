//! Component invocation handlers and their updating opcodes.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::{AppendVm, Bounds, Destroyable, StackValue};
use crate::cache::ReferenceCache;
use crate::component::{
    Arguments, ComponentDefinition, ComponentInstance, ComponentManager, ComponentState,
    DynamicScope, LifecyclePhase,
};
use crate::error::{LifecycleViolationError, MalformedProgramError, UnbalancedRegionError, VmError};
use crate::program::{Opcode, Program, HAS_DEFAULT_BLOCK};
use crate::reference::{PathRef, Reference};
use crate::tag::{self, Tag};
use crate::update::{UpdatingOpcode, UpdatingVm};

impl AppendVm<'_> {
    fn component_state(
        &mut self,
        slot: u32,
    ) -> Result<&mut ComponentState, MalformedProgramError> {
        let (op, offset) = self.current;
        match self.local_slot(slot)? {
            Some(StackValue::Component(state)) => Ok(&mut **state),
            Some(other) => Err(MalformedProgramError::UnexpectedOperand {
                op,
                offset,
                expected: "component state",
                found: other.kind(),
            }),
            None => Err(MalformedProgramError::UninitializedLocal { slot }),
        }
    }

    /// Instance and manager of a created component, cloned out of its slot.
    fn live_component(
        &mut self,
        slot: u32,
    ) -> Result<(ComponentInstance, Rc<dyn ComponentManager>), VmError> {
        let state = self.component_state(slot)?;
        let instance = state.instance()?.clone();
        Ok((instance, Rc::clone(state.manager())))
    }

    fn pop_definition_and_manager(
        &mut self,
    ) -> Result<(ComponentDefinition, Rc<dyn ComponentManager>), MalformedProgramError> {
        let manager = match self.pop()? {
            StackValue::Manager(manager) => manager,
            other => return Err(self.unexpected("manager", other.kind())),
        };
        let definition = match self.pop()? {
            StackValue::Definition(definition) => definition,
            other => return Err(self.unexpected("definition", other.kind())),
        };
        Ok((definition, manager))
    }

    fn push_definition(&mut self, definition: ComponentDefinition) {
        let manager = Rc::clone(definition.manager());
        self.push(StackValue::Definition(definition));
        self.push(StackValue::Manager(manager));
    }

    // -> definition, manager
    pub(super) fn push_component_manager(
        &mut self,
        program: &Program,
        opcode: Opcode,
    ) -> Result<(), VmError> {
        let definition = program.constants().definition(opcode.op1)?.clone();
        self.push_definition(definition);
        Ok(())
    }

    // -> definition, manager
    pub(super) fn push_dynamic_component_manager(&mut self, opcode: Opcode) -> Result<(), VmError> {
        let reference = match self.local(opcode.op1)? {
            StackValue::DefinitionRef(reference) => reference,
            other => return Err(self.unexpected("definition reference", other.kind()).into()),
        };
        if reference.tag().is_const() {
            let definition = reference.value()?;
            self.push_definition(definition);
            return Ok(());
        }
        let cache = ReferenceCache::new(reference)?;
        let definition = cache.peek().clone();
        let validated_at = cache.revision();
        let assert = AssertDefinition {
            expected: definition.clone(),
            tag: cache.tag(),
            cache: RefCell::new(cache),
        };
        self.register(Box::new(assert), validated_at)?;
        self.push_definition(definition);
        Ok(())
    }

    // definition, manager ->
    pub(super) fn set_component_state(&mut self, opcode: Opcode) -> Result<(), VmError> {
        let (definition, manager) = self.pop_definition_and_manager()?;
        let mut state = ComponentState::new(definition, manager);
        state.advance(LifecyclePhase::StateBound)?;
        *self.local_slot(opcode.op1)? = Some(StackValue::Component(Box::new(state)));
        Ok(())
    }

    // reference{positional + names} -> arguments
    pub(super) fn push_args(&mut self, program: &Program, opcode: Opcode) -> Result<(), VmError> {
        let names = program.constants().names(opcode.op2)?;
        let positional = opcode.op1 as usize;
        let mut references = self.pop_references(positional + names.len())?.into_iter();
        let positional: SmallVec<[PathRef; 4]> = references.by_ref().take(positional).collect();
        let named: IndexMap<Rc<str>, PathRef> = names.iter().cloned().zip(references).collect();
        self.push(StackValue::Arguments(Arguments::from_parts(positional, named)));
        Ok(())
    }

    // arguments ->
    pub(super) fn create_component(&mut self, opcode: Opcode) -> Result<(), VmError> {
        let args = match self.pop()? {
            StackValue::Arguments(args) => args,
            other => return Err(self.unexpected("arguments", other.kind()).into()),
        };
        let dynamic_scope = self.dynamic_scope();
        let caller = Rc::clone(&self.frame()?.self_ref);
        let has_default_block = opcode.op1 & HAS_DEFAULT_BLOCK != 0;

        let state = self.component_state(opcode.op2)?;
        let definition = state.definition().clone();
        let manager = Rc::clone(state.manager());
        let instance = manager
            .create(&definition, &args, &dynamic_scope, &caller, has_default_block)
            .map_err(VmError::manager("create"))?;
        log::debug!("created `{}` as {}", definition.name(), instance.id());

        let state = self.component_state(opcode.op2)?;
        state.set_instance(instance, args.tag(), dynamic_scope)?;
        Ok(())
    }

    pub(super) fn register_component_destructor(&mut self, opcode: Opcode) -> Result<(), VmError> {
        let (instance, manager) = self.live_component(opcode.op1)?;
        let destructor = manager.get_destructor(&instance);
        self.destroyables.push(Destroyable {
            instance,
            destructor,
        });
        Ok(())
    }

    /// Registers the entry deciding whether the whole component re-runs its
    /// update hook on a later pass.
    pub(super) fn update_component(&mut self, opcode: Opcode) -> Result<(), VmError> {
        let state = self.component_state(opcode.op1)?;
        let name: Rc<str> = Rc::from(state.definition().name());
        let args_tag = state.args_tag().clone();
        let dynamic_scope = state.dynamic_scope().clone();
        let (instance, manager) = self.live_component(opcode.op1)?;

        let tag = tag::combine([args_tag].into_iter().chain(manager.get_tag(&instance)));
        let validated_at = tag.value();
        let update = UpdateComponent {
            name,
            instance,
            manager,
            dynamic_scope,
            tag,
        };
        self.register(Box::new(update), validated_at)
    }

    pub(super) fn did_create_element(&mut self, opcode: Opcode) -> Result<(), VmError> {
        let (instance, manager) = self.live_component(opcode.op1)?;
        let constructing = self.elements.constructing_mut()?;
        if !constructing.from_component {
            return Err(UnbalancedRegionError::NoElementOperations {
                element: constructing.node,
            }
            .into());
        }
        manager
            .did_create_element(&instance, constructing.node, &mut constructing.operations)
            .map_err(VmError::manager("did_create_element"))?;
        self.component_state(opcode.op1)?
            .advance(LifecyclePhase::ElementAttached)?;
        Ok(())
    }

    // -> reference
    pub(super) fn get_component_self(&mut self, opcode: Opcode) -> Result<(), VmError> {
        let (instance, manager) = self.live_component(opcode.op1)?;
        let self_ref = manager
            .get_self(&instance)
            .map_err(VmError::manager("get_self"))?;
        self.push(StackValue::Reference(self_ref));
        Ok(())
    }

    // -> layout
    pub(super) fn get_component_layout(&mut self, opcode: Opcode) -> Result<(), VmError> {
        let (instance, manager) = self.live_component(opcode.op1)?;
        let state = self.component_state(opcode.op1)?;
        let layout = manager
            .layout_for(state.definition(), &instance)
            .map_err(VmError::manager("layout_for"))?;
        state.advance(LifecyclePhase::LayoutResolved)?;
        self.push(StackValue::Layout(layout));
        Ok(())
    }

    pub(super) fn did_render_layout(&mut self, opcode: Opcode) -> Result<(), VmError> {
        let bounds = self.elements.pop_block()?;
        let (instance, manager) = self.live_component(opcode.op1)?;
        manager
            .did_render_layout(&instance, &bounds)
            .map_err(VmError::manager("did_render_layout"))?;
        self.component_state(opcode.op1)?
            .advance(LifecyclePhase::Rendered)?;
        self.env.did_create(&instance, &manager);
        self.register_on_modified(Box::new(DidUpdateLayout {
            instance,
            manager,
            bounds,
        }))
    }
}

/// Fails the pass when a dynamically resolved definition changes identity.
struct AssertDefinition {
    expected: ComponentDefinition,
    tag: Tag,
    cache: RefCell<ReferenceCache<ComponentDefinition>>,
}

impl UpdatingOpcode for AssertDefinition {
    fn kind(&self) -> &'static str {
        "AssertDefinition"
    }

    fn tag(&self) -> Tag {
        self.tag.clone()
    }

    fn evaluate(&self, _vm: &mut UpdatingVm<'_>) -> Result<(), VmError> {
        let mut cache = self.cache.borrow_mut();
        cache.revalidate()?;
        // Compared against the cached value, so a swap reported by an earlier
        // failed pass keeps failing.
        let found = cache.peek();
        if *found != self.expected {
            return Err(LifecycleViolationError::DefinitionChanged {
                expected: self.expected.name().to_owned(),
                found: found.name().to_owned(),
            }
            .into());
        }
        Ok(())
    }

    fn describe(&self) -> Vec<String> {
        vec![format!("expected={}", self.expected.name())]
    }
}

/// Runs the manager's update hook when the component's inputs moved.
struct UpdateComponent {
    name: Rc<str>,
    instance: ComponentInstance,
    manager: Rc<dyn ComponentManager>,
    dynamic_scope: DynamicScope,
    tag: Tag,
}

impl UpdatingOpcode for UpdateComponent {
    fn kind(&self) -> &'static str {
        "UpdateComponent"
    }

    fn tag(&self) -> Tag {
        self.tag.clone()
    }

    fn evaluate(&self, _vm: &mut UpdatingVm<'_>) -> Result<(), VmError> {
        self.instance.ensure_live()?;
        log::trace!("update `{}` ({})", self.name, self.instance.id());
        self.manager
            .update(&self.instance, &self.dynamic_scope)
            .map_err(VmError::manager("update"))
    }

    fn describe(&self) -> Vec<String> {
        vec![format!("component={}", self.name)]
    }
}

/// Did-modify hook of a component's cache group.
struct DidUpdateLayout {
    instance: ComponentInstance,
    manager: Rc<dyn ComponentManager>,
    bounds: Bounds,
}

impl UpdatingOpcode for DidUpdateLayout {
    fn kind(&self) -> &'static str {
        "DidUpdateLayout"
    }

    fn tag(&self) -> Tag {
        Tag::CONSTANT
    }

    fn evaluate(&self, vm: &mut UpdatingVm<'_>) -> Result<(), VmError> {
        self.instance.ensure_live()?;
        self.manager
            .did_update_layout(&self.instance, &self.bounds)
            .map_err(VmError::manager("did_update_layout"))?;
        vm.env().did_update(&self.instance, &self.manager);
        Ok(())
    }
}
