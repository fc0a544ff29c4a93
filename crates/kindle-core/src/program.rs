//! Compiled programs: opcodes, operand pools and a small builder.
//!
//! Programs arrive already compiled. The builder exists so that component
//! managers can hand out layouts and tests can assemble programs without a
//! template compiler.

use std::fmt;
use std::rc::Rc;

use crate::component::ComponentDefinition;
use crate::error::MalformedProgramError;
use crate::reference::Reference;
use crate::value::Value;

/// Append opcodes. Operand meaning is listed per variant as `op1, op2, op3`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    /// value index
    PushConstant = 0,
    /// slot
    PushLocal = 1,
    /// slot
    SetLocal = 2,
    /// count
    Pop = 3,
    Dup = 4,
    PushSelf = 5,
    /// name index
    GetProperty = 6,
    AppendText = 7,
    /// tag name index
    OpenElement = 8,
    /// name index, value index
    StaticAttr = 9,
    /// name index
    DynamicAttr = 10,
    FlushElement = 11,
    CloseElement = 12,
    PushBlock = 13,
    PopBlock = 14,
    BeginCacheGroup = 15,
    CommitCacheGroup = 16,
    /// names index
    BindDynamicScope = 17,
    PopDynamicScope = 18,
    /// program index
    InvokeBlock = 19,
    /// definition index
    PushComponentManager = 20,
    /// slot holding a definition reference
    PushDynamicComponentManager = 21,
    /// slot
    SetComponentState = 22,
    /// positional count, names index
    PushArgs = 23,
    /// flags, slot
    CreateComponent = 24,
    /// slot
    RegisterComponentDestructor = 25,
    BeginComponentTransaction = 26,
    PushComponentOperations = 27,
    /// slot
    DidCreateElement = 28,
    /// slot
    GetComponentSelf = 29,
    /// slot
    GetComponentLayout = 30,
    InvokeLayout = 31,
    /// slot
    UpdateComponent = 32,
    /// slot
    DidRenderLayout = 33,
    CommitComponentTransaction = 34,
    /// definition reference index
    PushDefinitionRef = 35,
}

impl Op {
    pub const ALL: [Op; 36] = [
        Op::PushConstant,
        Op::PushLocal,
        Op::SetLocal,
        Op::Pop,
        Op::Dup,
        Op::PushSelf,
        Op::GetProperty,
        Op::AppendText,
        Op::OpenElement,
        Op::StaticAttr,
        Op::DynamicAttr,
        Op::FlushElement,
        Op::CloseElement,
        Op::PushBlock,
        Op::PopBlock,
        Op::BeginCacheGroup,
        Op::CommitCacheGroup,
        Op::BindDynamicScope,
        Op::PopDynamicScope,
        Op::InvokeBlock,
        Op::PushComponentManager,
        Op::PushDynamicComponentManager,
        Op::SetComponentState,
        Op::PushArgs,
        Op::CreateComponent,
        Op::RegisterComponentDestructor,
        Op::BeginComponentTransaction,
        Op::PushComponentOperations,
        Op::DidCreateElement,
        Op::GetComponentSelf,
        Op::GetComponentLayout,
        Op::InvokeLayout,
        Op::UpdateComponent,
        Op::DidRenderLayout,
        Op::CommitComponentTransaction,
        Op::PushDefinitionRef,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Op::ALL.get(usize::from(code)).copied().ok_or(code)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// `CreateComponent` flag: the invocation passed a default block.
pub const HAS_DEFAULT_BLOCK: u32 = 0b01;

/// One immutable instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Opcode {
    pub op: Op,
    pub op1: u32,
    pub op2: u32,
    pub op3: u32,
}

impl Opcode {
    pub const WORDS: usize = 4;

    pub fn new(op: Op) -> Self {
        Self {
            op,
            op1: 0,
            op2: 0,
            op3: 0,
        }
    }

    pub fn with(op: Op, op1: u32, op2: u32, op3: u32) -> Self {
        Self { op, op1, op2, op3 }
    }

    pub fn encode(&self) -> [u32; Self::WORDS] {
        [u32::from(self.op.code()), self.op1, self.op2, self.op3]
    }
}

/// A reference resolving to a component definition, for dynamic invocations.
pub type DefinitionRef = Rc<dyn Reference<ComponentDefinition>>;

/// Operand pools shared by every opcode of one program.
#[derive(Clone, Default)]
pub struct Constants {
    strings: Vec<Rc<str>>,
    values: Vec<Value>,
    names: Vec<Rc<[Rc<str>]>>,
    definitions: Vec<ComponentDefinition>,
    definition_refs: Vec<DefinitionRef>,
    programs: Vec<Program>,
}

fn lookup<'a, T>(
    pool: &'a [T],
    name: &'static str,
    index: u32,
) -> Result<&'a T, MalformedProgramError> {
    usize::try_from(index)
        .ok()
        .and_then(|index| pool.get(index))
        .ok_or(MalformedProgramError::MissingConstant { pool: name, index })
}

fn intern<T>(pool: &mut Vec<T>, item: T, same: impl Fn(&T, &T) -> bool) -> u32 {
    let index = match pool.iter().position(|existing| same(existing, &item)) {
        Some(index) => index,
        None => {
            pool.push(item);
            pool.len() - 1
        }
    };
    index as u32
}

impl Constants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn string(&self, index: u32) -> Result<&Rc<str>, MalformedProgramError> {
        lookup(&self.strings, "string", index)
    }

    pub fn value(&self, index: u32) -> Result<&Value, MalformedProgramError> {
        lookup(&self.values, "value", index)
    }

    pub fn names(&self, index: u32) -> Result<&Rc<[Rc<str>]>, MalformedProgramError> {
        lookup(&self.names, "names", index)
    }

    pub fn definition(&self, index: u32) -> Result<&ComponentDefinition, MalformedProgramError> {
        lookup(&self.definitions, "definition", index)
    }

    pub fn definition_ref(&self, index: u32) -> Result<&DefinitionRef, MalformedProgramError> {
        lookup(&self.definition_refs, "definition reference", index)
    }

    pub fn program(&self, index: u32) -> Result<&Program, MalformedProgramError> {
        lookup(&self.programs, "program", index)
    }

    pub fn add_string(&mut self, text: &str) -> u32 {
        intern(&mut self.strings, Rc::from(text), |a, b| a == b)
    }

    pub fn add_value(&mut self, value: Value) -> u32 {
        intern(&mut self.values, value, |a, b| a == b)
    }

    pub fn add_names(&mut self, names: &[&str]) -> u32 {
        let names: Rc<[Rc<str>]> = names.iter().map(|name| Rc::from(*name)).collect();
        intern(&mut self.names, names, |a, b| a == b)
    }

    pub fn add_definition(&mut self, definition: ComponentDefinition) -> u32 {
        intern(&mut self.definitions, definition, |a, b| a == b)
    }

    pub fn add_definition_ref(&mut self, reference: DefinitionRef) -> u32 {
        intern(&mut self.definition_refs, reference, Rc::ptr_eq)
    }

    pub fn add_program(&mut self, program: Program) -> u32 {
        intern(&mut self.programs, program, Program::ptr_eq)
    }
}

struct ProgramInner {
    ops: Vec<Opcode>,
    constants: Constants,
    locals: u32,
}

/// A compiled, immutable program. Clones share storage.
#[derive(Clone)]
pub struct Program {
    inner: Rc<ProgramInner>,
}

impl Program {
    pub fn new(ops: Vec<Opcode>, constants: Constants, locals: u32) -> Self {
        Self {
            inner: Rc::new(ProgramInner {
                ops,
                constants,
                locals,
            }),
        }
    }

    /// Decodes a raw stream of [`Opcode::WORDS`]-word instructions.
    pub fn decode(
        words: &[u32],
        constants: Constants,
        locals: u32,
    ) -> Result<Self, MalformedProgramError> {
        if words.len() % Opcode::WORDS != 0 {
            return Err(MalformedProgramError::Truncated { len: words.len() });
        }
        let ops = words
            .chunks_exact(Opcode::WORDS)
            .enumerate()
            .map(|(offset, chunk)| {
                let op = u8::try_from(chunk[0])
                    .ok()
                    .and_then(|code| Op::try_from(code).ok())
                    .ok_or(MalformedProgramError::UnknownOpcode {
                        code: chunk[0],
                        offset,
                    })?;
                Ok(Opcode::with(op, chunk[1], chunk[2], chunk[3]))
            })
            .collect::<Result<Vec<_>, MalformedProgramError>>()?;
        Ok(Self::new(ops, constants, locals))
    }

    pub fn encode(&self) -> Vec<u32> {
        self.inner.ops.iter().flat_map(Opcode::encode).collect()
    }

    pub fn ops(&self) -> &[Opcode] {
        &self.inner.ops
    }

    pub fn constants(&self) -> &Constants {
        &self.inner.constants
    }

    pub fn locals(&self) -> u32 {
        self.inner.locals
    }

    pub fn len(&self) -> usize {
        self.inner.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.ops.is_empty()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("ops", &self.inner.ops.len())
            .field("locals", &self.inner.locals)
            .finish()
    }
}

/// Argument shape of a component invocation emitted by [`ProgramBuilder`].
#[derive(Clone, Debug, Default)]
pub struct InvocationArgs<'a> {
    pub positional: u32,
    pub named: &'a [&'a str],
    pub has_default_block: bool,
}

/// Emits opcodes and fills the constant pools.
#[derive(Default)]
pub struct ProgramBuilder {
    ops: Vec<Opcode>,
    constants: Constants,
    locals: u32,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a fresh local slot.
    pub fn local(&mut self) -> u32 {
        let slot = self.locals;
        self.locals += 1;
        slot
    }

    pub fn emit(&mut self, opcode: Opcode) -> &mut Self {
        self.ops.push(opcode);
        self
    }

    fn op(&mut self, op: Op) -> &mut Self {
        self.emit(Opcode::new(op))
    }

    fn op1(&mut self, op: Op, op1: u32) -> &mut Self {
        self.emit(Opcode::with(op, op1, 0, 0))
    }

    pub fn push_constant(&mut self, value: impl Into<Value>) -> &mut Self {
        let index = self.constants.add_value(value.into());
        self.op1(Op::PushConstant, index)
    }

    pub fn push_local(&mut self, slot: u32) -> &mut Self {
        self.op1(Op::PushLocal, slot)
    }

    pub fn set_local(&mut self, slot: u32) -> &mut Self {
        self.op1(Op::SetLocal, slot)
    }

    pub fn pop(&mut self, count: u32) -> &mut Self {
        self.op1(Op::Pop, count)
    }

    pub fn dup(&mut self) -> &mut Self {
        self.op(Op::Dup)
    }

    pub fn push_self(&mut self) -> &mut Self {
        self.op(Op::PushSelf)
    }

    pub fn get_property(&mut self, name: &str) -> &mut Self {
        let index = self.constants.add_string(name);
        self.op1(Op::GetProperty, index)
    }

    /// `PushSelf` followed by one `GetProperty` per path segment.
    pub fn self_path(&mut self, path: &[&str]) -> &mut Self {
        self.push_self();
        for segment in path {
            self.get_property(segment);
        }
        self
    }

    pub fn append_text(&mut self) -> &mut Self {
        self.op(Op::AppendText)
    }

    pub fn text(&mut self, value: impl Into<Value>) -> &mut Self {
        self.push_constant(value).append_text()
    }

    pub fn open_element(&mut self, tag: &str) -> &mut Self {
        let index = self.constants.add_string(tag);
        self.op1(Op::OpenElement, index)
    }

    pub fn static_attr(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        let name = self.constants.add_string(name);
        let value = self.constants.add_value(value.into());
        self.emit(Opcode::with(Op::StaticAttr, name, value, 0))
    }

    pub fn dynamic_attr(&mut self, name: &str) -> &mut Self {
        let index = self.constants.add_string(name);
        self.op1(Op::DynamicAttr, index)
    }

    pub fn flush_element(&mut self) -> &mut Self {
        self.op(Op::FlushElement)
    }

    pub fn close_element(&mut self) -> &mut Self {
        self.op(Op::CloseElement)
    }

    pub fn push_block(&mut self) -> &mut Self {
        self.op(Op::PushBlock)
    }

    pub fn pop_block(&mut self) -> &mut Self {
        self.op(Op::PopBlock)
    }

    pub fn begin_cache_group(&mut self) -> &mut Self {
        self.op(Op::BeginCacheGroup)
    }

    pub fn commit_cache_group(&mut self) -> &mut Self {
        self.op(Op::CommitCacheGroup)
    }

    pub fn bind_dynamic_scope(&mut self, names: &[&str]) -> &mut Self {
        let index = self.constants.add_names(names);
        self.op1(Op::BindDynamicScope, index)
    }

    pub fn pop_dynamic_scope(&mut self) -> &mut Self {
        self.op(Op::PopDynamicScope)
    }

    pub fn invoke_block(&mut self, program: Program) -> &mut Self {
        let index = self.constants.add_program(program);
        self.op1(Op::InvokeBlock, index)
    }

    pub fn push_component_manager(&mut self, definition: &ComponentDefinition) -> &mut Self {
        let index = self.constants.add_definition(definition.clone());
        self.op1(Op::PushComponentManager, index)
    }

    pub fn push_definition_ref(&mut self, reference: DefinitionRef) -> &mut Self {
        let index = self.constants.add_definition_ref(reference);
        self.op1(Op::PushDefinitionRef, index)
    }

    /// Resolves the definition reference stored in local `slot`.
    pub fn push_dynamic_component_manager(&mut self, slot: u32) -> &mut Self {
        self.op1(Op::PushDynamicComponentManager, slot)
    }

    pub fn set_component_state(&mut self, slot: u32) -> &mut Self {
        self.op1(Op::SetComponentState, slot)
    }

    pub fn push_args(&mut self, positional: u32, named: &[&str]) -> &mut Self {
        let names = self.constants.add_names(named);
        self.emit(Opcode::with(Op::PushArgs, positional, names, 0))
    }

    pub fn create_component(&mut self, flags: u32, slot: u32) -> &mut Self {
        self.emit(Opcode::with(Op::CreateComponent, flags, slot, 0))
    }

    pub fn register_component_destructor(&mut self, slot: u32) -> &mut Self {
        self.op1(Op::RegisterComponentDestructor, slot)
    }

    pub fn begin_component_transaction(&mut self) -> &mut Self {
        self.op(Op::BeginComponentTransaction)
    }

    pub fn push_component_operations(&mut self) -> &mut Self {
        self.op(Op::PushComponentOperations)
    }

    pub fn did_create_element(&mut self, slot: u32) -> &mut Self {
        self.op1(Op::DidCreateElement, slot)
    }

    pub fn get_component_self(&mut self, slot: u32) -> &mut Self {
        self.op1(Op::GetComponentSelf, slot)
    }

    pub fn get_component_layout(&mut self, slot: u32) -> &mut Self {
        self.op1(Op::GetComponentLayout, slot)
    }

    pub fn invoke_layout(&mut self) -> &mut Self {
        self.op(Op::InvokeLayout)
    }

    pub fn update_component(&mut self, slot: u32) -> &mut Self {
        self.op1(Op::UpdateComponent, slot)
    }

    pub fn did_render_layout(&mut self, slot: u32) -> &mut Self {
        self.op1(Op::DidRenderLayout, slot)
    }

    pub fn commit_component_transaction(&mut self) -> &mut Self {
        self.op(Op::CommitComponentTransaction)
    }

    /// Emits the full invocation sequence for a statically known component.
    ///
    /// `push_args` must push `args.positional` references followed by one
    /// reference per name in `args.named`. With a `wrapper` tag the component
    /// renders inside an element it can decorate from `did_create_element`.
    pub fn invoke_component(
        &mut self,
        definition: &ComponentDefinition,
        wrapper: Option<&str>,
        args: InvocationArgs<'_>,
        push_args: impl FnOnce(&mut Self),
    ) -> &mut Self {
        self.push_component_manager(definition);
        self.component_body(wrapper, args, push_args)
    }

    /// Like [`invoke_component`](Self::invoke_component), resolving the
    /// definition through a reference at render time. The reference is
    /// parked in a fresh local first.
    pub fn invoke_dynamic_component(
        &mut self,
        reference: DefinitionRef,
        wrapper: Option<&str>,
        args: InvocationArgs<'_>,
        push_args: impl FnOnce(&mut Self),
    ) -> &mut Self {
        let slot = self.local();
        self.push_definition_ref(reference).set_local(slot);
        self.invoke_dynamic_component_from(slot, wrapper, args, push_args)
    }

    /// Invokes the component whose definition reference is already stored in
    /// local `slot`.
    pub fn invoke_dynamic_component_from(
        &mut self,
        slot: u32,
        wrapper: Option<&str>,
        args: InvocationArgs<'_>,
        push_args: impl FnOnce(&mut Self),
    ) -> &mut Self {
        self.push_dynamic_component_manager(slot);
        self.component_body(wrapper, args, push_args)
    }

    fn component_body(
        &mut self,
        wrapper: Option<&str>,
        args: InvocationArgs<'_>,
        push_args: impl FnOnce(&mut Self),
    ) -> &mut Self {
        let state = self.local();
        let flags = if args.has_default_block {
            HAS_DEFAULT_BLOCK
        } else {
            0
        };
        self.set_component_state(state);
        push_args(self);
        self.push_args(args.positional, args.named)
            .create_component(flags, state)
            .register_component_destructor(state)
            .begin_component_transaction()
            .update_component(state);
        if let Some(tag) = wrapper {
            self.push_component_operations()
                .open_element(tag)
                .did_create_element(state)
                .flush_element();
        }
        self.get_component_self(state)
            .get_component_layout(state)
            .invoke_layout();
        if wrapper.is_some() {
            self.close_element();
        }
        self.did_render_layout(state).commit_component_transaction()
    }

    pub fn build(self) -> Program {
        Program::new(self.ops, self.constants, self.locals)
    }
}
