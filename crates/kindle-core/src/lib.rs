#![doc = r"Revision-tagged references and the two-pass template VM behind Kindle."]

pub mod cache;
pub mod cell;
pub mod collections;
pub mod component;
pub mod error;
pub mod host;
pub mod options;
pub mod program;
pub mod reference;
pub mod render;
pub mod revision;
pub mod tag;
pub mod update;
pub mod value;
pub mod vm;

pub use cache::{ReferenceCache, Validation, ValueCache};
pub use cell::{CellId, MutableCell};
pub use component::{
    Arguments, ComponentDefinition, ComponentInstance, ComponentManager, ComponentState,
    Destructor, DynamicScope, ElementOperations, InstanceId, LifecyclePhase,
};
pub use error::{
    LifecycleViolationError, MalformedProgramError, StaleReferenceError, UnbalancedRegionError,
    VmError,
};
pub use host::{Environment, HostError, MemoryHost, NodeId, Notification};
pub use options::VmOptions;
pub use program::{
    Constants, DefinitionRef, InvocationArgs, Op, Opcode, Program, ProgramBuilder,
    HAS_DEFAULT_BLOCK,
};
pub use reference::{
    constant, is_const_reference, map, undefined, CellReference, ConstReference, MapReference,
    PathRef, PathReference, RecordReference, Reference,
};
pub use render::{Destroyable, RenderResult, Renderer};
pub use revision::Revision;
pub use tag::{combine, DirtyableTag, Tag};
pub use update::{CacheGroup, RevalidationReport, UpdateList, UpdatingOpcode, UpdatingVm};
pub use value::Value;
pub use vm::{AppendVm, Bounds};

#[cfg(test)]
#[path = "tests/vm_tests.rs"]
mod vm_tests;

#[cfg(test)]
#[path = "tests/component_tests.rs"]
mod component_tests;
