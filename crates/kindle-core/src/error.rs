//! Error kinds raised by the append and update passes.
//!
//! None of these are recoverable inside the pass that raised them. The unit of
//! recovery is the whole transaction: discard it and render again.

use thiserror::Error;

use crate::cell::CellId;
use crate::component::{InstanceId, LifecyclePhase};
use crate::host::HostError;
use crate::program::Op;

#[derive(Debug, Error)]
pub enum VmError {
    #[error(transparent)]
    MalformedProgram(#[from] MalformedProgramError),

    #[error(transparent)]
    UnbalancedRegion(#[from] UnbalancedRegionError),

    #[error(transparent)]
    StaleReference(#[from] StaleReferenceError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleViolationError),

    /// A component manager hook returned an error.
    #[error("component manager hook `{hook}` failed: {source}")]
    ManagerFailure {
        hook: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Host(#[from] HostError),
}

impl VmError {
    pub(crate) fn manager(hook: &'static str) -> impl FnOnce(anyhow::Error) -> VmError {
        move |source| VmError::ManagerFailure { hook, source }
    }
}

/// The compiled program violated its own contract. Always a compiler bug.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedProgramError {
    #[error("unknown opcode {code} at offset {offset}")]
    UnknownOpcode { code: u32, offset: usize },

    #[error("program of {len} words is not a whole number of instructions")]
    Truncated { len: usize },

    #[error("stack underflow in {op:?} at offset {offset}")]
    StackUnderflow { op: Op, offset: usize },

    #[error("{op:?} at offset {offset} expected {expected} on the stack, found {found}")]
    UnexpectedOperand {
        op: Op,
        offset: usize,
        expected: &'static str,
        found: &'static str,
    },

    #[error("missing {pool} constant #{index}")]
    MissingConstant { pool: &'static str, index: u32 },

    #[error("local slot {slot} out of range for a frame with {locals} locals")]
    LocalOutOfRange { slot: u32, locals: usize },

    #[error("local slot {slot} read before it was written")]
    UninitializedLocal { slot: u32 },

    #[error("invocations nested deeper than {limit}")]
    InvocationTooDeep { limit: usize },

    #[error("no frame is executing")]
    NoActiveFrame,
}

/// Open/close markers of a region did not pair up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnbalancedRegionError {
    #[error("CloseElement with no open element")]
    ElementUnderflow,

    #[error("no element is under construction")]
    NoConstructingElement,

    #[error("element opened while element {element} is still under construction")]
    ElementAlreadyConstructing { element: usize },

    #[error("element {element} has no component operations")]
    NoElementOperations { element: usize },

    #[error("PopBlock with no open block")]
    BlockUnderflow,

    #[error("cache group closed with no open cache group")]
    CacheGroupUnderflow,

    #[error("PopDynamicScope with no bound dynamic scope")]
    DynamicScopeUnderflow,

    #[error("{region} depth was {entered} on entry and {exited} on exit")]
    FrameMismatch {
        region: &'static str,
        entered: usize,
        exited: usize,
    },
}

/// A reactive cell was read or written after it was destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cell {cell} was accessed after it was destroyed")]
pub struct StaleReferenceError {
    pub cell: CellId,
}

/// A component lifecycle transition was attempted out of order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleViolationError {
    #[error("component `{component}` cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        component: String,
        from: LifecyclePhase,
        to: LifecyclePhase,
    },

    #[error("component `{component}` was already created")]
    AlreadyCreated { component: String },

    #[error("component `{component}` has no instance yet")]
    NotCreated { component: String },

    #[error("component instance {instance} used after it was destroyed")]
    UseAfterDestroy { instance: InstanceId },

    #[error("component instance {instance} does not hold a {expected}")]
    InstanceTypeMismatch {
        instance: InstanceId,
        expected: &'static str,
    },

    #[error("dynamic component changed from `{expected}` to `{found}` without a remount")]
    DefinitionChanged { expected: String, found: String },
}
