//! Render transactions: one append pass, then any number of revalidations,
//! then teardown.

use crate::component::DynamicScope;
use crate::error::VmError;
use crate::host::{Environment, NodeId};
use crate::options::VmOptions;
use crate::program::Program;
use crate::reference::PathRef;
use crate::update::{RevalidationReport, UpdatingVm};
use crate::vm::AppendVm;

pub use crate::vm::{Destroyable, RenderResult};

/// Owns the host environment and drives passes against it.
pub struct Renderer<E: Environment> {
    env: E,
    options: VmOptions,
}

impl<E: Environment> Renderer<E> {
    pub fn new(env: E) -> Self {
        Self::with_options(env, VmOptions::default())
    }

    pub fn with_options(env: E, options: VmOptions) -> Self {
        Self { env, options }
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut E {
        &mut self.env
    }

    pub fn into_env(self) -> E {
        self.env
    }

    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    pub fn render(
        &mut self,
        parent: NodeId,
        program: &Program,
        self_ref: PathRef,
    ) -> Result<RenderResult, VmError> {
        self.render_in_scope(parent, program, self_ref, DynamicScope::new())
    }

    /// Runs the append pass for `program` inside one host transaction.
    ///
    /// On failure the transaction is left uncommitted and whatever output was
    /// already attached under `parent` stays there; discard it and render again.
    pub fn render_in_scope(
        &mut self,
        parent: NodeId,
        program: &Program,
        self_ref: PathRef,
        dynamic_scope: DynamicScope,
    ) -> Result<RenderResult, VmError> {
        log::debug!("render: {} ops into node {parent}", program.len());
        self.env.begin_transaction();
        let mut vm = AppendVm::new(&mut self.env, self.options.clone(), parent, dynamic_scope);
        let outcome = vm.execute(program, self_ref).and_then(|()| vm.finish());
        match outcome {
            Ok(result) => {
                self.env.commit_transaction();
                log::debug!(
                    "render committed: {} top-level nodes, {} updating opcodes",
                    result.bounds.nodes().len(),
                    result.updates.deep_len()
                );
                Ok(result)
            }
            Err(err) => {
                log::warn!("render into node {parent} aborted, partial output left behind: {err}");
                Err(err)
            }
        }
    }

    /// Re-runs the updating opcodes of `result` whose tags moved.
    pub fn revalidate(&mut self, result: &RenderResult) -> Result<RevalidationReport, VmError> {
        self.env.begin_transaction();
        let mut vm = UpdatingVm::new(&mut self.env);
        let outcome = vm.execute(&result.updates);
        let report = vm.report();
        match outcome {
            Ok(()) => {
                self.env.commit_transaction();
                log::debug!(
                    "revalidated: {} evaluated, {} skipped, {} groups entered",
                    report.evaluated,
                    report.skipped,
                    report.groups_entered
                );
                Ok(report)
            }
            Err(err) => {
                log::warn!(
                    "revalidation aborted after {} updates, earlier updates are kept: {err}",
                    report.evaluated
                );
                Err(err)
            }
        }
    }

    /// Runs every destructor in reverse registration order, then removes the
    /// region's top-level nodes. The update list is dropped last.
    pub fn destroy(&mut self, result: RenderResult) -> Result<(), VmError> {
        let RenderResult {
            updates,
            bounds,
            destroyables,
        } = result;
        log::debug!("destroy: {} components", destroyables.len());
        for destroyable in destroyables.into_iter().rev() {
            destroyable.destroy();
        }
        for node in bounds.nodes() {
            self.env.remove(*node)?;
        }
        drop(updates);
        Ok(())
    }

    /// Tears down `previous`, then renders `program` in its place.
    pub fn rerender(
        &mut self,
        previous: RenderResult,
        parent: NodeId,
        program: &Program,
        self_ref: PathRef,
    ) -> Result<RenderResult, VmError> {
        self.destroy(previous)?;
        self.render(parent, program, self_ref)
    }
}
