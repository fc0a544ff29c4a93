use std::rc::Rc;

use kindle_core::{
    ComponentInstance, DynamicScope, MemoryHost, PathRef, Program, RenderResult, Renderer,
    RevalidationReport, VmError, VmOptions,
};

struct Content {
    program: Program,
    self_ref: PathRef,
    dynamic_scope: DynamicScope,
}

/// Headless harness for exercising render passes in tests.
///
/// `RenderTestRule` owns an in-memory host and the result of the most recent
/// render, so a test can install a program once and then drive revalidation,
/// teardown and re-rendering without threading the pieces through by hand.
pub struct RenderTestRule {
    renderer: Renderer<MemoryHost>,
    content: Option<Content>,
    result: Option<RenderResult>,
}

impl RenderTestRule {
    /// Create a new rule backed by an empty [`MemoryHost`].
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    pub fn with_options(options: VmOptions) -> Self {
        Self {
            renderer: Renderer::with_options(MemoryHost::new(), options),
            content: None,
            result: None,
        }
    }

    /// Install `program` rendered against `self_ref` and run the append pass.
    /// Any previously rendered content is destroyed first.
    pub fn set_content(&mut self, program: Program, self_ref: PathRef) -> Result<(), VmError> {
        self.set_content_in_scope(program, self_ref, DynamicScope::new())
    }

    pub fn set_content_in_scope(
        &mut self,
        program: Program,
        self_ref: PathRef,
        dynamic_scope: DynamicScope,
    ) -> Result<(), VmError> {
        self.content = Some(Content {
            program,
            self_ref,
            dynamic_scope,
        });
        self.render()
    }

    /// Walk the current update list. Without content this is a no-op.
    pub fn revalidate(&mut self) -> Result<RevalidationReport, VmError> {
        match self.result.as_ref() {
            Some(result) => self.renderer.revalidate(result),
            None => Ok(RevalidationReport::default()),
        }
    }

    /// Tear the installed content down and render it again from scratch.
    pub fn rerender(&mut self) -> Result<(), VmError> {
        self.render()
    }

    /// Destroy the rendered region. The content stays installed.
    pub fn destroy(&mut self) -> Result<(), VmError> {
        match self.result.take() {
            Some(result) => self.renderer.destroy(result),
            None => Ok(()),
        }
    }

    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }

    pub fn result(&self) -> Option<&RenderResult> {
        self.result.as_ref()
    }

    /// Live component instances of the current render, in creation order.
    pub fn instances(&self) -> Vec<ComponentInstance> {
        self.result
            .iter()
            .flat_map(RenderResult::instances)
            .cloned()
            .collect()
    }

    pub fn host(&self) -> &MemoryHost {
        self.renderer.env()
    }

    pub fn host_mut(&mut self) -> &mut MemoryHost {
        self.renderer.env_mut()
    }

    /// Dump the host node tree as text for debugging.
    pub fn dump_tree(&self) -> String {
        self.host().dump_tree()
    }

    pub fn html(&self) -> String {
        self.host().render_html()
    }

    /// Dump the current update list, or an empty string before the first render.
    pub fn dump_updates(&self) -> String {
        self.result
            .as_ref()
            .map(|result| result.updates().dump())
            .unwrap_or_default()
    }

    fn render(&mut self) -> Result<(), VmError> {
        self.destroy()?;
        if let Some(content) = self.content.as_ref() {
            let result = self.renderer.render_in_scope(
                MemoryHost::ROOT,
                &content.program,
                Rc::clone(&content.self_ref),
                content.dynamic_scope.clone(),
            )?;
            self.result = Some(result);
        }
        Ok(())
    }
}

impl Default for RenderTestRule {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience helper for tests that only need temporary access to a
/// `RenderTestRule`.
pub fn run_test_render<R>(f: impl FnOnce(&mut RenderTestRule) -> R) -> R {
    let mut rule = RenderTestRule::new();
    f(&mut rule)
}

#[cfg(test)]
#[path = "tests/rule_tests.rs"]
mod tests;
