//! Headless test harness and recording component managers for Kindle.

mod recording;
mod rule;

pub use recording::{Hook, HookCall, HookLog, RecordingInstance, RecordingManager};
pub use rule::{run_test_render, RenderTestRule};
