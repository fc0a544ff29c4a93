/// Tuning knobs for the append VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmOptions {
    pub initial_stack_capacity: usize,
    /// Nested layout and block invocations allowed before the pass fails.
    pub max_invocation_depth: usize,
    /// Emit one `trace!` line per executed opcode.
    pub trace_opcodes: bool,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            initial_stack_capacity: 32,
            max_invocation_depth: 256,
            trace_opcodes: false,
        }
    }
}

impl VmOptions {
    pub fn with_initial_stack_capacity(mut self, capacity: usize) -> Self {
        self.initial_stack_capacity = capacity;
        self
    }

    pub fn with_max_invocation_depth(mut self, depth: usize) -> Self {
        self.max_invocation_depth = depth;
        self
    }

    pub fn with_trace_opcodes(mut self, enabled: bool) -> Self {
        self.trace_opcodes = enabled;
        self
    }
}
