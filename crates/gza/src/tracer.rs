//! VM instrumentation hooks (spec §4.4, §6).
//!
//! The VM is parameterized over a [`VmTracer`] implementation so instrumentation is
//! zero-cost when unused: [`NoopTracer`]'s methods are empty and inline away entirely
//! under monomorphization, identical to how [`crate::resource::NoLimitTracker`]
//! eliminates resource-check overhead when no limits are configured.

use std::time::Instant;

use crate::bytecode::op::Opcode;

/// Per-instruction and per-call hook points into VM execution.
///
/// The spec's "instrumentation callback" (`(opaque_context, opcode_tag)`) is this
/// trait's `on_instruction` method; the opaque host context is `Self` (the tracer
/// owns whatever state it wants to accumulate). The callback must not re-enter the
/// same engine — the runtime provides no synchronization, matching spec §6.
pub trait VmTracer {
    /// Called once per instruction dispatch, before the opcode executes.
    fn on_instruction(&mut self, ip: u32, opcode: Opcode) {
        let _ = (ip, opcode);
    }

    /// Called when a call frame is pushed.
    fn on_call(&mut self, function_name: Option<&str>, depth: usize) {
        let _ = (function_name, depth);
    }

    /// Called when a call frame is popped.
    fn on_return(&mut self, depth: usize) {
        let _ = depth;
    }
}

/// Zero-cost default: compiles away entirely.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Human-readable execution trace to stderr, for interactive debugging.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrTracer {
    instructions_seen: u64,
}

impl VmTracer for StderrTracer {
    fn on_instruction(&mut self, ip: u32, opcode: Opcode) {
        self.instructions_seen += 1;
        eprintln!("  [{ip:04}] {opcode:?}");
    }

    fn on_call(&mut self, function_name: Option<&str>, depth: usize) {
        eprintln!("  -> call {} (depth {depth})", function_name.unwrap_or("<script>"));
    }

    fn on_return(&mut self, depth: usize) {
        eprintln!("  <- return (depth {depth})");
    }
}

/// Opcode-frequency and wall-clock profiling.
#[derive(Debug, Default)]
pub struct ProfilingTracer {
    pub opcode_counts: ahash::AHashMap<&'static str, u64>,
    pub max_call_depth: usize,
    started_at: Option<Instant>,
}

impl ProfilingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            opcode_counts: ahash::AHashMap::default(),
            max_call_depth: 0,
            started_at: Some(Instant::now()),
        }
    }

    #[must_use]
    pub fn report(&self) -> ProfilingReport {
        ProfilingReport {
            total_instructions: self.opcode_counts.values().sum(),
            max_call_depth: self.max_call_depth,
            elapsed: self.started_at.map(|t| t.elapsed()).unwrap_or_default(),
        }
    }
}

impl VmTracer for ProfilingTracer {
    fn on_instruction(&mut self, _ip: u32, opcode: Opcode) {
        *self.opcode_counts.entry(opcode.name()).or_insert(0) += 1;
    }

    fn on_call(&mut self, _function_name: Option<&str>, depth: usize) {
        self.max_call_depth = self.max_call_depth.max(depth);
    }
}

/// Summary produced by [`ProfilingTracer::report`].
#[derive(Debug, Clone)]
pub struct ProfilingReport {
    pub total_instructions: u64,
    pub max_call_depth: usize,
    pub elapsed: std::time::Duration,
}
