//! The sandbox's memory/time/instruction-count limiter (spec §4.5).
//!
//! Every heap allocation and every VM dispatch flows through a [`ResourceTracker`]. The
//! runtime ships two implementations: [`NoLimitTracker`] (no ceilings, for trusted or
//! test use) and [`LimitedTracker`] (hard ceilings, for untrusted scripts). Checks are
//! batched every [`CHECK_BATCH`] dispatches so the worst-case overshoot past a deadline
//! or instruction budget is bounded without paying a syscall/clock read per instruction.

use std::time::{Duration, Instant};

use crate::error::{RuntimeError, RuntimeErrorKind};

/// How many VM dispatches occur between time/instruction-count checks.
///
/// Chosen so the worst-case overshoot of `execution_timeout`/`max_instructions` is
/// bounded: at most `CHECK_BATCH - 1` extra instructions run past the limit.
pub const CHECK_BATCH: u64 = 256;

/// Resource limits configured on an [`crate::engine::EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct ResourceLimits {
    pub memory_limit: Option<usize>,
    pub execution_timeout: Option<Duration>,
    pub max_instructions: Option<u64>,
    pub max_recursion_depth: Option<usize>,
}

/// Default call-depth ceiling when the host does not configure one.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1000;

impl ResourceLimits {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_recursion_depth: Some(DEFAULT_MAX_RECURSION_DEPTH),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    #[must_use]
    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_max_instructions(mut self, max: u64) -> Self {
        self.max_instructions = Some(max);
        self
    }

    #[must_use]
    pub fn with_max_recursion_depth(mut self, max: usize) -> Self {
        self.max_recursion_depth = Some(max);
        self
    }
}

/// Tracks resource usage during one script invocation and enforces configured limits.
///
/// Implementations back both the allocator wrapper (spec §4.5 "memory limiter") and the
/// VM's per-dispatch checks (spec §4.4): instruction count, wall clock, and allocator
/// bytes-used, checked in that order.
pub trait ResourceTracker: std::fmt::Debug {
    /// Called before a heap allocation of approximately `bytes` would take place.
    fn on_allocate(&mut self, bytes: usize) -> Result<(), RuntimeError>;

    /// Called when an allocation is freed (refcount drop to zero, or container shrink).
    fn on_free(&mut self, bytes: usize);

    /// Starts the deadline clock. Called once at the beginning of `run`.
    fn begin_execution(&mut self);

    /// Checked every [`CHECK_BATCH`] dispatches: instruction count then wall clock.
    fn check_progress(&mut self, instructions_since_last_check: u64) -> Result<(), RuntimeError>;

    /// Called before pushing a call frame.
    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), RuntimeError>;

    /// Current approximate memory usage in bytes, if tracked.
    fn current_memory_bytes(&self) -> usize {
        0
    }

    /// Total number of allocations made, if tracked.
    fn allocation_count(&self) -> usize {
        0
    }
}

/// No ceilings. Still enforces the default recursion depth so a runaway script cannot
/// blow the host's native call stack even when no explicit limits are configured.
#[derive(Debug, Clone, Default)]
pub struct NoLimitTracker {
    max_recursion_depth: usize,
    allocation_count: usize,
    current_memory: usize,
}

impl NoLimitTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            allocation_count: 0,
            current_memory: 0,
        }
    }
}

impl ResourceTracker for NoLimitTracker {
    fn on_allocate(&mut self, bytes: usize) -> Result<(), RuntimeError> {
        self.allocation_count += 1;
        self.current_memory += bytes;
        Ok(())
    }

    fn on_free(&mut self, bytes: usize) {
        self.current_memory = self.current_memory.saturating_sub(bytes);
    }

    fn begin_execution(&mut self) {}

    fn check_progress(&mut self, _instructions_since_last_check: u64) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), RuntimeError> {
        if current_depth >= self.max_recursion_depth {
            Err(RuntimeError::stack_overflow(self.max_recursion_depth))
        } else {
            Ok(())
        }
    }

    fn current_memory_bytes(&self) -> usize {
        self.current_memory
    }

    fn allocation_count(&self) -> usize {
        self.allocation_count
    }
}

/// Hard ceilings for memory, wall-clock time, instruction count, and recursion depth.
#[derive(Debug)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    start: Option<Instant>,
    deadline: Option<Instant>,
    instructions_executed: u64,
    allocation_count: usize,
    current_memory: usize,
}

impl LimitedTracker {
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            start: None,
            deadline: None,
            instructions_executed: 0,
            allocation_count: 0,
            current_memory: 0,
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.map(|s| s.elapsed()).unwrap_or_default()
    }
}

impl ResourceTracker for LimitedTracker {
    fn on_allocate(&mut self, bytes: usize) -> Result<(), RuntimeError> {
        if let Some(max) = self.limits.memory_limit {
            let new_total = self.current_memory + bytes;
            if new_total > max {
                return Err(RuntimeError::new(
                    RuntimeErrorKind::MemoryLimitExceeded,
                    format!("allocation would use {new_total} bytes, limit is {max}"),
                ));
            }
        }
        self.allocation_count += 1;
        self.current_memory += bytes;
        Ok(())
    }

    fn on_free(&mut self, bytes: usize) {
        self.current_memory = self.current_memory.saturating_sub(bytes);
    }

    fn begin_execution(&mut self) {
        let now = Instant::now();
        self.start = Some(now);
        self.deadline = self.limits.execution_timeout.map(|d| now + d);
        self.instructions_executed = 0;
    }

    fn check_progress(&mut self, instructions_since_last_check: u64) -> Result<(), RuntimeError> {
        self.instructions_executed += instructions_since_last_check;
        if let Some(max) = self.limits.max_instructions
            && self.instructions_executed > max
        {
            return Err(RuntimeError::new(
                RuntimeErrorKind::ExecutionTimeout,
                format!("instruction count {} exceeded limit {max}", self.instructions_executed),
            ));
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(RuntimeError::new(
                RuntimeErrorKind::ExecutionTimeout,
                "execution_timeout exceeded",
            ));
        }
        Ok(())
    }

    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), RuntimeError> {
        let max = self.limits.max_recursion_depth.unwrap_or(DEFAULT_MAX_RECURSION_DEPTH);
        if current_depth >= max {
            Err(RuntimeError::stack_overflow(max))
        } else {
            Ok(())
        }
    }

    fn current_memory_bytes(&self) -> usize {
        self.current_memory
    }

    fn allocation_count(&self) -> usize {
        self.allocation_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limited_tracker_rejects_over_budget_allocation() {
        let mut tracker = LimitedTracker::new(ResourceLimits::new().with_memory_limit(16));
        assert!(tracker.on_allocate(8).is_ok());
        let err = tracker.on_allocate(16).unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::MemoryLimitExceeded);
    }

    #[test]
    fn limited_tracker_rejects_over_budget_instructions() {
        let mut tracker = LimitedTracker::new(ResourceLimits::new().with_max_instructions(10));
        tracker.begin_execution();
        assert!(tracker.check_progress(10).is_ok());
        let err = tracker.check_progress(1).unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::ExecutionTimeout);
    }

    #[test]
    fn no_limit_tracker_still_enforces_recursion_depth() {
        let tracker = NoLimitTracker::new();
        assert!(tracker.check_recursion_depth(DEFAULT_MAX_RECURSION_DEPTH - 1).is_ok());
        assert!(tracker.check_recursion_depth(DEFAULT_MAX_RECURSION_DEPTH).is_err());
    }
}
