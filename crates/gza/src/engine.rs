//! The host-facing entry point (spec §4.6 "Host API").
//!
//! Grounded on the teacher's `run.rs` `Runner`/`Executor` split: a parse-once value
//! (here [`Script`]) owning compiled code, run against engine-lifetime state. Unlike the
//! teacher, this runtime has no snapshot/resume machinery to carry (spec §6 "Persisted
//! state: none"), so `Engine` is a much thinner owner of the heap, globals, and natives
//! that must outlive any one script invocation.

use std::{path::PathBuf, rc::Rc, time::Duration};

use crate::{
    bytecode::{Code, Vm},
    capability::SecurityContext,
    error::{ParseError, RuntimeError},
    function::{NativeEntry, NativeFn},
    heap::{Heap, HeapStats},
    helpers,
    namespace::Globals,
    parser,
    resource::{LimitedTracker, NoLimitTracker, ResourceLimits, ResourceTracker},
    tracer::{NoopTracer, VmTracer},
    value::{FunctionRef, NativeId, ScriptValue},
};

/// Builder for [`Engine::create`] (spec §4.6 "Config options").
///
/// Grounded on `resource.rs`'s `ResourceLimits` builder: every field is optional, `None`/
/// `false` meaning "no limit"/"off", each setter consumes and returns `Self`.
pub struct EngineConfig {
    memory_limit: Option<usize>,
    execution_timeout: Option<Duration>,
    max_instructions: Option<u64>,
    max_recursion_depth: Option<usize>,
    allow_io: bool,
    allow_syscalls: bool,
    deterministic: bool,
    use_arena: bool,
    io_allow: Option<Vec<PathBuf>>,
    io_deny: Option<Vec<PathBuf>>,
    /// See DESIGN.md "Strict indexing": not named among spec §4.6's config fields, added
    /// because spec §4.4 makes `IndexGet`'s out-of-bounds behaviour ("or raise IndexError
    /// when strict mode is configured") depend on a knob that has to live somewhere.
    strict_indexing: bool,
    instrumentation: Option<Box<dyn VmTracer>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_limit: None,
            execution_timeout: None,
            max_instructions: None,
            max_recursion_depth: None,
            allow_io: false,
            allow_syscalls: false,
            deterministic: false,
            use_arena: false,
            io_allow: None,
            io_deny: None,
            strict_indexing: false,
            instrumentation: None,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
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

    #[must_use]
    pub fn with_allow_io(mut self, allow: bool) -> Self {
        self.allow_io = allow;
        self
    }

    #[must_use]
    pub fn with_allow_syscalls(mut self, allow: bool) -> Self {
        self.allow_syscalls = allow;
        self
    }

    #[must_use]
    pub fn with_deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    #[must_use]
    pub fn with_use_arena(mut self, use_arena: bool) -> Self {
        self.use_arena = use_arena;
        self
    }

    #[must_use]
    pub fn with_io_allow_list(mut self, paths: Vec<PathBuf>) -> Self {
        self.io_allow = Some(paths);
        self
    }

    #[must_use]
    pub fn with_io_deny_list(mut self, paths: Vec<PathBuf>) -> Self {
        self.io_deny = Some(paths);
        self
    }

    #[must_use]
    pub fn with_strict_indexing(mut self, strict: bool) -> Self {
        self.strict_indexing = strict;
        self
    }

    #[must_use]
    pub fn with_instrumentation(mut self, tracer: Box<dyn VmTracer>) -> Self {
        self.instrumentation = Some(tracer);
        self
    }
}

/// A compiled, runnable script (spec §4.6 `load_script`'s return value).
///
/// Holds an `Rc<Code>` rather than an owned `Code` so [`Engine::call`] can keep a handle
/// to whichever script most recently ran without re-cloning the whole instruction stream
/// (spec §5's single-threaded model means an `Rc` costs nothing here that an `Arc`
/// wouldn't, but nothing requires the cross-thread safety `Arc` buys).
#[derive(Debug, Clone)]
pub struct Script(Rc<Code>);

impl Script {
    #[must_use]
    pub fn code(&self) -> &Code {
        &self.0
    }
}

/// The engine-lifetime owner of the heap, globals, natives, and sandbox policy (spec §4.6).
///
/// One `Engine` executes one script invocation at a time (spec §5); nothing here is
/// `Send`/`Sync`, matching "each with its own allocator wrapper and globals; they do not
/// share state".
pub struct Engine {
    heap: Heap,
    globals: Globals,
    natives: Vec<NativeEntry>,
    security: SecurityContext,
    tracker: Box<dyn ResourceTracker>,
    tracer: Box<dyn VmTracer>,
    strict_indexing: bool,
    /// The most recently run script, kept around so `call` (spec §4.6's "invokes a
    /// script-defined function by name") has an instruction stream to dispatch into —
    /// a global function value's entry index is only meaningful relative to the `Code`
    /// it was compiled in.
    current: Option<Rc<Code>>,
}

impl Engine {
    /// `create(config)` (spec §4.6): allocates the heap, globals, and resource tracker.
    #[must_use]
    pub fn create(config: EngineConfig) -> Self {
        let mut limits = ResourceLimits::new();
        if let Some(bytes) = config.memory_limit {
            limits = limits.with_memory_limit(bytes);
        }
        if let Some(timeout) = config.execution_timeout {
            limits = limits.with_execution_timeout(timeout);
        }
        if let Some(max) = config.max_instructions {
            limits = limits.with_max_instructions(max);
        }
        if let Some(max) = config.max_recursion_depth {
            limits = limits.with_max_recursion_depth(max);
        }
        let needs_ceiling = config.memory_limit.is_some()
            || config.execution_timeout.is_some()
            || config.max_instructions.is_some()
            || config.max_recursion_depth.is_some();
        let tracker: Box<dyn ResourceTracker> = if needs_ceiling {
            Box::new(LimitedTracker::new(limits))
        } else {
            Box::new(NoLimitTracker::new())
        };

        let mut security = SecurityContext::new(config.allow_io, config.allow_syscalls, config.deterministic);
        if let Some(allow) = config.io_allow {
            security = security.with_io_allow_list(allow);
        }
        if let Some(deny) = config.io_deny {
            security = security.with_io_deny_list(deny);
        }

        Self {
            heap: Heap::new(config.use_arena),
            globals: Globals::new(),
            natives: Vec::new(),
            security,
            tracker,
            tracer: config.instrumentation.unwrap_or_else(|| Box::new(NoopTracer)),
            strict_indexing: config.strict_indexing,
            current: None,
        }
    }

    /// `deinit(engine)` (spec §4.6): releases every global's retained aggregate. Natives
    /// and the tracker are dropped with `self`; the arena (if any) is dropped with `heap`.
    pub fn deinit(mut self) -> Result<(), RuntimeError> {
        self.globals.clear(&mut self.heap, self.tracker.as_mut())
    }

    /// `register_function(engine, name, callable)` (spec §4.6). The native is both
    /// appended to the native table (for `Call`/`CallNative` dispatch) and bound as a
    /// global under `name`, so ordinary identifier lookup (`LoadGlobal`) resolves it the
    /// same way a script-defined function would.
    pub fn register_function(&mut self, name: impl Into<String>, func: NativeFn) -> Result<(), RuntimeError> {
        let name = name.into();
        let id = NativeId(u32::try_from(self.natives.len()).expect("native table too large"));
        self.natives.push(NativeEntry { name: name.clone(), func });
        self.globals.set(
            &name,
            ScriptValue::Function(FunctionRef::Native(id)),
            &mut self.heap,
            self.tracker.as_mut(),
        )
    }

    /// `register_helpers(engine)` (spec §4.6, §4.7): installs the standard native battery.
    pub fn register_helpers(&mut self) -> Result<(), RuntimeError> {
        for (name, func) in helpers::all() {
            self.register_function(name, func)?;
        }
        Ok(())
    }

    /// `load_script(engine, source)` (spec §4.6): lexes and parses `source`, returning a
    /// compiled, runnable [`Script`] or a `ParseError`.
    pub fn load_script(&self, source: &str) -> Result<Script, ParseError> {
        let code = parser::parse(source, "<script>")?;
        Ok(Script(Rc::new(code)))
    }

    /// `run(script)` (spec §4.6): executes from entry, returning register 0's value at
    /// `Halt`. May be invoked repeatedly on the same `Script`.
    pub fn run(&mut self, script: &Script) -> Result<ScriptValue, RuntimeError> {
        self.current = Some(Rc::clone(&script.0));
        let code = self.current.as_ref().expect("just set");
        let mut vm = Vm::new(
            code,
            &mut self.heap,
            &mut self.globals,
            &self.natives,
            &self.security,
            self.tracker.as_mut(),
            self.tracer.as_mut(),
            self.strict_indexing,
        );
        vm.run_script()
    }

    /// `call(engine, name, args)` (spec §4.6): invokes a script-defined function bound to
    /// `name` in globals. Requires a prior `run` on this engine — there is otherwise no
    /// instruction stream to resolve the callee's entry point against.
    pub fn call(&mut self, name: &str, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
        let code = self
            .current
            .as_ref()
            .ok_or_else(|| RuntimeError::function_not_found(name))?;
        let mut vm = Vm::new(
            code,
            &mut self.heap,
            &mut self.globals,
            &self.natives,
            &self.security,
            self.tracker.as_mut(),
            self.tracer.as_mut(),
            self.strict_indexing,
        );
        vm.call_by_name(name, args)
    }

    /// `get_global(engine, name)` (spec §4.6).
    #[must_use]
    pub fn get_global(&self, name: &str) -> Option<&ScriptValue> {
        self.globals.get(name)
    }

    /// Names of every bound global, for the CLI's "memory context" diagnostic block
    /// (spec §6), which enumerates globals holding live aggregates on `OutOfMemory`/
    /// `MemoryLimitExceeded`.
    pub fn global_names(&self) -> impl Iterator<Item = &str> {
        self.globals.names()
    }

    /// Reference count of a heap-allocated aggregate, for the same diagnostic block.
    #[must_use]
    pub fn ref_count_of(&self, value: &ScriptValue) -> Option<u32> {
        value.heap_id().map(|id| self.heap.ref_count(id))
    }

    /// An aggregate's element/field count, for the same diagnostic block.
    #[must_use]
    pub fn aggregate_len(&self, value: &ScriptValue) -> Option<usize> {
        match value.heap_id() {
            Some(id) => match self.heap.data(id) {
                crate::heap::HeapData::Array(items) => Some(items.len()),
                crate::heap::HeapData::Table(map) => Some(map.len()),
                crate::heap::HeapData::ScriptFunction(_) => None,
            },
            None => None,
        }
    }

    /// `set_global(engine, name, value)` (spec §4.6): value semantics identical to an
    /// in-script `var` assignment (retains the incoming value, releases the outgoing one).
    pub fn set_global(&mut self, name: &str, value: ScriptValue) -> Result<(), RuntimeError> {
        self.globals.set(name, value, &mut self.heap, self.tracker.as_mut())
    }

    /// Heap occupancy snapshot, for the CLI's "memory context" diagnostic block (spec §6)
    /// and hosts watching for leaked reference cycles (spec §9).
    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_returns_last_expression_value() {
        let mut engine = Engine::create(EngineConfig::new());
        let script = engine.load_script("3 + 4").unwrap();
        let result = engine.run(&script).unwrap();
        assert!(matches!(result, ScriptValue::Number(n) if n == 7.0));
    }

    #[test]
    fn globals_persist_across_runs() {
        let mut engine = Engine::create(EngineConfig::new());
        let script = engine.load_script("var x = 10; var y = 20; x + y * 2").unwrap();
        let result = engine.run(&script).unwrap();
        assert!(matches!(result, ScriptValue::Number(n) if n == 50.0));
        assert!(matches!(engine.get_global("x"), Some(ScriptValue::Number(n)) if *n == 10.0));
    }

    #[test]
    fn recursive_function_and_call_by_name() {
        let mut engine = Engine::create(EngineConfig::new());
        let script = engine
            .load_script(
                "function fib(n) if n < 2 { return n } return fib(n - 1) + fib(n - 2) end",
            )
            .unwrap();
        engine.run(&script).unwrap();
        let result = engine.call("fib", &[ScriptValue::Number(10.0)]).unwrap();
        assert!(matches!(result, ScriptValue::Number(n) if n == 55.0));
    }

    #[test]
    fn deinit_releases_globals() {
        let mut engine = Engine::create(EngineConfig::new());
        let script = engine.load_script("var arr = [1, 2, 3]").unwrap();
        engine.run(&script).unwrap();
        assert_eq!(engine.heap_stats().live_objects, 1);
        engine.deinit().unwrap();
    }

    #[test]
    fn execution_timeout_on_infinite_loop() {
        let mut engine = Engine::create(EngineConfig::new().with_max_instructions(10_000));
        let script = engine.load_script("while true do end").unwrap();
        let err = engine.run(&script).unwrap_err();
        assert_eq!(err.kind, crate::error::RuntimeErrorKind::ExecutionTimeout);
    }
}
