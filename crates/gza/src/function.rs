//! Host-registered native callables (spec §4.6 "register_function", §3 "function").

use crate::{capability::SecurityContext, error::RuntimeError, heap::Heap, resource::ResourceTracker, value::ScriptValue};

/// Everything a native callable needs besides its argument slice: the heap (to allocate
/// return aggregates), the resource tracker (allocations still count against the
/// script's budget, per spec §4.5 "Natives that need scratch memory must acquire it
/// through the same path"), and the security context (to gate capability checks).
pub struct NativeContext<'a> {
    pub heap: &'a mut Heap,
    pub tracker: &'a mut dyn ResourceTracker,
    pub security: &'a SecurityContext,
}

/// A host-supplied function registered by name and invokable from scripts.
///
/// Receives a borrowed slice of arguments and returns a single `ScriptValue`; ownership
/// of any returned aggregate transfers to the caller (spec §4.6).
pub type NativeFn = Box<dyn Fn(&mut NativeContext, &[ScriptValue]) -> Result<ScriptValue, RuntimeError>>;

/// A registered native, with the name used for `FunctionNotFound`/diagnostic reporting.
pub struct NativeEntry {
    pub name: String,
    pub func: NativeFn,
}
