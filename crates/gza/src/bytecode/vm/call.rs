//! Call, native invocation, and return (spec §4.4 "Calls", "Return", §4.6 "Host API").

use smallvec::SmallVec;

use crate::{
    bytecode::op::{Instruction, NO_REGISTER},
    capability::SecurityContext,
    error::RuntimeError,
    function::{NativeContext, NativeEntry},
    heap::{Heap, HeapData, HeapId},
    resource::ResourceTracker,
    value::{FunctionRef, NativeId, ScriptValue},
};

/// Most calls pass a handful of arguments; inlining up to 4 avoids a heap allocation per
/// call for the common case (the teacher makes the same bet for its VM-hot collections).
type ArgBuf = SmallVec<[ScriptValue; 4]>;

use super::Vm;

/// Invokes a registered native by id with a borrowed argument slice (spec §4.4
/// "CALL_NATIVE invokes a registered function pointer with a borrowed slice of
/// arguments"). A free function, not a `Vm` method, so its `args` parameter can borrow
/// directly from `Vm::registers` without the whole-`self` borrow a method would require.
fn call_native(
    natives: &[NativeEntry],
    id: NativeId,
    args: &[ScriptValue],
    heap: &mut Heap,
    tracker: &mut dyn ResourceTracker,
    security: &SecurityContext,
) -> Result<ScriptValue, RuntimeError> {
    let entry = natives
        .get(id.0 as usize)
        .ok_or_else(|| RuntimeError::function_not_found("<native>"))?;
    let mut ctx = NativeContext { heap, tracker, security };
    (entry.func)(&mut ctx, args)
}

impl<'a> Vm<'a> {
    /// `a = call(registers[b], argc=c)`: the callee is read from a register, so it may
    /// be either a native or a script function (spec §4.4).
    pub(crate) fn exec_call(&mut self, instr: Instruction) -> Result<Option<ScriptValue>, RuntimeError> {
        let func = match self.reg(instr.b) {
            ScriptValue::Function(f) => *f,
            _ => return Err(RuntimeError::not_a_function()),
        };
        let argc = instr.c;
        match func {
            FunctionRef::Native(id) => {
                let base = self.base();
                let from = (base + instr.b + 1) as usize;
                let to = from + argc as usize;
                let result = call_native(self.natives, id, &self.registers[from..to], self.heap, self.tracker, self.security)?;
                self.set_reg(instr.a, result)?;
                Ok(None)
            }
            FunctionRef::Script(heap_id) => {
                let mut args: ArgBuf = SmallVec::with_capacity(argc as usize);
                for offset in 0..argc {
                    args.push(self.read_reg_owned(instr.b + 1 + offset)?);
                }
                self.push_script_frame(heap_id, args, instr.a, false)?;
                Ok(None)
            }
        }
    }

    /// `a = call_native(natives[b], argc=c)`: the native is addressed directly by table
    /// index rather than through a register (spec §4.4). The included parser always
    /// emits the generic `Call` instead (it has no compile-time view of which natives an
    /// engine will register), but the opcode is fully supported for hosts or alternative
    /// front ends that resolve native bindings statically.
    pub(crate) fn exec_call_native(&mut self, instr: Instruction) -> Result<Option<ScriptValue>, RuntimeError> {
        let argc = instr.c;
        let base = self.base();
        let from = (base + instr.a + 1) as usize;
        let to = from + argc as usize;
        let id = NativeId(instr.b);
        let result = call_native(self.natives, id, &self.registers[from..to], self.heap, self.tracker, self.security)?;
        self.set_reg(instr.a, result)?;
        Ok(None)
    }

    /// Copies the returned value out, releases every register the returning frame owned,
    /// and either resumes the caller (ordinary frame), stops the dispatch loop (boundary
    /// frame pushed by [`Vm::invoke_as_boundary`]), or, with no frame at all, ends a
    /// top-level `return` the same way `Halt` would.
    pub(crate) fn exec_return(&mut self, instr: Instruction) -> Result<Option<ScriptValue>, RuntimeError> {
        let value = if instr.a == NO_REGISTER {
            ScriptValue::Nil
        } else {
            self.read_reg_owned(instr.a)?
        };
        // A `return` at top level (no enclosing call frame) ends the run with this value,
        // the same as falling off the end or hitting `Halt`, rather than panicking.
        let Some(frame) = self.frames.pop() else {
            for v in self.registers.drain(..) {
                self.heap.release_value(v, self.tracker)?;
            }
            return Ok(Some(value));
        };
        let base = frame.register_base as usize;
        for v in self.registers.drain(base..) {
            self.heap.release_value(v, self.tracker)?;
        }
        if frame.is_boundary {
            Ok(Some(value))
        } else {
            self.ip = frame.return_ip;
            self.tracer.on_return(self.frames.len());
            self.set_reg(frame.dest_register, value)?;
            Ok(None)
        }
    }

    /// Pushes a call frame for a script function: binds `args` (already owned/retained
    /// copies) into the callee's first registers, padding missing parameters with `nil`
    /// and releasing any surplus (spec doesn't mandate `ArityMismatch` for ordinary
    /// calls — only native helpers that declare a fixed arity raise it; see DESIGN.md).
    pub(crate) fn push_script_frame(
        &mut self,
        heap_id: HeapId,
        args: ArgBuf,
        dest_register: u32,
        is_boundary: bool,
    ) -> Result<(), RuntimeError> {
        let proto = match self.heap.data(heap_id) {
            HeapData::ScriptFunction(f) => f.clone(),
            _ => return Err(RuntimeError::not_a_function()),
        };
        self.tracker.check_recursion_depth(self.frames.len())?;
        let base = u32::try_from(self.registers.len()).expect("register stack too large");
        self.registers.resize(base as usize + proto.register_count as usize, ScriptValue::Nil);

        let param_count = proto.param_count as usize;
        let mut args = args;
        for (i, slot) in args.iter_mut().enumerate().take(param_count) {
            self.registers[base as usize + i] = std::mem::replace(slot, ScriptValue::Nil);
        }
        for extra in args.into_iter().skip(param_count) {
            self.heap.release_value(extra, self.tracker)?;
        }

        let return_ip = self.ip;
        self.tracer.on_call(proto.name.as_deref(), self.frames.len() + 1);
        self.frames.push(super::Frame {
            return_ip,
            register_base: base,
            register_count: proto.register_count,
            dest_register,
            function_name: proto.name,
            is_boundary,
        });
        self.ip = proto.entry;
        Ok(())
    }

    /// Invokes `func` with `args` and runs it to completion, independent of any
    /// currently-executing script. Used by [`Vm::call_by_name`] (Host API `call`) and by
    /// the generic-for iterator protocol, which needs a synchronous result to test for
    /// exhaustion rather than resuming the enclosing script afterward.
    pub(crate) fn invoke_as_boundary(&mut self, func: FunctionRef, args: &[ScriptValue]) -> Result<ScriptValue, RuntimeError> {
        match func {
            FunctionRef::Native(id) => call_native(self.natives, id, args, self.heap, self.tracker, self.security),
            FunctionRef::Script(heap_id) => {
                let mut owned: ArgBuf = SmallVec::with_capacity(args.len());
                for v in args {
                    owned.push(self.heap.retain_into_slot(v, self.tracker)?);
                }
                self.push_script_frame(heap_id, owned, NO_REGISTER, true)?;
                self.dispatch_loop()
            }
        }
    }
}
