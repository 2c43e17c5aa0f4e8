//! Array/table construction and indexing (spec §4.4 "Aggregate construction", "Indexing").

use crate::{
    bytecode::op::Instruction,
    error::RuntimeError,
    heap::{HeapData, ScriptFunction},
    value::{FunctionRef, ScriptValue},
};

use super::Vm;

/// The upper bound (inclusive) of `f64`'s exact-integer range; beyond this, adjacent
/// floats are more than 1 apart, so truncation no longer identifies a single integer.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0; // 2^53

/// Coerces an index value to `usize`, truncating a fractional number toward zero (spec
/// §9 "default integer semantics"). Raises `TypeError` rather than silently truncating
/// when truncation can't mean anything sound: `NaN`/`inf`, or a magnitude beyond `f64`'s
/// exact-integer range. A negative result (after truncation) is an `IndexError`, not a
/// `TypeError`, matching the existing out-of-bounds diagnostics below.
fn array_index(value: &ScriptValue) -> Result<usize, RuntimeError> {
    match value {
        ScriptValue::Number(n) => {
            if !n.is_finite() {
                return Err(RuntimeError::type_error(format!("array index must be finite, found {n}")));
            }
            if n.abs() > MAX_EXACT_INTEGER {
                return Err(RuntimeError::type_error(format!("array index {n} exceeds the exact-integer range")));
            }
            let truncated = n.trunc();
            if truncated < 0.0 {
                return Err(RuntimeError::index_error("array index must be non-negative"));
            }
            Ok(truncated as usize)
        }
        other => Err(RuntimeError::type_error(format!(
            "array index must be a number, found {}",
            other.type_name()
        ))),
    }
}

fn table_key(value: &ScriptValue) -> Result<String, RuntimeError> {
    match value {
        ScriptValue::Str(s) => Ok(s.clone()),
        other => Err(RuntimeError::type_error(format!(
            "table key must be a string, found {}",
            other.type_name()
        ))),
    }
}

impl<'a> Vm<'a> {
    pub(crate) fn exec_new_array(&mut self, instr: Instruction) -> Result<(), RuntimeError> {
        let id = self.heap.new_array(instr.b as usize, self.tracker)?;
        self.set_reg(instr.a, ScriptValue::Array(id))
    }

    pub(crate) fn exec_array_push(&mut self, instr: Instruction) -> Result<(), RuntimeError> {
        let heap_id = self
            .reg(instr.a)
            .heap_id()
            .ok_or_else(|| RuntimeError::type_error("ArrayPush target is not an array"))?;
        let value = self.read_reg_owned(instr.b)?;
        match self.heap.data_mut(heap_id) {
            HeapData::Array(items) => {
                items.push(value);
                Ok(())
            }
            _ => Err(RuntimeError::type_error("ArrayPush target is not an array")),
        }
    }

    /// Materializes a script-function value closing over prototype `functions[b]`,
    /// registered by the parser via `CodeBuilder::add_function`.
    pub(crate) fn exec_load_function(&mut self, instr: Instruction) -> Result<(), RuntimeError> {
        let proto = &self.code.functions[instr.b as usize];
        let func = ScriptFunction {
            name: proto.name.clone(),
            entry: proto.entry,
            param_count: proto.param_count,
            register_count: proto.register_count,
        };
        let id = self.heap.new_script_function(func, self.tracker)?;
        self.set_reg(instr.a, ScriptValue::Function(FunctionRef::Script(id)))
    }

    pub(crate) fn exec_new_table(&mut self, instr: Instruction) -> Result<(), RuntimeError> {
        let id = self.heap.new_table(self.tracker)?;
        self.set_reg(instr.a, ScriptValue::Table(id))
    }

    pub(crate) fn exec_table_set(&mut self, instr: Instruction) -> Result<(), RuntimeError> {
        let heap_id = self
            .reg(instr.a)
            .heap_id()
            .ok_or_else(|| RuntimeError::type_error("TableSet target is not a table"))?;
        let key = table_key(self.reg(instr.b))?;
        let value = self.read_reg_owned(instr.c)?;
        let old = match self.heap.data_mut(heap_id) {
            HeapData::Table(map) => map.insert(key, value),
            _ => return Err(RuntimeError::type_error("TableSet target is not a table")),
        };
        if let Some(old) = old {
            self.heap.release_value(old, self.tracker)?;
        }
        Ok(())
    }

    pub(crate) fn exec_index_get(&mut self, instr: Instruction) -> Result<(), RuntimeError> {
        let container = self.reg(instr.b).heap_id();
        let container_kind = self.reg(instr.b).type_name();
        let key_is_array = matches!(self.reg(instr.b), ScriptValue::Array(_));
        let result = match container {
            Some(id) if key_is_array => {
                let idx = array_index(self.reg(instr.c))?;
                match self.heap.array_get_retained(id, idx, self.tracker)? {
                    Some(v) => v,
                    None if self.strict_indexing => {
                        return Err(RuntimeError::index_error(format!("index {idx} out of bounds")));
                    }
                    None => ScriptValue::Nil,
                }
            }
            Some(id) => {
                let key = table_key(self.reg(instr.c))?;
                self.heap.table_get_retained(id, &key, self.tracker)?.unwrap_or(ScriptValue::Nil)
            }
            None => return Err(RuntimeError::type_error(format!("cannot index a {container_kind}"))),
        };
        self.set_reg(instr.a, result)
    }

    pub(crate) fn exec_index_set(&mut self, instr: Instruction) -> Result<(), RuntimeError> {
        let is_array = matches!(self.reg(instr.a), ScriptValue::Array(_));
        let container_kind = self.reg(instr.a).type_name();
        let heap_id = self
            .reg(instr.a)
            .heap_id()
            .ok_or_else(|| RuntimeError::type_error(format!("cannot index-assign a {container_kind}")))?;
        if is_array {
            let idx = array_index(self.reg(instr.b))?;
            let value = self.read_reg_owned(instr.c)?;
            let old = match self.heap.data_mut(heap_id) {
                HeapData::Array(items) => {
                    if idx < items.len() {
                        Some(std::mem::replace(&mut items[idx], value))
                    } else if idx == items.len() {
                        items.push(value);
                        None
                    } else {
                        return Err(RuntimeError::index_error(format!(
                            "index {idx} is beyond array length {}",
                            items.len()
                        )));
                    }
                }
                _ => return Err(RuntimeError::type_error("IndexSet target is not an array")),
            };
            if let Some(old) = old {
                self.heap.release_value(old, self.tracker)?;
            }
            Ok(())
        } else {
            let key = table_key(self.reg(instr.b))?;
            let value = self.read_reg_owned(instr.c)?;
            let old = match self.heap.data_mut(heap_id) {
                HeapData::Table(map) => map.insert(key, value),
                _ => return Err(RuntimeError::type_error("IndexSet target is not a table")),
            };
            if let Some(old) = old {
                self.heap.release_value(old, self.tracker)?;
            }
            Ok(())
        }
    }

    pub(crate) fn exec_field_get(&mut self, instr: Instruction) -> Result<(), RuntimeError> {
        let heap_id = self
            .reg(instr.b)
            .heap_id()
            .ok_or_else(|| RuntimeError::type_error("field access on a non-table value"))?;
        let field = self.const_str(instr.c)?.to_owned();
        let result = self.heap.table_get_retained(heap_id, &field, self.tracker)?.unwrap_or(ScriptValue::Nil);
        self.set_reg(instr.a, result)
    }

    pub(crate) fn exec_field_set(&mut self, instr: Instruction) -> Result<(), RuntimeError> {
        let heap_id = self
            .reg(instr.a)
            .heap_id()
            .ok_or_else(|| RuntimeError::type_error("field assignment on a non-table value"))?;
        let field = self.const_str(instr.b)?.to_owned();
        let value = self.read_reg_owned(instr.c)?;
        let old = match self.heap.data_mut(heap_id) {
            HeapData::Table(map) => map.insert(field, value),
            _ => return Err(RuntimeError::type_error("field assignment on a non-table value")),
        };
        if let Some(old) = old {
            self.heap.release_value(old, self.tracker)?;
        }
        Ok(())
    }

    /// Initializes a generic-for iterator (spec §9 "Ambiguity in generic for", resolved as
    /// a function/state/control triple, Lua-style): registers `b`, `b+1`, `b+2` hold the
    /// iterator function, initial state, and initial control value; they are copied into
    /// registers `a`, `a+1`, `a+2` where they persist across `IterNext` calls.
    pub(crate) fn exec_iter_init(&mut self, instr: Instruction) -> Result<(), RuntimeError> {
        for offset in 0..3 {
            let value = self.read_reg_owned(instr.b + offset)?;
            self.set_reg(instr.a + offset, value)?;
        }
        Ok(())
    }

    /// Advances the iterator triple stored at register `a`: calls the function with
    /// (state, control), and if the first result is `nil` the loop is exhausted and
    /// control jumps to instruction `c`; otherwise the control value is updated and the
    /// result(s) are stored starting at register `b`.
    pub(crate) fn exec_iter_next(&mut self, instr: Instruction) -> Result<(), RuntimeError> {
        let func = match self.reg(instr.a) {
            ScriptValue::Function(f) => *f,
            other => return Err(RuntimeError::type_error(format!("iterator is not callable: {}", other.type_name()))),
        };
        let state = self.read_reg_owned(instr.a + 1)?;
        let control = self.read_reg_owned(instr.a + 2)?;
        let args = [state, control];
        let result = self.invoke_as_boundary(func, &args)?;
        for arg in args {
            self.heap.release_value(arg, self.tracker)?;
        }
        if matches!(result, ScriptValue::Nil) {
            self.ip = instr.c;
            self.heap.release_value(result, self.tracker)
        } else {
            let control_copy = self.heap.retain_into_slot(&result, self.tracker)?;
            self.set_reg(instr.a + 2, control_copy)?;
            self.set_reg(instr.b, result)
        }
    }
}
