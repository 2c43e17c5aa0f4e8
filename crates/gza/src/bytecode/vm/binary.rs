//! Arithmetic, comparison, and logical opcode handlers (spec §4.4 "Arithmetic/comparison").

use crate::{
    bytecode::{op::Instruction, op::Opcode},
    error::RuntimeError,
    value::ScriptValue,
};

use super::Vm;

fn as_number(value: &ScriptValue, op: &str) -> Result<f64, RuntimeError> {
    match value {
        ScriptValue::Number(n) => Ok(*n),
        other => Err(RuntimeError::type_error(format!(
            "{op} expects a number, found {}",
            other.type_name()
        ))),
    }
}

fn as_str(value: &ScriptValue, op: &str) -> Result<&str, RuntimeError> {
    match value {
        ScriptValue::Str(s) => Ok(s.as_str()),
        other => Err(RuntimeError::type_error(format!(
            "{op} expects a string, found {}",
            other.type_name()
        ))),
    }
}

impl<'a> Vm<'a> {
    pub(crate) fn exec_binary(&mut self, op: Opcode, instr: Instruction) -> Result<(), RuntimeError> {
        let lhs = self.reg(instr.b);
        let rhs = self.reg(instr.c);
        let result = match op {
            Opcode::Add => ScriptValue::Number(as_number(lhs, "+")? + as_number(rhs, "+")?),
            Opcode::Sub => ScriptValue::Number(as_number(lhs, "-")? - as_number(rhs, "-")?),
            Opcode::Mul => ScriptValue::Number(as_number(lhs, "*")? * as_number(rhs, "*")?),
            Opcode::Div => {
                let (l, r) = (as_number(lhs, "/")?, as_number(rhs, "/")?);
                if r == 0.0 {
                    return Err(RuntimeError::division_by_zero());
                }
                ScriptValue::Number(l / r)
            }
            Opcode::Mod => {
                let (l, r) = (as_number(lhs, "%")?, as_number(rhs, "%")?);
                if r == 0.0 {
                    return Err(RuntimeError::division_by_zero());
                }
                ScriptValue::Number(l % r)
            }
            Opcode::Concat => {
                let mut joined = String::with_capacity(as_str(lhs, "..")?.len() + as_str(rhs, "..")?.len());
                joined.push_str(as_str(lhs, "..")?);
                joined.push_str(as_str(rhs, "..")?);
                return self.store_owned_string(instr.a, joined);
            }
            Opcode::Eq => ScriptValue::Bool(lhs.script_eq(rhs)),
            Opcode::Neq => ScriptValue::Bool(!lhs.script_eq(rhs)),
            Opcode::Lt => ScriptValue::Bool(compare(lhs, rhs)? == std::cmp::Ordering::Less),
            Opcode::Le => ScriptValue::Bool(compare(lhs, rhs)? != std::cmp::Ordering::Greater),
            Opcode::Gt => ScriptValue::Bool(compare(lhs, rhs)? == std::cmp::Ordering::Greater),
            Opcode::Ge => ScriptValue::Bool(compare(lhs, rhs)? != std::cmp::Ordering::Less),
            Opcode::And => ScriptValue::Bool(lhs.is_truthy() && rhs.is_truthy()),
            Opcode::Or => ScriptValue::Bool(lhs.is_truthy() || rhs.is_truthy()),
            other => unreachable!("{other:?} is not a binary opcode"),
        };
        self.set_reg(instr.a, result)
    }

    pub(crate) fn exec_unary(&mut self, op: Opcode, instr: Instruction) -> Result<(), RuntimeError> {
        let operand = self.reg(instr.b);
        let result = match op {
            Opcode::Neg => ScriptValue::Number(-as_number(operand, "unary -")?),
            Opcode::Not => ScriptValue::Bool(!operand.is_truthy()),
            other => unreachable!("{other:?} is not a unary opcode"),
        };
        self.set_reg(instr.a, result)
    }

    fn store_owned_string(&mut self, dest: u32, s: String) -> Result<(), RuntimeError> {
        let value = self.heap.adopt_string(s, self.tracker)?;
        self.set_reg(dest, value)
    }
}

fn compare(lhs: &ScriptValue, rhs: &ScriptValue) -> Result<std::cmp::Ordering, RuntimeError> {
    match (lhs, rhs) {
        (ScriptValue::Number(a), ScriptValue::Number(b)) => {
            a.partial_cmp(b).ok_or_else(|| RuntimeError::type_error("cannot order NaN"))
        }
        (ScriptValue::Str(a), ScriptValue::Str(b)) => Ok(a.cmp(b)),
        _ => Err(RuntimeError::type_error(format!(
            "cannot compare {} with {}",
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}
