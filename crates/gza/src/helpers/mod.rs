//! The standard native battery (spec §4.6 `register_helpers`, §4.7 "Standard helpers").
//!
//! Grounded on the *shape* of the teacher's `modules/string_mod.rs`/`modules/re.rs`: one
//! native function per operation, registered by name, gated on the security context at
//! the call boundary where relevant. The pattern engine itself is freshly hand-written
//! (see [`pattern`]) rather than wrapping a regex crate, which this spec's "traditional
//! minimalist patterns, not full regular expressions" framing rules out.

pub mod array_helpers;
pub mod convert;
pub mod pattern;
pub mod string_helpers;
pub mod table_helpers;

use crate::{error::RuntimeError, function::NativeFn, value::ScriptValue};

/// Raises `ArityMismatch` unless exactly `expected` arguments were passed. Ordinary
/// script-to-script calls pad/drop arguments silently (see DESIGN.md); these natives
/// declare a fixed, host-checked arity instead, per the same note.
pub(crate) fn check_arity(args: &[ScriptValue], expected: usize) -> Result<(), RuntimeError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(RuntimeError::arity_mismatch(expected, args.len()))
    }
}

pub(crate) fn expect_str<'a>(args: &'a [ScriptValue], idx: usize) -> Result<&'a str, RuntimeError> {
    match &args[idx] {
        ScriptValue::Str(s) => Ok(s.as_str()),
        other => Err(RuntimeError::type_error(format!(
            "expected a string argument, found {}",
            other.type_name()
        ))),
    }
}

pub(crate) fn expect_number(args: &[ScriptValue], idx: usize) -> Result<f64, RuntimeError> {
    match &args[idx] {
        ScriptValue::Number(n) => Ok(*n),
        other => Err(RuntimeError::type_error(format!(
            "expected a number argument, found {}",
            other.type_name()
        ))),
    }
}

/// All standard helpers in one flat list, installed by `Engine::register_helpers`.
pub fn all() -> Vec<(&'static str, NativeFn)> {
    let mut natives = Vec::new();
    natives.extend(string_helpers::register());
    natives.extend(array_helpers::register());
    natives.extend(table_helpers::register());
    natives.extend(convert::register());
    natives
}
