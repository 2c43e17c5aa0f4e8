//! `ScriptValue`: the tagged union that crosses the VM/host boundary (spec §3).
//!
//! Deliberately a single value type, unlike the teacher's internal-`Value`/host-facing-
//! `Object` split (`value.rs`/`object.rs`) — spec §3 is explicit that `ScriptValue` is
//! "the only value type crossing the VM/host boundary", so there is nothing to keep
//! separate.

use std::fmt;

use crate::heap::HeapId;

/// Identifies a registered native function by its slot in the engine's native table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeId(pub u32);

/// The `function` variant's payload: either a host-registered native or a script-defined
/// closure over a bytecode range (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionRef {
    Native(NativeId),
    /// Heap id of a `HeapData::ScriptFunction` aggregate.
    Script(HeapId),
}

/// A runtime value. Primitives (`Nil`, `Bool`, `Number`) are copied freely; `Str` is
/// always independently owned (spec §3: "always copied on ownership transfer; no
/// interning, no ref counting"); `Array`/`Table`/script `Function` are reference-counted
/// aggregates living on the engine's [`crate::heap::Heap`], referenced here by
/// [`HeapId`].
///
/// `Clone` is intentionally not derived for the aggregate-bearing path: cloning a
/// `ScriptValue` that holds a `HeapId` does not bump its reference count, so call sites
/// must route through [`crate::heap::Heap::retain_into_slot`] instead of `.clone()`
/// whenever the clone is going to live on past the original's slot being overwritten.
/// Primitive variants and `Native` function refs are cheap to copy directly.
#[derive(Debug)]
pub enum ScriptValue {
    Nil,
    Bool(bool),
    /// There is no separate integer variant; array/table indices are coerced from this
    /// `f64` by truncating toward zero (`bytecode::vm::collections::array_index`), with
    /// `TypeError` raised instead of truncating when that wouldn't identify a sound
    /// integer: non-finite values, or a magnitude beyond `f64`'s exact-integer range
    /// (±2^53). Numeric-for loop counters are not coerced at all — they stay `f64`
    /// through the whole loop and are only ever truncated at the point an index
    /// expression actually uses one to index an array.
    Number(f64),
    Str(String),
    Array(HeapId),
    Table(HeapId),
    Function(FunctionRef),
}

impl ScriptValue {
    /// Truthiness per spec §4.3: only `nil` and `false` are falsy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Self::Nil | Self::Bool(false))
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::Array(_) => "array",
            Self::Table(_) => "table",
            Self::Function(_) => "function",
        }
    }

    /// `true` if this slot holds a heap-allocated aggregate needing retain/release.
    #[must_use]
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Self::Array(_) | Self::Table(_) | Self::Function(FunctionRef::Script(_)))
    }

    #[must_use]
    pub fn heap_id(&self) -> Option<HeapId> {
        match self {
            Self::Array(id) | Self::Table(id) => Some(*id),
            Self::Function(FunctionRef::Script(id)) => Some(*id),
            _ => None,
        }
    }

    /// Copies a primitive or function-ref value. Panics on `Str`/`Array`/`Table` — those
    /// must go through `Heap::retain_value`/explicit duplication, never an implicit copy.
    #[must_use]
    pub fn copy_immediate(&self) -> Self {
        match self {
            Self::Nil => Self::Nil,
            Self::Bool(b) => Self::Bool(*b),
            Self::Number(n) => Self::Number(*n),
            Self::Function(f) => Self::Function(*f),
            Self::Str(_) | Self::Array(_) | Self::Table(_) => {
                panic!("copy_immediate called on a value requiring retain/duplicate: {self:?}")
            }
        }
    }

    /// Equality per spec §4.3: numbers by IEEE rules (`NaN != NaN`), strings by bytes,
    /// booleans/nil by identity, aggregates by reference identity (not structural).
    #[must_use]
    pub fn script_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Array(a), Self::Array(b)) | (Self::Table(a), Self::Table(b)) => a == b,
            (Self::Function(FunctionRef::Native(a)), Self::Function(FunctionRef::Native(b))) => a == b,
            (Self::Function(FunctionRef::Script(a)), Self::Function(FunctionRef::Script(b))) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("nil"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Array(_) => f.write_str("<array>"),
            Self::Table(_) => f.write_str("<table>"),
            Self::Function(_) => f.write_str("<function>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_matches_spec() {
        assert!(!ScriptValue::Nil.is_truthy());
        assert!(!ScriptValue::Bool(false).is_truthy());
        assert!(ScriptValue::Bool(true).is_truthy());
        assert!(ScriptValue::Number(0.0).is_truthy());
        assert!(ScriptValue::Str(String::new()).is_truthy());
    }

    #[test]
    fn nan_is_not_equal_to_itself() {
        let nan = ScriptValue::Number(f64::NAN);
        assert!(!nan.script_eq(&ScriptValue::Number(f64::NAN)));
    }
}
