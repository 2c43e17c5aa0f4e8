//! The compiled output of a script: an immutable instruction stream plus constant pool
//! (spec §3 "Instruction stream", "Constant pool").

use crate::{bytecode::op::Instruction, error::CodeLoc};

/// A constant-pool entry. Only primitive literals are pooled; aggregates are built by
/// instructions at run time.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Nil,
    Bool(bool),
    Number(f64),
    Str(String),
}

/// A function's prototype: where its body starts in the shared instruction stream, how
/// many parameters it takes, and how large its register file must be.
///
/// Script functions don't capture outer locals (spec §3 describes a function value as
/// "a closure over a bytecode range, parameter count, and captured constant pool" — the
/// constant pool is already script-wide, so there is nothing else to capture).
#[derive(Debug, Clone)]
pub struct FunctionProto {
    pub name: Option<String>,
    pub entry: u32,
    pub param_count: u32,
    pub register_count: u32,
}

/// Maps an instruction index back to a source location, for runtime error reporting.
#[derive(Debug, Clone, Copy)]
pub struct LocationEntry {
    pub instruction_index: u32,
    pub loc: CodeLoc,
}

/// A compiled script: instruction stream, constant pool, function prototypes, and
/// enough source-location metadata to report a line/column on a runtime error.
///
/// Immutable after parsing and shared by every invocation of the script (spec §3:
/// "The stream is immutable after parsing and shared (by borrow) with every execution").
#[derive(Debug, Clone)]
pub struct Code {
    pub source_name: String,
    pub instructions: Vec<Instruction>,
    pub constants: Vec<ConstValue>,
    pub functions: Vec<FunctionProto>,
    pub locations: Vec<LocationEntry>,
    /// Register count needed for the top-level script body (register 0 is the
    /// "last expression" slot returned to the host at `Halt`, per spec §3).
    pub top_level_register_count: u32,
}

impl Code {
    /// Looks up the nearest known source location at or before `instruction_index`, for
    /// diagnostics (binary search over the sorted `locations` table).
    #[must_use]
    pub fn location_for(&self, instruction_index: u32) -> Option<CodeLoc> {
        match self
            .locations
            .binary_search_by_key(&instruction_index, |entry| entry.instruction_index)
        {
            Ok(idx) => Some(self.locations[idx].loc),
            Err(0) => None,
            Err(idx) => Some(self.locations[idx - 1].loc),
        }
    }
}
