//! The closed error taxonomy the runtime surfaces to the host.
//!
//! Every failure mode named in the spec's error handling section maps to exactly one
//! variant here. Nothing is caught or recovered internally — there is no language-level
//! `try`/`catch` — so this is also the shape every `run`/`call`/`load_script` result takes.

use std::fmt;

use strum::{Display, EnumString, IntoStaticStr};

/// A 1-based line/column span in the original source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodeLoc {
    pub line: u32,
    pub column: u32,
}

impl CodeLoc {
    #[must_use]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for CodeLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// The closed set of runtime error kinds from the spec's error handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
pub enum RuntimeErrorKind {
    TypeError,
    IndexError,
    UndefinedVariable,
    FunctionNotFound,
    NotAFunction,
    ArityMismatch,
    DivisionByZero,
    StackOverflow,
    MemoryLimitExceeded,
    ExecutionTimeout,
    SecurityViolation,
    OutOfMemory,
}

/// Where in the running script an error occurred, for the "last opcode and function name"
/// reporting requirement in the spec's user-visible behaviour section.
#[derive(Debug, Clone, Default)]
pub struct RuntimeContext {
    /// Name of the function the error occurred in, or `None` for top-level script code.
    pub function_name: Option<String>,
    /// Name of the opcode being dispatched when the error occurred.
    pub last_opcode: Option<&'static str>,
    /// Instruction index within the script's instruction stream.
    pub instruction_index: Option<u32>,
}

/// A runtime error with enough context to print a useful diagnostic.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub message: String,
    pub context: RuntimeContext,
}

impl RuntimeError {
    #[must_use]
    pub fn new(kind: RuntimeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: RuntimeContext::default(),
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: RuntimeContext) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::TypeError, message)
    }

    #[must_use]
    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::IndexError, message)
    }

    #[must_use]
    pub fn undefined_variable(name: &str) -> Self {
        Self::new(RuntimeErrorKind::UndefinedVariable, format!("undefined variable '{name}'"))
    }

    #[must_use]
    pub fn function_not_found(name: &str) -> Self {
        Self::new(RuntimeErrorKind::FunctionNotFound, format!("no function named '{name}'"))
    }

    #[must_use]
    pub fn not_a_function() -> Self {
        Self::new(RuntimeErrorKind::NotAFunction, "value is not callable")
    }

    #[must_use]
    pub fn arity_mismatch(expected: usize, got: usize) -> Self {
        Self::new(
            RuntimeErrorKind::ArityMismatch,
            format!("expected {expected} argument(s), got {got}"),
        )
    }

    #[must_use]
    pub fn division_by_zero() -> Self {
        Self::new(RuntimeErrorKind::DivisionByZero, "division or modulo by zero")
    }

    #[must_use]
    pub fn stack_overflow(depth: usize) -> Self {
        Self::new(RuntimeErrorKind::StackOverflow, format!("call depth exceeded {depth}"))
    }

    #[must_use]
    pub fn security_violation(operation: &str, capability: &str) -> Self {
        Self::new(
            RuntimeErrorKind::SecurityViolation,
            format!("{operation} denied (requires capability '{capability}')"),
        )
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(func) = &self.context.function_name {
            write!(f, " (in function '{func}'")?;
        } else if self.context.last_opcode.is_some() {
            write!(f, " (at top level")?;
        }
        if let Some(op) = self.context.last_opcode {
            let sep = if self.context.function_name.is_some() { ", " } else { "" };
            write!(f, "{sep}last opcode {op}")?;
        }
        if self.context.function_name.is_some() || self.context.last_opcode.is_some() {
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

/// Malformed source text: a lexical or syntactic error.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub loc: CodeLoc,
}

impl ParseError {
    #[must_use]
    pub fn new(message: impl Into<String>, loc: CodeLoc) -> Self {
        Self {
            message: message.into(),
            loc,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParseError at {}: {}", self.loc, self.message)
    }
}

impl std::error::Error for ParseError {}

/// The single error type returned from the Host API: either a compile-time failure from
/// `load_script`, or a runtime failure from `run`/`call`.
#[derive(Debug, Clone)]
pub enum GzaError {
    Parse(ParseError),
    Runtime(RuntimeError),
}

impl fmt::Display for GzaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "{e}"),
            Self::Runtime(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for GzaError {}

impl From<ParseError> for GzaError {
    fn from(e: ParseError) -> Self {
        Self::Parse(e)
    }
}

impl From<RuntimeError> for GzaError {
    fn from(e: RuntimeError) -> Self {
        Self::Runtime(e)
    }
}

pub type RunResult<T> = Result<T, RuntimeError>;
