//! `gza`: an embeddable, sandboxed scripting runtime.
//!
//! A script is lexed and parsed straight into register-based bytecode (no retained AST),
//! then run by a bounded-resource virtual machine. The host embeds the runtime through
//! [`engine::Engine`]: load a script, run it, register native callables, and read/write
//! globals between runs.

pub mod bytecode;
pub mod capability;
pub mod engine;
pub mod error;
pub mod function;
pub mod heap;
pub mod helpers;
pub mod lexer;
pub mod namespace;
pub mod parser;
pub mod resource;
pub mod tracer;
pub mod value;

pub use capability::SecurityContext;
pub use engine::{Engine, EngineConfig, Script};
pub use error::{CodeLoc, GzaError, ParseError, RuntimeError, RuntimeErrorKind};
pub use function::{NativeContext, NativeFn};
pub use value::ScriptValue;
