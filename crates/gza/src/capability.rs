//! The security context gating I/O, syscalls, and non-determinism (spec §4.5).
//!
//! Natives that require a capability consult the context on every call and raise
//! `SecurityViolation` when the capability is absent. An empty/default context denies
//! everything except pure computation, making the sandbox safe by default.

use std::{fmt, path::{Path, PathBuf}};

use crate::error::RuntimeError;

/// A set of capability flags attached to an engine.
///
/// Immutable once the engine is created — scripts cannot escalate their own
/// privileges. Path allow/deny lists refine filesystem access when `allow_io` is set;
/// an empty allow list with `allow_io` granted means "any path", consistent with the
/// spec's framing of the lists as optional refinements.
#[derive(Debug, Clone, Default)]
pub struct SecurityContext {
    pub allow_io: bool,
    pub allow_syscalls: bool,
    /// Forbids any source of non-reproducibility (wall-clock reads, randomness).
    pub deterministic: bool,
    io_allow: Option<Vec<PathBuf>>,
    io_deny: Vec<PathBuf>,
}

impl SecurityContext {
    #[must_use]
    pub fn new(allow_io: bool, allow_syscalls: bool, deterministic: bool) -> Self {
        Self {
            allow_io,
            allow_syscalls,
            deterministic,
            io_allow: None,
            io_deny: Vec::new(),
        }
    }

    /// The most restrictive context: pure computation only.
    #[must_use]
    pub fn locked_down() -> Self {
        Self::default()
    }

    /// The least restrictive context, for trusted embeddings.
    #[must_use]
    pub fn unrestricted() -> Self {
        Self::new(true, true, false)
    }

    #[must_use]
    pub fn with_io_allow_list(mut self, paths: Vec<PathBuf>) -> Self {
        self.io_allow = Some(paths);
        self
    }

    #[must_use]
    pub fn with_io_deny_list(mut self, paths: Vec<PathBuf>) -> Self {
        self.io_deny = paths;
        self
    }

    /// Raises `SecurityViolation` unless I/O is allowed for this engine and `path`
    /// clears the allow/deny lists.
    pub fn check_io(&self, operation: &str, path: &Path) -> Result<(), RuntimeError> {
        if !self.allow_io {
            return Err(RuntimeError::security_violation(operation, "allow_io"));
        }
        if self.io_deny.iter().any(|p| path.starts_with(p)) {
            return Err(RuntimeError::security_violation(operation, "io_deny"));
        }
        if let Some(allow) = &self.io_allow
            && !allow.iter().any(|p| path.starts_with(p))
        {
            return Err(RuntimeError::security_violation(operation, "io_allow"));
        }
        Ok(())
    }

    /// Raises `SecurityViolation` unless syscalls are allowed for this engine.
    pub fn check_syscall(&self, operation: &str) -> Result<(), RuntimeError> {
        if self.allow_syscalls {
            Ok(())
        } else {
            Err(RuntimeError::security_violation(operation, "allow_syscalls"))
        }
    }

    /// Raises `SecurityViolation` for any source of non-determinism (clock, randomness)
    /// when `deterministic` is set.
    pub fn check_deterministic(&self, operation: &str) -> Result<(), RuntimeError> {
        if self.deterministic {
            Err(RuntimeError::security_violation(operation, "deterministic"))
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SecurityContext(allow_io={}, allow_syscalls={}, deterministic={})",
            self.allow_io, self.allow_syscalls, self.deterministic
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_down_denies_io() {
        let ctx = SecurityContext::locked_down();
        assert!(ctx.check_io("read_file", Path::new("/tmp/x")).is_err());
    }

    #[test]
    fn unrestricted_allows_io_without_lists() {
        let ctx = SecurityContext::unrestricted();
        assert!(ctx.check_io("read_file", Path::new("/tmp/x")).is_ok());
    }

    #[test]
    fn deny_list_wins_over_allow() {
        let ctx = SecurityContext::new(true, false, false)
            .with_io_allow_list(vec![PathBuf::from("/tmp")])
            .with_io_deny_list(vec![PathBuf::from("/tmp/secret")]);
        assert!(ctx.check_io("read_file", Path::new("/tmp/ok")).is_ok());
        assert!(ctx.check_io("read_file", Path::new("/tmp/secret/x")).is_err());
    }

    #[test]
    fn deterministic_blocks_clock_reads() {
        let ctx = SecurityContext::new(false, false, true);
        assert!(ctx.check_deterministic("time.now").is_err());
    }
}
