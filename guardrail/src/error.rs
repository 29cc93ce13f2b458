//! Closed error taxonomy for the validation layer.
//!
//! Each validator has its own `thiserror` enum so callers are forced to handle
//! every rejection kind at compile time. The "checking" entry points
//! (`PathSanitizer::sanitize`, `SymlinkResolver::resolve`) return tagged
//! results instead of these errors; the "asserting" entry points
//! (`sanitize_or_throw`, `validate_path`, `validate_command`, `open_safe`)
//! convert a negative verdict into one of the errors below.

use std::path::PathBuf;

/// Reason codes attached to a string-level path rejection.
///
/// The sanitizer runs its checks in a fixed order and the first failing check
/// wins, so a given input always maps to the same code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SanitizeErrorKind {
    EmptyPath,
    NullByte,
    PathTooLong,
    InvalidCharacters,
    TraversalAttempt,
    InvalidComponent,
    OutsideBoundary,
}

impl SanitizeErrorKind {
    /// Stable identifier used in audit events.
    pub fn code(&self) -> &'static str {
        match self {
            SanitizeErrorKind::EmptyPath => "EMPTY_PATH",
            SanitizeErrorKind::NullByte => "NULL_BYTE",
            SanitizeErrorKind::PathTooLong => "PATH_TOO_LONG",
            SanitizeErrorKind::InvalidCharacters => "INVALID_CHARACTERS",
            SanitizeErrorKind::TraversalAttempt => "TRAVERSAL_ATTEMPT",
            SanitizeErrorKind::InvalidComponent => "INVALID_COMPONENT",
            SanitizeErrorKind::OutsideBoundary => "OUTSIDE_BOUNDARY",
        }
    }
}

impl std::fmt::Display for SanitizeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Rejection raised by the asserting path entry points.
#[derive(Debug, thiserror::Error)]
pub enum PathTraversalError {
    #[error("path {attempted:?} rejected ({kind}) against boundary {base:?}")]
    Rejected {
        attempted: PathBuf,
        base: PathBuf,
        kind: SanitizeErrorKind,
    },

    #[error("symlink at {path:?} denied by policy (target: {target:?})")]
    SymlinkDenied {
        path: PathBuf,
        target: Option<PathBuf>,
    },

    #[error("symlink at {path:?} cannot be resolved: {reason}")]
    BrokenSymlink { path: PathBuf, reason: String },

    #[error("filesystem entity at {path:?} was replaced between validation and open")]
    SwappedDuringOpen { path: PathBuf },

    #[error("I/O failure while validating {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PathTraversalError {
    /// Stable identifier used in audit events.
    pub fn code(&self) -> &'static str {
        match self {
            PathTraversalError::Rejected { kind, .. } => kind.code(),
            PathTraversalError::SymlinkDenied { .. } => "SYMLINK_DENIED",
            PathTraversalError::BrokenSymlink { .. } => "BROKEN_SYMLINK",
            PathTraversalError::SwappedDuringOpen { .. } => "TOCTOU_DETECTED",
            PathTraversalError::Io { .. } => "IO_ERROR",
        }
    }
}

/// Rejection of a command that is not covered by the whitelist.
#[derive(Debug, thiserror::Error)]
pub enum CommandNotAllowedError {
    #[error("command '{command}' is not in the whitelist")]
    BaseNotWhitelisted { command: String },

    #[error("subcommand '{subcommand}' is not allowed for '{command}'")]
    SubcommandNotAllowed { command: String, subcommand: String },

    #[error("argument does not match any allowed pattern for '{command}'")]
    ArgumentNotAllowed { command: String, argument: String },
}

/// Rejection of a single argument that carries injection-capable bytes.
#[derive(Debug, thiserror::Error)]
pub enum CommandInjectionError {
    #[error("argument for '{context}' contains a NUL byte")]
    NullByte { context: String, argument: String },

    #[error("argument for '{context}' contains a newline")]
    Newline { context: String, argument: String },

    #[error("argument for '{context}' contains shell metacharacter {meta:?}")]
    Metacharacter {
        context: String,
        argument: String,
        meta: char,
    },
}

/// Umbrella error for command validation and execution.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    NotAllowed(#[from] CommandNotAllowedError),

    #[error(transparent)]
    Injection(#[from] CommandInjectionError),

    #[error("command '{command}' timed out after {timeout_secs}s")]
    TimedOut { command: String, timeout_secs: u64 },

    #[error("command '{command}' was cancelled")]
    Cancelled { command: String },

    #[error("failed to spawn '{command}'")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Aggregate validation failure, used where several independent problems are
/// worth reporting at once (e.g. whitelist configuration loading).
#[derive(Debug, thiserror::Error)]
#[error("validation failed: {}", errors.join("; "))]
pub struct ValidationError {
    pub errors: Vec<String>,
}
