//! # Guardrail
//!
//! Security validation layer for filesystem paths and shell commands: the
//! component that decides whether caller-supplied input may be used before
//! any destructive or privileged operation executes. It reasons about
//! adversarial input (path traversal, symlink swaps, command injection,
//! TOCTOU races) with zero tolerance for false negatives, while staying
//! usable by many unrelated callers.
//!
//! ## Three validators
//!
//! - [`PathSanitizer`]: pure string/structural analysis of a candidate path
//!   against a configured [`SecurityBoundary`]. No filesystem access; returns
//!   a tagged accept/reject result.
//! - [`SymlinkResolver`]: the filesystem-aware counterpart. Normalizes and
//!   resolves a path, applies a configurable [`SymlinkPolicy`], re-validates
//!   the *canonical* target against the boundary, and offers a TOCTOU-safe
//!   open that proves the opened descriptor is the validated entity.
//! - [`CommandSanitizer`]: validates a command plus argument vector against a
//!   [`CommandWhitelist`], rejects injection-capable arguments, and executes
//!   via direct process invocation — a shell interpreter is never involved.
//!
//! Callers typically chain `PathSanitizer` → `SymlinkResolver` before file
//! access and `CommandSanitizer` before any subprocess. For anything that
//! touches disk the filesystem-aware check is authoritative; the string
//! check is a fast pre-filter.
//!
//! All three are immutable after construction and safe for concurrent shared
//! use. Every rejection is reported to an [`AuditSink`] before it is returned
//! to the caller; a sink failure never converts a rejection into an
//! acceptance.
//!
//! ```no_run
//! use guardrail::{CommandSanitizer, CommandWhitelist, SecurityBoundary, SymlinkResolver};
//!
//! # fn main() -> anyhow::Result<()> {
//! let boundary = SecurityBoundary::new("/srv/repo")?;
//! let resolver = SymlinkResolver::new(boundary);
//! let readme = resolver.validate_path("docs/README.md")?;
//!
//! let whitelist = CommandWhitelist::builder()
//!     .allow_with_subcommands("git", ["status", "diff"])
//!     .build()?;
//! let commands = CommandSanitizer::new(whitelist);
//! let cmd = commands.validate_command("git", &["status".into()])?;
//! # let _ = (readme, cmd);
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod boundary;
pub mod command;
pub mod config;
pub mod constants;
pub mod error;
pub mod path_sanitizer;
pub mod symlink_resolver;
pub mod utils;

pub use audit::{AuditOutcome, AuditRecord, AuditSink, RecordingAuditSink, TracingAuditSink};
pub use boundary::SecurityBoundary;
pub use command::{
    CommandExecResult, CommandSanitizer, CommandWhitelist, CommandWhitelistBuilder, ExecOptions,
    SanitizedCommand,
};
pub use config::{CommandRule, GuardConfig};
pub use error::{
    CommandError, CommandInjectionError, CommandNotAllowedError, PathTraversalError,
    SanitizeErrorKind, ValidationError,
};
pub use path_sanitizer::{PathSanitizer, SanitizationResult};
pub use symlink_resolver::{
    AsyncSafeFileHandle, SafeFileHandle, SymlinkPolicy, SymlinkResolutionResult, SymlinkResolver,
};
