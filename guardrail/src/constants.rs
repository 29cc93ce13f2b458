//! Shared limits and character sets used by the validators.
//!
//! Centralizing these keeps the path and command checks consistent: the same
//! metacharacter set that `CommandSanitizer` rejects in strict mode is the one
//! documented in the whitelist configuration, and the audit scrubber truncates
//! to the same length everywhere.

use std::time::Duration;

/// Default upper bound for a candidate path, in bytes.
pub const DEFAULT_MAX_PATH_LENGTH: usize = 4096;

/// Maximum length of a single path component, in bytes.
pub const MAX_COMPONENT_LENGTH: usize = 255;

/// Offending input is truncated to this many characters before it is handed
/// to the audit sink, so a hostile path cannot be used for log injection.
pub const AUDIT_DETAIL_MAX_LEN: usize = 200;

/// Default hard timeout for a single command invocation.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Actor label attached to audit events when the caller does not set one.
pub const DEFAULT_ACTOR: &str = "system";

/// Characters that are never valid in a candidate path, beyond control
/// characters (which are rejected separately).
pub const INVALID_PATH_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// Shell metacharacters rejected in command arguments when strict mode is on.
///
/// Execution never goes through a shell, so these are defense in depth for
/// callers that log or forward arguments to other systems.
pub const SHELL_METACHARACTERS: &[char] =
    &[';', '|', '&', '$', '(', ')', '`', '<', '>', '\n'];

/// Device names reserved by Windows. Rejected on every platform because
/// accepted paths may be round-tripped to foreign filesystems.
pub const RESERVED_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];
