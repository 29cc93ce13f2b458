//! String-level path sanitization.
//!
//! `PathSanitizer` never touches the filesystem: it is a pure function over
//! immutable configuration, so arbitrarily many callers can run it
//! concurrently. Checks run in a fixed order and the first failure wins, so a
//! given input always maps to the same [`SanitizeErrorKind`]. The dangerous
//! `..` pattern is scanned *before* lexical normalization and a literal `..`
//! component is re-scanned *after* it; normalization can both mask and reveal
//! traversal, so both passes are required.
//!
//! For operations that actually touch disk this check is a fast pre-filter;
//! the filesystem-aware verdict of [`crate::symlink_resolver::SymlinkResolver`]
//! is authoritative.

use crate::audit::{AuditSink, TracingAuditSink, scrub_for_audit};
use crate::boundary::SecurityBoundary;
use crate::constants::{DEFAULT_ACTOR, INVALID_PATH_CHARS, MAX_COMPONENT_LENGTH,
    RESERVED_DEVICE_NAMES};
use crate::error::{PathTraversalError, SanitizeErrorKind};
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, OnceLock};

/// Verdict of a string-level check. Never partially valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SanitizationResult {
    Valid {
        sanitized_path: PathBuf,
    },
    Invalid {
        error: String,
        reason: SanitizeErrorKind,
    },
}

impl SanitizationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, SanitizationResult::Valid { .. })
    }

    pub fn sanitized_path(&self) -> Option<&Path> {
        match self {
            SanitizationResult::Valid { sanitized_path } => Some(sanitized_path),
            SanitizationResult::Invalid { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<SanitizeErrorKind> {
        match self {
            SanitizationResult::Valid { .. } => None,
            SanitizationResult::Invalid { reason, .. } => Some(*reason),
        }
    }
}

/// Pure string/structural validator for candidate paths.
#[derive(Debug, Clone)]
pub struct PathSanitizer {
    boundary: SecurityBoundary,
    audit: Arc<dyn AuditSink>,
    actor: String,
}

/// `..` at a path-boundary position, raw or embedded.
fn traversal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(^|[/\\])\.\.([/\\]|$)").expect("static regex"))
}

impl PathSanitizer {
    pub fn new(boundary: SecurityBoundary) -> Self {
        Self {
            boundary,
            audit: Arc::new(TracingAuditSink),
            actor: DEFAULT_ACTOR.to_string(),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn boundary(&self) -> &SecurityBoundary {
        &self.boundary
    }

    pub(crate) fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    pub(crate) fn actor(&self) -> &str {
        &self.actor
    }

    /// Checks `input` against the boundary without touching the filesystem.
    /// Every rejection is reported to the audit sink before it is returned.
    pub fn sanitize(&self, input: &str) -> SanitizationResult {
        match self.check(input) {
            Ok(sanitized_path) => SanitizationResult::Valid { sanitized_path },
            Err((reason, error)) => {
                self.audit
                    .log_security_violation(reason.code(), &self.actor, &scrub_for_audit(input));
                SanitizationResult::Invalid { error, reason }
            }
        }
    }

    /// Same checks as [`sanitize`](Self::sanitize), converting a rejection
    /// into a [`PathTraversalError`] for call sites where proceeding past a
    /// failure is never correct.
    pub fn sanitize_or_throw(&self, input: &str) -> Result<PathBuf, PathTraversalError> {
        match self.sanitize(input) {
            SanitizationResult::Valid { sanitized_path } => Ok(sanitized_path),
            SanitizationResult::Invalid { reason, .. } => Err(PathTraversalError::Rejected {
                attempted: PathBuf::from(input),
                base: self.boundary.base_dir().to_path_buf(),
                kind: reason,
            }),
        }
    }

    /// Shared boundary predicate, used by the symlink resolver to re-check
    /// canonical targets.
    pub fn is_within_boundary(&self, candidate: &Path) -> bool {
        self.boundary.contains(candidate)
    }

    fn check(&self, input: &str) -> Result<PathBuf, (SanitizeErrorKind, String)> {
        if input.trim().is_empty() {
            return Err((SanitizeErrorKind::EmptyPath, "path is empty".to_string()));
        }

        // NUL truncates interpretation downstream, so it is checked before any
        // other parsing.
        if input.contains('\0') {
            return Err((
                SanitizeErrorKind::NullByte,
                "path contains a NUL byte".to_string(),
            ));
        }

        if input.len() > self.boundary.max_path_length() {
            return Err((
                SanitizeErrorKind::PathTooLong,
                format!(
                    "path exceeds maximum length of {} bytes",
                    self.boundary.max_path_length()
                ),
            ));
        }

        if let Some(bad) = input
            .chars()
            .find(|c| c.is_control() || INVALID_PATH_CHARS.contains(c))
        {
            return Err((
                SanitizeErrorKind::InvalidCharacters,
                format!("path contains invalid character {:?}", bad),
            ));
        }

        // Pre-normalization scan: collapsing separators first could mask
        // multi-slash traversal tricks like "a//../..//etc".
        if traversal_pattern().is_match(input) {
            return Err((
                SanitizeErrorKind::TraversalAttempt,
                "path contains a parent-directory traversal".to_string(),
            ));
        }

        let normalized = normalize_lexically(Path::new(input));

        // Post-normalization re-scan: collapsing can also reveal traversal
        // that was disguised before.
        if normalized
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err((
                SanitizeErrorKind::TraversalAttempt,
                "normalized path contains a parent-directory component".to_string(),
            ));
        }

        for component in normalized.components() {
            if let Component::Normal(name) = component {
                validate_component(&name.to_string_lossy())?;
            }
        }

        let candidate = self.boundary.resolve(&normalized);

        if !self.boundary.contains(&candidate) {
            return Err((
                SanitizeErrorKind::OutsideBoundary,
                format!(
                    "path resolves outside the allowed boundary {:?}",
                    self.boundary.base_dir()
                ),
            ));
        }

        Ok(candidate)
    }
}

fn validate_component(name: &str) -> Result<(), (SanitizeErrorKind, String)> {
    if name.chars().all(|c| c == '.') {
        return Err((
            SanitizeErrorKind::InvalidComponent,
            format!("dot-only path component {:?}", name),
        ));
    }

    if name.len() > MAX_COMPONENT_LENGTH {
        return Err((
            SanitizeErrorKind::InvalidComponent,
            format!("path component exceeds {} bytes", MAX_COMPONENT_LENGTH),
        ));
    }

    // Windows reserves "CON" but also "CON.txt"; compare the stem.
    let stem = name.split('.').next().unwrap_or(name);
    if RESERVED_DEVICE_NAMES
        .iter()
        .any(|reserved| stem.eq_ignore_ascii_case(reserved))
    {
        return Err((
            SanitizeErrorKind::InvalidComponent,
            format!("OS-reserved device name {:?}", name),
        ));
    }

    Ok(())
}

/// Collapses `.` components and redundant separators without consulting the
/// filesystem. `..` components are preserved so the caller's re-scan sees
/// anything that collapsing uncovered.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::RecordingAuditSink;
    use anyhow::Result;
    use tempfile::TempDir;

    fn sanitizer(temp: &TempDir) -> PathSanitizer {
        PathSanitizer::new(SecurityBoundary::new(temp.path()).unwrap())
    }

    #[test]
    fn accepts_relative_path_inside_boundary() -> Result<()> {
        let temp = TempDir::new()?;
        let s = sanitizer(&temp);
        let result = s.sanitize("src/index.ts");
        let expected = s.boundary().base_dir().join("src/index.ts");
        assert_eq!(result.sanitized_path(), Some(expected.as_path()));
        Ok(())
    }

    #[test]
    fn rejects_nul_byte_before_anything_else() -> Result<()> {
        let temp = TempDir::new()?;
        let s = sanitizer(&temp);
        // Also contains traversal; NUL must win.
        let result = s.sanitize("..\0/etc/passwd");
        assert_eq!(result.reason(), Some(SanitizeErrorKind::NullByte));
        Ok(())
    }

    #[test]
    fn rejects_traversal() -> Result<()> {
        let temp = TempDir::new()?;
        let s = sanitizer(&temp);
        assert_eq!(
            s.sanitize("../../etc/passwd").reason(),
            Some(SanitizeErrorKind::TraversalAttempt)
        );
        assert_eq!(
            s.sanitize("a/b/../c").reason(),
            Some(SanitizeErrorKind::TraversalAttempt)
        );
        assert_eq!(
            s.sanitize("..").reason(),
            Some(SanitizeErrorKind::TraversalAttempt)
        );
        Ok(())
    }

    #[test]
    fn rejects_empty_and_whitespace() -> Result<()> {
        let temp = TempDir::new()?;
        let s = sanitizer(&temp);
        assert_eq!(s.sanitize("").reason(), Some(SanitizeErrorKind::EmptyPath));
        assert_eq!(
            s.sanitize("   ").reason(),
            Some(SanitizeErrorKind::EmptyPath)
        );
        Ok(())
    }

    #[test]
    fn rejects_overlong_path() -> Result<()> {
        let temp = TempDir::new()?;
        let s = PathSanitizer::new(
            SecurityBoundary::new(temp.path())?.with_max_path_length(64),
        );
        let long = "a/".repeat(100);
        assert_eq!(
            s.sanitize(&long).reason(),
            Some(SanitizeErrorKind::PathTooLong)
        );
        Ok(())
    }

    #[test]
    fn rejects_invalid_characters() -> Result<()> {
        let temp = TempDir::new()?;
        let s = sanitizer(&temp);
        for input in ["a<b", "a>b", "a|b", "a?b", "a*b", "a\"b", "a:b", "a\x07b"] {
            assert_eq!(
                s.sanitize(input).reason(),
                Some(SanitizeErrorKind::InvalidCharacters),
                "expected {:?} to be rejected",
                input
            );
        }
        Ok(())
    }

    #[test]
    fn rejects_reserved_and_dot_only_components() -> Result<()> {
        let temp = TempDir::new()?;
        let s = sanitizer(&temp);
        for input in ["CON", "con.txt", "logs/LPT1", "a/.../b"] {
            assert_eq!(
                s.sanitize(input).reason(),
                Some(SanitizeErrorKind::InvalidComponent),
                "expected {:?} to be rejected",
                input
            );
        }
        let overlong_component = "x".repeat(300);
        assert_eq!(
            s.sanitize(&overlong_component).reason(),
            Some(SanitizeErrorKind::InvalidComponent)
        );
        Ok(())
    }

    #[test]
    fn rejects_absolute_path_outside_boundary() -> Result<()> {
        let temp = TempDir::new()?;
        let s = sanitizer(&temp);
        assert_eq!(
            s.sanitize("/etc/passwd").reason(),
            Some(SanitizeErrorKind::OutsideBoundary)
        );
        Ok(())
    }

    #[test]
    fn accepts_path_in_allowed_dir() -> Result<()> {
        let temp = TempDir::new()?;
        let shared = TempDir::new()?;
        let boundary = SecurityBoundary::new(temp.path())?.with_allowed_dir(shared.path())?;
        let s = PathSanitizer::new(boundary);
        let input = std::fs::canonicalize(shared.path())?.join("data.json");
        assert!(s.sanitize(&input.to_string_lossy()).is_valid());
        Ok(())
    }

    #[test]
    fn sanitize_is_idempotent() -> Result<()> {
        let temp = TempDir::new()?;
        let s = sanitizer(&temp);
        for input in ["src/index.ts", "a/b/c", "./x/./y"] {
            let first = s.sanitize(input);
            let path = first.sanitized_path().expect("valid").to_path_buf();
            let second = s.sanitize(&path.to_string_lossy());
            assert_eq!(second.sanitized_path(), Some(path.as_path()));
        }
        Ok(())
    }

    #[test]
    fn rejection_is_audited_with_scrubbed_input() -> Result<()> {
        let temp = TempDir::new()?;
        let sink = Arc::new(RecordingAuditSink::new());
        let s = sanitizer(&temp)
            .with_audit(sink.clone())
            .with_actor("test-caller");
        let _ = s.sanitize("../../etc/passwd");
        let records = sink.records();
        assert_eq!(records.len(), 1);
        match &records[0] {
            crate::audit::AuditRecord::Violation {
                event_type, actor, ..
            } => {
                assert_eq!(event_type, "TRAVERSAL_ATTEMPT");
                assert_eq!(actor, "test-caller");
            }
            other => panic!("unexpected record {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn sanitize_or_throw_carries_reason() -> Result<()> {
        let temp = TempDir::new()?;
        let s = sanitizer(&temp);
        let err = s.sanitize_or_throw("../../etc/passwd").unwrap_err();
        match err {
            PathTraversalError::Rejected { kind, .. } => {
                assert_eq!(kind, SanitizeErrorKind::TraversalAttempt)
            }
            other => panic!("unexpected error {:?}", other),
        }
        Ok(())
    }
}
