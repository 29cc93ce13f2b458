//! Filesystem-aware path resolution and TOCTOU-safe file opening.
//!
//! [`SymlinkResolver`] is the authoritative check for any operation that
//! touches disk. It runs the string-level [`PathSanitizer`] as a pre-filter,
//! then inspects the real filesystem: a symlink is classified with `lstat`,
//! its raw target read with `readlink`, and under the `resolve` policy the
//! *canonical* target is what gets boundary-checked, because a link can point
//! anywhere regardless of where the link file itself lives.
//!
//! Both synchronous and async forms are provided with identical validation
//! logic; the async forms suspend at each filesystem call instead of
//! blocking. Dropping an async open future closes any descriptor it had
//! already obtained, so cancellation cannot leak a handle.

use crate::audit::scrub_for_audit;
use crate::boundary::SecurityBoundary;
use crate::error::{PathTraversalError, SanitizeErrorKind};
use crate::path_sanitizer::{PathSanitizer, SanitizationResult};
use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};

/// Behavior applied when the validated path is a symbolic link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SymlinkPolicy {
    /// Accept the link if its canonical target is within the boundary.
    Allow,
    /// Reject every symlink unconditionally.
    Deny,
    /// Canonicalize and re-validate the target; the canonical location is
    /// what the boundary check applies to.
    #[default]
    Resolve,
}

/// Outcome of a filesystem-aware resolution. A security verdict is always a
/// returned value, never an error; `Err` from [`SymlinkResolver::resolve`]
/// means an environmental I/O failure only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymlinkResolutionResult {
    pub input_path: PathBuf,
    pub normalized_path: PathBuf,
    pub real_path: Option<PathBuf>,
    pub is_symlink: bool,
    pub is_within_boundary: bool,
    pub symlink_target: Option<PathBuf>,
}

/// A file reference that is provably the same filesystem object that was
/// validated: constructed only after the post-open identity check passed.
#[derive(Debug)]
pub struct SafeFileHandle {
    file: std::fs::File,
    path: PathBuf,
}

impl SafeFileHandle {
    pub fn file(&self) -> &std::fs::File {
        &self.file
    }

    pub fn file_mut(&mut self) -> &mut std::fs::File {
        &mut self.file
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_file(self) -> std::fs::File {
        self.file
    }

    /// Closes the descriptor. Dropping the handle has the same effect.
    pub fn close(self) {}
}

/// Async counterpart of [`SafeFileHandle`] wrapping a `tokio::fs::File`.
#[derive(Debug)]
pub struct AsyncSafeFileHandle {
    file: tokio::fs::File,
    path: PathBuf,
}

impl AsyncSafeFileHandle {
    pub fn file(&self) -> &tokio::fs::File {
        &self.file
    }

    pub fn file_mut(&mut self) -> &mut tokio::fs::File {
        &mut self.file
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_file(self) -> tokio::fs::File {
        self.file
    }

    pub fn close(self) {}
}

/// What `lstat` said about the normalized path.
enum EntryKind {
    Missing,
    Regular,
    Symlink { target: Option<PathBuf> },
}

/// Filesystem-aware validator with a configurable symlink policy.
#[derive(Debug, Clone)]
pub struct SymlinkResolver {
    sanitizer: PathSanitizer,
    policy: SymlinkPolicy,
}

impl SymlinkResolver {
    pub fn new(boundary: SecurityBoundary) -> Self {
        Self {
            sanitizer: PathSanitizer::new(boundary),
            policy: SymlinkPolicy::default(),
        }
    }

    /// Builds a resolver sharing an existing sanitizer's boundary, audit sink,
    /// and actor label.
    pub fn from_sanitizer(sanitizer: PathSanitizer) -> Self {
        Self {
            sanitizer,
            policy: SymlinkPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: SymlinkPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_audit(mut self, audit: std::sync::Arc<dyn crate::audit::AuditSink>) -> Self {
        self.sanitizer = self.sanitizer.with_audit(audit);
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.sanitizer = self.sanitizer.with_actor(actor);
        self
    }

    pub fn policy(&self) -> SymlinkPolicy {
        self.policy
    }

    pub fn boundary(&self) -> &SecurityBoundary {
        self.sanitizer.boundary()
    }

    /// Resolves `input` and reports where it really points. Security verdicts
    /// live in the returned struct; `Err` is an environmental I/O failure.
    pub fn resolve(&self, input: &str) -> io::Result<SymlinkResolutionResult> {
        let normalized = match self.prefilter(input) {
            Ok(p) => p,
            Err(result) => return Ok(result),
        };

        let kind = match std::fs::symlink_metadata(&normalized) {
            Ok(meta) if meta.file_type().is_symlink() => EntryKind::Symlink {
                target: std::fs::read_link(&normalized).ok(),
            },
            Ok(_) => EntryKind::Regular,
            Err(e) if e.kind() == io::ErrorKind::NotFound => EntryKind::Missing,
            Err(e) => return Err(e),
        };

        let real = match &kind {
            EntryKind::Symlink { .. } if self.policy != SymlinkPolicy::Deny => {
                Some(std::fs::canonicalize(&normalized))
            }
            _ => None,
        };

        Ok(self.judge(input, normalized, kind, real))
    }

    /// Async form of [`resolve`](Self::resolve) with identical semantics.
    pub async fn resolve_async(&self, input: &str) -> io::Result<SymlinkResolutionResult> {
        let normalized = match self.prefilter(input) {
            Ok(p) => p,
            Err(result) => return Ok(result),
        };

        let kind = match tokio::fs::symlink_metadata(&normalized).await {
            Ok(meta) if meta.file_type().is_symlink() => EntryKind::Symlink {
                target: tokio::fs::read_link(&normalized).await.ok(),
            },
            Ok(_) => EntryKind::Regular,
            Err(e) if e.kind() == io::ErrorKind::NotFound => EntryKind::Missing,
            Err(e) => return Err(e),
        };

        let real = match &kind {
            EntryKind::Symlink { .. } if self.policy != SymlinkPolicy::Deny => {
                Some(tokio::fs::canonicalize(&normalized).await)
            }
            _ => None,
        };

        Ok(self.judge(input, normalized, kind, real))
    }

    /// Asserting form: returns the path that is safe to use, canonical when
    /// the entity is a symlink, normalized otherwise.
    pub fn validate_path(&self, input: &str) -> Result<PathBuf, PathTraversalError> {
        let normalized = self.sanitizer.sanitize_or_throw(input)?;

        match std::fs::symlink_metadata(&normalized) {
            Ok(meta) if meta.file_type().is_symlink() => {
                let target = std::fs::read_link(&normalized).ok();
                let real = std::fs::canonicalize(&normalized);
                self.judge_symlink_strict(normalized, target, real)
            }
            Ok(_) => Ok(normalized),
            // The entity does not exist yet; the lexical verdict stands so
            // "file will be created here" callers can proceed.
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(normalized),
            Err(e) => Err(PathTraversalError::Io {
                path: normalized,
                source: e,
            }),
        }
    }

    /// Async form of [`validate_path`](Self::validate_path).
    pub async fn validate_path_async(&self, input: &str) -> Result<PathBuf, PathTraversalError> {
        let normalized = self.sanitizer.sanitize_or_throw(input)?;

        match tokio::fs::symlink_metadata(&normalized).await {
            Ok(meta) if meta.file_type().is_symlink() => {
                let target = tokio::fs::read_link(&normalized).await.ok();
                let real = tokio::fs::canonicalize(&normalized).await;
                self.judge_symlink_strict(normalized, target, real)
            }
            Ok(_) => Ok(normalized),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(normalized),
            Err(e) => Err(PathTraversalError::Io {
                path: normalized,
                source: e,
            }),
        }
    }

    /// Opens `input` read-only with the TOCTOU identity check.
    pub fn open_safe(&self, input: &str) -> Result<SafeFileHandle, PathTraversalError> {
        let mut options = std::fs::OpenOptions::new();
        options.read(true);
        self.open_safe_with(input, &options)
    }

    /// Validates `input`, opens it with the caller's options, then proves the
    /// opened descriptor still refers to the validated entity: the open file
    /// is `fstat`ed and the path `lstat`ed again, and a device+inode mismatch
    /// means the entity was swapped in the validate→open window, so the
    /// descriptor is closed and the operation fails.
    pub fn open_safe_with(
        &self,
        input: &str,
        options: &std::fs::OpenOptions,
    ) -> Result<SafeFileHandle, PathTraversalError> {
        let validated = self.validate_path(input)?;

        let file = options.open(&validated).map_err(|e| PathTraversalError::Io {
            path: validated.clone(),
            source: e,
        })?;

        self.verify_open_identity(&file.metadata(), &validated)?;

        Ok(SafeFileHandle {
            file,
            path: validated,
        })
    }

    /// Async form of [`open_safe`](Self::open_safe).
    pub async fn open_safe_async(&self, input: &str) -> Result<AsyncSafeFileHandle, PathTraversalError> {
        let mut options = tokio::fs::OpenOptions::new();
        options.read(true);
        self.open_safe_with_async(input, &options).await
    }

    /// Async form of [`open_safe_with`](Self::open_safe_with).
    pub async fn open_safe_with_async(
        &self,
        input: &str,
        options: &tokio::fs::OpenOptions,
    ) -> Result<AsyncSafeFileHandle, PathTraversalError> {
        let validated = self.validate_path_async(input).await?;

        let file = options
            .open(&validated)
            .await
            .map_err(|e| PathTraversalError::Io {
                path: validated.clone(),
                source: e,
            })?;

        self.verify_open_identity(&file.metadata().await, &validated)?;

        Ok(AsyncSafeFileHandle {
            file,
            path: validated,
        })
    }

    /// Runs the string pre-filter; an `Err` carries the ready-made negative
    /// result for `resolve`.
    fn prefilter(&self, input: &str) -> Result<PathBuf, SymlinkResolutionResult> {
        match self.sanitizer.sanitize(input) {
            SanitizationResult::Valid { sanitized_path } => Ok(sanitized_path),
            SanitizationResult::Invalid { .. } => Err(SymlinkResolutionResult {
                input_path: PathBuf::from(input),
                normalized_path: self.boundary().resolve(Path::new(input)),
                real_path: None,
                is_symlink: false,
                is_within_boundary: false,
                symlink_target: None,
            }),
        }
    }

    /// Applies the symlink policy and produces the final verdict for
    /// `resolve`. `real` is only `Some` when canonicalization was attempted.
    fn judge(
        &self,
        input: &str,
        normalized: PathBuf,
        kind: EntryKind,
        real: Option<io::Result<PathBuf>>,
    ) -> SymlinkResolutionResult {
        let input_path = PathBuf::from(input);
        match kind {
            // Nothing on disk yet: the lexical verdict stands, so callers
            // about to create a file here can proceed.
            EntryKind::Missing => SymlinkResolutionResult {
                input_path,
                normalized_path: normalized,
                real_path: None,
                is_symlink: false,
                is_within_boundary: true,
                symlink_target: None,
            },
            // Not a link: the entity's own (already validated) location is
            // authoritative.
            EntryKind::Regular => SymlinkResolutionResult {
                input_path,
                real_path: Some(normalized.clone()),
                normalized_path: normalized,
                is_symlink: false,
                is_within_boundary: true,
                symlink_target: None,
            },
            EntryKind::Symlink { target } => {
                if self.policy == SymlinkPolicy::Deny {
                    self.audit_violation("SYMLINK_DENIED", &normalized);
                    return SymlinkResolutionResult {
                        input_path,
                        normalized_path: normalized,
                        real_path: None,
                        is_symlink: true,
                        is_within_boundary: false,
                        symlink_target: target,
                    };
                }
                match real.expect("canonicalization attempted for symlink") {
                    Ok(real_path) => {
                        let within = self.sanitizer.is_within_boundary(&real_path);
                        if !within {
                            self.audit_violation("SYMLINK_OUTSIDE_BOUNDARY", &real_path);
                        }
                        SymlinkResolutionResult {
                            input_path,
                            normalized_path: normalized,
                            real_path: Some(real_path),
                            is_symlink: true,
                            is_within_boundary: within,
                            symlink_target: target,
                        }
                    }
                    Err(_) => {
                        self.audit_violation("BROKEN_SYMLINK", &normalized);
                        SymlinkResolutionResult {
                            input_path,
                            normalized_path: normalized,
                            real_path: None,
                            is_symlink: true,
                            is_within_boundary: false,
                            symlink_target: target,
                        }
                    }
                }
            }
        }
    }

    /// Symlink handling for the asserting entry points.
    fn judge_symlink_strict(
        &self,
        normalized: PathBuf,
        target: Option<PathBuf>,
        real: io::Result<PathBuf>,
    ) -> Result<PathBuf, PathTraversalError> {
        if self.policy == SymlinkPolicy::Deny {
            self.audit_violation("SYMLINK_DENIED", &normalized);
            return Err(PathTraversalError::SymlinkDenied {
                path: normalized,
                target,
            });
        }
        let real_path = match real {
            Ok(p) => p,
            Err(e) => {
                self.audit_violation("BROKEN_SYMLINK", &normalized);
                return Err(PathTraversalError::BrokenSymlink {
                    path: normalized,
                    reason: e.to_string(),
                });
            }
        };
        if !self.sanitizer.is_within_boundary(&real_path) {
            self.audit_violation("SYMLINK_OUTSIDE_BOUNDARY", &real_path);
            return Err(PathTraversalError::Rejected {
                attempted: real_path,
                base: self.boundary().base_dir().to_path_buf(),
                kind: SanitizeErrorKind::OutsideBoundary,
            });
        }
        Ok(real_path)
    }

    /// Compares the open descriptor's identity against a fresh `lstat` of the
    /// path. Any failure to prove identity fails closed.
    fn verify_open_identity(
        &self,
        opened: &io::Result<Metadata>,
        validated: &Path,
    ) -> Result<(), PathTraversalError> {
        let opened = match opened {
            Ok(meta) => meta,
            Err(e) => {
                return Err(PathTraversalError::Io {
                    path: validated.to_path_buf(),
                    source: io::Error::new(e.kind(), e.to_string()),
                });
            }
        };
        let on_disk = std::fs::symlink_metadata(validated).map_err(|_| {
            // Entity vanished between open and re-check; cannot prove identity.
            self.audit_violation("TOCTOU_DETECTED", validated);
            PathTraversalError::SwappedDuringOpen {
                path: validated.to_path_buf(),
            }
        })?;

        if !same_entity(opened, &on_disk) {
            self.audit_violation("TOCTOU_DETECTED", validated);
            return Err(PathTraversalError::SwappedDuringOpen {
                path: validated.to_path_buf(),
            });
        }
        Ok(())
    }

    fn audit_violation(&self, event: &str, path: &Path) {
        self.sanitizer.audit().log_security_violation(
            event,
            self.sanitizer.actor(),
            &scrub_for_audit(&path.to_string_lossy()),
        );
    }
}

/// Device+inode comparison on Unix; a conservative best-effort fallback
/// elsewhere.
#[cfg(unix)]
pub(crate) fn same_entity(a: &Metadata, b: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
pub(crate) fn same_entity(a: &Metadata, b: &Metadata) -> bool {
    a.file_type() == b.file_type()
        && a.len() == b.len()
        && a.modified().ok() == b.modified().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::TempDir;

    fn resolver(temp: &TempDir) -> SymlinkResolver {
        SymlinkResolver::new(SecurityBoundary::new(temp.path()).unwrap())
    }

    #[test]
    fn regular_file_is_its_own_real_path() -> Result<()> {
        let temp = TempDir::new()?;
        let r = resolver(&temp);
        std::fs::write(r.boundary().base_dir().join("data.txt"), "x")?;
        let result = r.resolve("data.txt")?;
        assert!(result.is_within_boundary);
        assert!(!result.is_symlink);
        assert_eq!(result.real_path.as_deref(), Some(result.normalized_path.as_path()));
        Ok(())
    }

    #[test]
    fn missing_file_keeps_lexical_verdict() -> Result<()> {
        let temp = TempDir::new()?;
        let r = resolver(&temp);
        let result = r.resolve("will/be/created.txt")?;
        assert!(result.is_within_boundary);
        assert!(result.real_path.is_none());
        Ok(())
    }

    #[test]
    fn string_rejection_short_circuits_without_fs_access() -> Result<()> {
        let temp = TempDir::new()?;
        let r = resolver(&temp);
        let result = r.resolve("../outside.txt")?;
        assert!(!result.is_within_boundary);
        assert!(result.real_path.is_none());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escaping_boundary_is_rejected_under_resolve_policy() -> Result<()> {
        let temp = TempDir::new()?;
        let outside = TempDir::new()?;
        let r = resolver(&temp);
        let link = r.boundary().base_dir().join("link");
        std::os::unix::fs::symlink(outside.path(), &link)?;

        let result = r.resolve("link")?;
        assert!(result.is_symlink);
        assert!(!result.is_within_boundary);
        assert_eq!(result.symlink_target.as_deref(), Some(outside.path()));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn symlink_inside_boundary_is_accepted_under_resolve_policy() -> Result<()> {
        let temp = TempDir::new()?;
        let r = resolver(&temp);
        let target = r.boundary().base_dir().join("real.txt");
        std::fs::write(&target, "x")?;
        std::os::unix::fs::symlink(&target, r.boundary().base_dir().join("link"))?;

        let result = r.resolve("link")?;
        assert!(result.is_symlink);
        assert!(result.is_within_boundary);
        assert_eq!(result.real_path.as_deref(), Some(target.as_path()));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn deny_policy_rejects_even_internal_symlinks() -> Result<()> {
        let temp = TempDir::new()?;
        let r = resolver(&temp).with_policy(SymlinkPolicy::Deny);
        let target = r.boundary().base_dir().join("real.txt");
        std::fs::write(&target, "x")?;
        std::os::unix::fs::symlink(&target, r.boundary().base_dir().join("link"))?;

        let result = r.resolve("link")?;
        assert!(result.is_symlink);
        assert!(!result.is_within_boundary);
        // The raw target is still reported for diagnostics.
        assert_eq!(result.symlink_target.as_deref(), Some(target.as_path()));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn broken_symlink_is_rejected() -> Result<()> {
        let temp = TempDir::new()?;
        let r = resolver(&temp);
        std::os::unix::fs::symlink(
            r.boundary().base_dir().join("missing"),
            r.boundary().base_dir().join("dangling"),
        )?;

        // `resolve` policy: target does not exist, canonicalization fails.
        assert!(matches!(
            r.validate_path("dangling"),
            Err(PathTraversalError::BrokenSymlink { .. })
        ));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn identity_check_detects_a_swapped_inode() -> Result<()> {
        let temp = TempDir::new()?;
        let r = resolver(&temp);
        let path = r.boundary().base_dir().join("victim.txt");
        std::fs::write(&path, "original")?;

        // Hold a descriptor to the original inode, then replace the path
        // with a different file, as a racing attacker would.
        let file = std::fs::File::open(&path)?;
        std::fs::remove_file(&path)?;
        std::fs::write(&path, "impostor")?;

        let err = r.verify_open_identity(&file.metadata(), &path).unwrap_err();
        assert!(matches!(err, PathTraversalError::SwappedDuringOpen { .. }));
        Ok(())
    }

    #[test]
    fn open_safe_happy_path() -> Result<()> {
        let temp = TempDir::new()?;
        let r = resolver(&temp);
        let path = r.boundary().base_dir().join("file.txt");
        std::fs::write(&path, "contents")?;

        let handle = r.open_safe("file.txt")?;
        assert_eq!(handle.path(), path.as_path());
        handle.close();
        Ok(())
    }

    #[tokio::test]
    async fn async_resolve_matches_sync_semantics() -> Result<()> {
        let temp = TempDir::new()?;
        let r = resolver(&temp);
        std::fs::write(r.boundary().base_dir().join("data.txt"), "x")?;

        let sync_result = r.resolve("data.txt")?;
        let async_result = r.resolve_async("data.txt").await?;
        assert_eq!(sync_result, async_result);
        Ok(())
    }
}
