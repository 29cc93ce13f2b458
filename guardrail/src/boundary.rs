//! The filesystem boundary that every accepted path must stay inside.
//!
//! A [`SecurityBoundary`] is built once, canonicalizing its roots at
//! construction, and never mutated afterward. Validator instances own a copy
//! and are therefore safe to share across threads without synchronization.

use crate::constants::DEFAULT_MAX_PATH_LENGTH;
use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Immutable description of where an operation is allowed to resolve.
#[derive(Debug, Clone)]
pub struct SecurityBoundary {
    base_dir: PathBuf,
    allowed_dirs: Vec<PathBuf>,
    case_insensitive: bool,
    max_path_length: usize,
}

impl SecurityBoundary {
    /// Creates a boundary rooted at `base_dir`. The directory must exist; it
    /// is canonicalized here so later containment checks compare canonical
    /// forms only.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = std::fs::canonicalize(base_dir.as_ref()).with_context(|| {
            format!("failed to canonicalize base dir {:?}", base_dir.as_ref())
        })?;
        Ok(Self {
            base_dir,
            allowed_dirs: Vec::new(),
            case_insensitive: default_case_insensitive(),
            max_path_length: DEFAULT_MAX_PATH_LENGTH,
        })
    }

    /// Adds an additional allowed root outside `base_dir`.
    pub fn with_allowed_dir(mut self, dir: impl AsRef<Path>) -> Result<Self> {
        let dir = std::fs::canonicalize(dir.as_ref())
            .with_context(|| format!("failed to canonicalize allowed dir {:?}", dir.as_ref()))?;
        self.allowed_dirs.push(dir);
        Ok(self)
    }

    pub fn with_case_insensitive(mut self, case_insensitive: bool) -> Self {
        self.case_insensitive = case_insensitive;
        self
    }

    pub fn with_max_path_length(mut self, max_path_length: usize) -> Self {
        self.max_path_length = max_path_length;
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn allowed_dirs(&self) -> &[PathBuf] {
        &self.allowed_dirs
    }

    pub fn case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    pub fn max_path_length(&self) -> usize {
        self.max_path_length
    }

    /// True if `candidate` is `base_dir`, an allowed dir, or a descendant of
    /// either. `candidate` must already be absolute; callers resolve relative
    /// input against `base_dir` first.
    pub fn contains(&self, candidate: &Path) -> bool {
        if is_descendant(candidate, &self.base_dir, self.case_insensitive) {
            return true;
        }
        self.allowed_dirs
            .iter()
            .any(|root| is_descendant(candidate, root, self.case_insensitive))
    }

    /// Resolves `path` to the absolute candidate that containment is checked
    /// against: absolute input is taken as-is, relative input joins `base_dir`.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

/// Platform default: case-insensitive on Windows and macOS filesystems.
pub(crate) fn default_case_insensitive() -> bool {
    cfg!(any(windows, target_os = "macos"))
}

fn is_descendant(candidate: &Path, root: &Path, case_insensitive: bool) -> bool {
    if !case_insensitive {
        return candidate.starts_with(root);
    }
    let mut candidate_components = candidate.components();
    for root_component in root.components() {
        match candidate_components.next() {
            Some(c) if eq_fold(c.as_os_str(), root_component.as_os_str()) => {}
            _ => return false,
        }
    }
    true
}

fn eq_fold(a: &OsStr, b: &OsStr) -> bool {
    a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
}
