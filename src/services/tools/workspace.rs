//! Workspace Sandbox
//!
//! Path-containment validation shared by the filesystem tools. Every
//! caller-supplied path resolves against the workspace root and is rejected
//! unless the canonical result stays under the canonical root. `..`
//! components and symbolic links are canonicalized away before the
//! containment check, so traversal escapes fail closed.

use std::path::{Component, Path, PathBuf};

use super::trait_def::ToolError;

/// The root directory under which all filesystem tool paths must resolve.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create a workspace rooted at `root`. The root must exist; it is
    /// canonicalized once here so later containment checks compare like
    /// with like.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self {
            root: root.as_ref().canonicalize()?,
        })
    }

    /// The canonical workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a caller-supplied path (relative or absolute) to an absolute
    /// path inside the workspace. Empty input defaults to `.`.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        let supplied = if path.is_empty() { "." } else { path };
        let candidate = Path::new(supplied);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };

        let canonical = canonicalize_allow_missing_leaf(&joined).map_err(|_| {
            ToolError::OutsideWorkspace {
                path: supplied.to_string(),
                root: self.root.display().to_string(),
            }
        })?;

        if canonical.starts_with(&self.root) {
            Ok(canonical)
        } else {
            Err(ToolError::OutsideWorkspace {
                path: supplied.to_string(),
                root: self.root.display().to_string(),
            })
        }
    }
}

/// Canonicalize a path that may not exist yet: walk up to the nearest
/// existing ancestor, canonicalize that, then re-append the missing tail.
/// Lexical `..` in the missing tail is rejected rather than resolved, so a
/// traversal through a nonexistent directory cannot slip past the check.
fn canonicalize_allow_missing_leaf(path: &Path) -> std::io::Result<PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }

    let mut missing: Vec<&std::ffi::OsStr> = Vec::new();
    let mut current = path;
    loop {
        match current.parent() {
            Some(parent) => {
                if let Some(name) = current.file_name() {
                    missing.push(name);
                } else {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "path has no resolvable ancestor",
                    ));
                }
                if let Ok(canonical) = parent.canonicalize() {
                    let mut resolved = canonical;
                    for name in missing.iter().rev() {
                        if Path::new(name)
                            .components()
                            .any(|c| matches!(c, Component::ParentDir))
                        {
                            return Err(std::io::Error::new(
                                std::io::ErrorKind::InvalidInput,
                                "parent traversal through missing path",
                            ));
                        }
                        resolved.push(name);
                    }
                    return Ok(resolved);
                }
                current = parent;
            }
            None => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no existing ancestor",
                ))
            }
        }
    }
}
