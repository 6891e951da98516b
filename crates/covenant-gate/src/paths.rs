//! Destination confinement.
//!
//! A destination is accepted only if it resolves inside the repository root
//! both lexically and after following any symlinks in the part of the path
//! that already exists. Nothing outside the root is created or written.
//!
//! Governance state (the ledger, the watchdog checkpoint, staging, the CAS)
//! may live inside the repository; callers pass those paths as protected and
//! any destination at or below one of them is refused.

use std::path::{Component, Path, PathBuf};

use crate::error::{GateError, GateResult};

/// A destination that has passed confinement checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDestination {
    /// Canonical repository root.
    pub root: PathBuf,
    /// Absolute path inside `root`.
    pub absolute: PathBuf,
    /// Path relative to the repository root.
    pub relative: PathBuf,
}

impl ResolvedDestination {
    /// Relative path with `/` separators, for records and commit messages.
    pub fn display_relative(&self) -> String {
        self.relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Resolve `dest` against `repo_root` and confine it to the root, outside
/// every `protected` path.
pub fn resolve_destination(
    repo_root: &Path,
    dest: &Path,
    protected: &[PathBuf],
) -> GateResult<ResolvedDestination> {
    if dest.as_os_str().is_empty() {
        return Err(GateError::InvalidDestination {
            path: dest.to_path_buf(),
            reason: "destination is empty".to_string(),
        });
    }

    let root = repo_root.canonicalize()?;
    let joined = if dest.is_absolute() {
        dest.to_path_buf()
    } else {
        root.join(dest)
    };

    let traversal = || GateError::PathTraversal {
        path: dest.to_path_buf(),
        root: root.clone(),
    };

    let normalized = normalize(&joined).ok_or_else(traversal)?;
    let relative = normalized
        .strip_prefix(&root)
        .map_err(|_| traversal())?
        .to_path_buf();

    if relative.as_os_str().is_empty() {
        return Err(GateError::InvalidDestination {
            path: dest.to_path_buf(),
            reason: "destination is the repository root".to_string(),
        });
    }
    if relative.components().any(|c| c.as_os_str() == ".git") {
        return Err(GateError::InvalidDestination {
            path: dest.to_path_buf(),
            reason: "destination is inside .git".to_string(),
        });
    }

    // Symlinks in the existing prefix can point anywhere; resolve them.
    let mut existing = normalized.as_path();
    while !existing.exists() {
        existing = match existing.parent() {
            Some(parent) => parent,
            None => break,
        };
    }
    let real = if existing.exists() {
        let real_prefix = existing.canonicalize()?;
        if !real_prefix.starts_with(&root) {
            return Err(traversal());
        }
        match normalized.strip_prefix(existing) {
            Ok(rest) => real_prefix.join(rest),
            Err(_) => real_prefix,
        }
    } else {
        normalized.clone()
    };

    for guarded in protected.iter().filter_map(|p| absolute(p)) {
        // A protected directory that holds the whole repository guards
        // nothing by itself; its protected files are listed separately.
        if root.starts_with(&guarded) {
            continue;
        }
        if normalized.starts_with(&guarded) || real.starts_with(&guarded) {
            return Err(GateError::InvalidDestination {
                path: dest.to_path_buf(),
                reason: format!("destination is inside protected path {}", guarded.display()),
            });
        }
    }

    Ok(ResolvedDestination {
        root,
        absolute: normalized,
        relative,
    })
}

/// `path` with its longest existing prefix canonicalized.
fn absolute(path: &Path) -> Option<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(path)
    };
    let normalized = normalize(&joined)?;
    let mut existing = normalized.as_path();
    loop {
        if let Ok(real) = existing.canonicalize() {
            return Some(match normalized.strip_prefix(existing) {
                Ok(rest) => real.join(rest),
                Err(_) => real,
            });
        }
        existing = existing.parent()?;
    }
}

/// Lexically resolve `.` and `..`. `None` if `..` climbs above the
/// filesystem root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() || out.as_os_str().is_empty() {
                    return None;
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    Some(out)
}
