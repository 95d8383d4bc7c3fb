//! Path validation for filesystem tools

use std::path::{Component, Path, PathBuf};

use arbor_core::{ArborError, Result};

use crate::tool::ToolContext;

/// How a tool intends to use a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathAccess {
    Read,
    Write,
}

/// Validate that a path stays inside the working directory
///
/// Paths must be relative and free of `..`. Writes (and deletes) are
/// additionally refused for protected names anywhere in the path.
pub fn validate_path(path: &str, access: PathAccess, protected: &[String]) -> Result<PathBuf> {
    let path = Path::new(path.trim());

    if path.as_os_str().is_empty() {
        return Err(ArborError::PathValidation("Empty path".to_string()));
    }

    // Reject absolute paths
    if path.is_absolute() {
        return Err(ArborError::PathValidation(format!(
            "Absolute paths not allowed: {}",
            path.display()
        )));
    }

    // Check for path traversal
    for component in path.components() {
        if let Component::ParentDir = component {
            return Err(ArborError::PathValidation(format!(
                "Path traversal not allowed: {}",
                path.display()
            )));
        }
    }

    if access == PathAccess::Write {
        for component in path.components() {
            if let Component::Normal(name) = component {
                let name = name.to_string_lossy();
                if protected.iter().any(|p| p.as_str() == name) {
                    return Err(ArborError::PathValidation(format!(
                        "Cannot modify protected file: {}",
                        path.display()
                    )));
                }
            }
        }
    }

    Ok(path.to_path_buf())
}

/// Validate `path` and join it onto the context's working directory
pub fn resolve(ctx: &ToolContext, path: &str, access: PathAccess) -> Result<(PathBuf, String)> {
    let relative = validate_path(path, access, &ctx.protected_files)?;
    let display = relative.to_string_lossy().to_string();
    Ok((ctx.working_directory.join(relative), display))
}
