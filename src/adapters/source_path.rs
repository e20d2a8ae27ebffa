//! Source-path validation and adapter-reported path resolution.
//!
//! Two distinct concerns live here: validating paths a caller hands us
//! before we ever pass them to an adapter (preventing traversal outside a
//! configured workspace), and resolving paths an adapter hands back to us
//! in DAP `source` objects — which may point inside a JAR
//! (`foo.jar!/pkg/File.java`) or at a path this process cannot see at all.

use super::SourcePathResolution;
use crate::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Validates a source file path to prevent path traversal before it is
/// ever handed to an adapter as a launch target.
pub fn validate_source_path(path_str: &str, expected_extension: Option<&str>) -> Result<PathBuf> {
    reject_parent_components(path_str)?;

    let canonical = Path::new(path_str)
        .canonicalize()
        .map_err(|e| Error::InvalidArgument(format!("invalid or inaccessible path '{path_str}': {e}")))?;

    enforce_workspace_root(&canonical)?;

    if let Some(expected_ext) = expected_extension {
        let actual_ext = canonical.extension().and_then(|s| s.to_str()).unwrap_or("");
        if actual_ext != expected_ext {
            return Err(Error::InvalidArgument(format!(
                "expected a '.{expected_ext}' file, got: {}",
                canonical.display()
            )));
        }
    }

    Ok(canonical)
}

pub fn validate_directory_path(path_str: &str) -> Result<PathBuf> {
    reject_parent_components(path_str)?;

    let canonical = Path::new(path_str)
        .canonicalize()
        .map_err(|e| Error::InvalidArgument(format!("invalid or inaccessible directory '{path_str}': {e}")))?;

    if !canonical.is_dir() {
        return Err(Error::InvalidArgument(format!(
            "not a directory: {}",
            canonical.display()
        )));
    }

    enforce_workspace_root(&canonical)?;
    Ok(canonical)
}

fn reject_parent_components(path_str: &str) -> Result<()> {
    let contains_parent = Path::new(path_str)
        .components()
        .any(|c| c == Component::ParentDir);
    if contains_parent {
        return Err(Error::InvalidArgument(format!(
            "path contains a '..' component: {path_str}"
        )));
    }
    Ok(())
}

fn enforce_workspace_root(canonical: &Path) -> Result<()> {
    let Ok(workspace) = std::env::var("AIDB_WORKSPACE_ROOT") else {
        return Ok(());
    };
    let workspace_canonical = PathBuf::from(&workspace)
        .canonicalize()
        .map_err(|e| Error::InvalidArgument(format!("invalid AIDB_WORKSPACE_ROOT '{workspace}': {e}")))?;

    if !canonical.starts_with(&workspace_canonical) {
        return Err(Error::InvalidArgument(format!(
            "path outside workspace: {} (workspace: {})",
            canonical.display(),
            workspace_canonical.display()
        )));
    }
    Ok(())
}

/// Resolve a path the way most adapters report them: a plain absolute
/// filesystem path that either exists locally or doesn't.
pub fn resolve_generic(reported: &str) -> SourcePathResolution {
    if let Some((archive, member)) = split_archive_member(reported) {
        return SourcePathResolution::ArchiveMember {
            archive: archive.to_string(),
            member: member.to_string(),
        };
    }

    if Path::new(reported).is_absolute() && Path::new(reported).exists() {
        SourcePathResolution::Local(reported.to_string())
    } else {
        SourcePathResolution::Opaque(reported.to_string())
    }
}

/// Splits a Java archive-member path like `/libs/app.jar!/pkg/File.java`
/// into its archive and in-archive member components.
pub fn split_archive_member(reported: &str) -> Option<(&str, &str)> {
    reported.split_once("!/")
}
