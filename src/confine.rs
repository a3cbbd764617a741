//! Path confinement for workspace writes.
//!
//! Every file path the pipeline reads or writes passes through this
//! module. The rule is deliberately strict: relative, short, no parent
//! references, no control bytes, conservative component charset. After
//! resolution the canonical result must still sit inside the workspace.

use std::path::{Component, Path, PathBuf};

use crate::error::{AppForgeError, Result};

/// Maximum length of a workspace-relative path.
pub const MAX_PATH_LEN: usize = 512;

/// Check the shape of a workspace-relative path.
///
/// A path is safe iff it is non-empty, at most 512 characters, relative,
/// free of `..`, NUL, CR, and LF, and every non-empty component matches
/// `[A-Za-z0-9_.-]+` without a leading dot.
///
/// # Errors
///
/// Returns `AppForgeError::Validation` naming the first violated rule.
pub fn check_relative_path(rel: &str) -> Result<()> {
    if rel.is_empty() {
        return Err(AppForgeError::Validation("file path is empty".into()));
    }
    if rel.len() > MAX_PATH_LEN {
        return Err(AppForgeError::Validation(format!(
            "file path exceeds {MAX_PATH_LEN} characters: {} chars",
            rel.len()
        )));
    }
    if rel.contains('\0') || rel.contains('\r') || rel.contains('\n') {
        return Err(AppForgeError::Validation(
            "file path contains a control character".into(),
        ));
    }
    if Path::new(rel).is_absolute() || rel.starts_with('/') || rel.starts_with('\\') {
        return Err(AppForgeError::Validation(format!(
            "file path must be relative: '{rel}'"
        )));
    }

    for component in rel.split('/') {
        if component.is_empty() {
            return Err(AppForgeError::Validation(format!(
                "file path contains an empty component: '{rel}'"
            )));
        }
        if component == ".." {
            return Err(AppForgeError::Validation(format!(
                "file path contains a parent reference: '{rel}'"
            )));
        }
        if component.starts_with('.') {
            return Err(AppForgeError::Validation(format!(
                "file path component starts with a dot: '{component}'"
            )));
        }
        if !component
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b == b'-')
        {
            return Err(AppForgeError::Validation(format!(
                "file path component has an invalid character: '{component}'"
            )));
        }
    }

    Ok(())
}

/// Resolve `rel` against `base` and prove the result stays inside `base`.
///
/// `base` is canonicalized (it must exist); the joined path is checked to
/// have the canonical base as a strict directory prefix, or to equal it.
/// The resolved path itself may not exist yet, so only its deepest
/// existing ancestor is canonicalized for the prefix check.
///
/// # Errors
///
/// Returns `AppForgeError::Validation` if the path shape is unsafe or the
/// resolution escapes the base.
pub fn sanitize(base: &Path, rel: &str) -> Result<PathBuf> {
    check_relative_path(rel)?;

    let canonical_base = base.canonicalize().map_err(|e| {
        AppForgeError::Validation(format!(
            "workspace root cannot be canonicalized: {}: {e}",
            base.display()
        ))
    })?;

    let joined = canonical_base.join(rel);

    // Canonicalize the deepest existing ancestor so symlinked components
    // cannot smuggle the path out of the workspace.
    let verified = canonicalize_existing_prefix(&joined)?;
    if verified != canonical_base && !verified.starts_with(&canonical_base) {
        return Err(AppForgeError::Validation(format!(
            "path escapes workspace: '{rel}'"
        )));
    }

    Ok(joined)
}

/// Walk up from `path` to its deepest existing ancestor and canonicalize
/// that, then re-append the non-existing remainder.
fn canonicalize_existing_prefix(path: &Path) -> Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();

    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => {
                return Err(AppForgeError::Validation(format!(
                    "path has no existing ancestor: {}",
                    path.display()
                )))
            }
        }
    }

    let mut canonical = existing.canonicalize().map_err(|e| {
        AppForgeError::Validation(format!("cannot canonicalize {}: {e}", existing.display()))
    })?;
    for name in tail.iter().rev() {
        canonical.push(name);
    }

    // The remainder was shape-checked, so it cannot contain `..`, but a
    // belt check keeps the invariant local.
    debug_assert!(!canonical
        .components()
        .any(|c| matches!(c, Component::ParentDir)));

    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn accepts_plain_nested_paths() {
        check_relative_path("app/src/main/Main.kt").unwrap();
        check_relative_path("build.gradle.kts").unwrap();
        check_relative_path("a_b-c.1/d").unwrap();
    }

    #[test]
    fn rejects_empty_and_oversized() {
        assert!(check_relative_path("").is_err());
        let long = "a/".repeat(300);
        assert!(check_relative_path(&long).is_err());
    }

    #[test]
    fn rejects_absolute_and_parent() {
        assert!(check_relative_path("/abs").is_err());
        assert!(check_relative_path("../x").is_err());
        assert!(check_relative_path("a/../b").is_err());
    }

    #[test]
    fn rejects_empty_components_and_hidden() {
        assert!(check_relative_path("a//b").is_err());
        assert!(check_relative_path(".hidden").is_err());
        assert!(check_relative_path("a/.hidden/b").is_err());
        assert!(check_relative_path("a/").is_err());
    }

    #[test]
    fn rejects_control_bytes_and_odd_chars() {
        assert!(check_relative_path("a\0b").is_err());
        assert!(check_relative_path("a\rb").is_err());
        assert!(check_relative_path("a\nb").is_err());
        assert!(check_relative_path("a b").is_err());
        assert!(check_relative_path("a*").is_err());
    }

    #[test]
    fn sanitize_keeps_paths_inside_base() {
        let tmp = TempDir::new().unwrap();
        let out = sanitize(tmp.path(), "src/Main.kt").unwrap();
        assert!(out.starts_with(tmp.path().canonicalize().unwrap()));
    }

    #[test]
    fn sanitize_is_idempotent_modulo_canonicalization() {
        let tmp = TempDir::new().unwrap();
        let first = sanitize(tmp.path(), "gen/File.kt").unwrap();
        let second = sanitize(tmp.path(), "gen/File.kt").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn sanitize_rejects_escape_attempts() {
        let tmp = TempDir::new().unwrap();
        assert!(sanitize(tmp.path(), "../escape").is_err());
        assert!(sanitize(tmp.path(), "/etc/passwd").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn sanitize_rejects_symlink_escape() {
        let tmp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), tmp.path().join("link")).unwrap();
        assert!(sanitize(tmp.path(), "link/file.kt").is_err());
    }
}
