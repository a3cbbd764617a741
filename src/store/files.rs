//! Workspace file operations.
//!
//! Every path goes through confinement first. Writes are atomic: content
//! lands in a sibling `<path>.tmp`, is fsynced, gets its mode, and is
//! renamed over the destination. The temp file is unlinked on any
//! failure path.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::limits::{FILE_SIZE_WARN_FRACTION, MAX_FILE_SIZE_BYTES};
use crate::confine::sanitize;
use crate::error::{AppForgeError, Result};

/// File names written with the executable mode.
const EXECUTABLE_WRAPPERS: &[&str] = &["gradlew", "gradlew.bat"];

/// Atomically write `content` to `rel` under `workspace`.
///
/// # Errors
///
/// `AppForgeError::Validation` for unsafe paths and oversized content;
/// IO errors propagate.
pub fn write_file(workspace: &Path, rel: &str, content: &str) -> Result<()> {
    let target = sanitize(workspace, rel)?;

    let byte_len = content.len();
    if byte_len > MAX_FILE_SIZE_BYTES {
        return Err(AppForgeError::Validation(format!(
            "file '{rel}' is {byte_len} bytes, exceeding the {MAX_FILE_SIZE_BYTES} byte limit"
        )));
    }
    if byte_len as f64 >= MAX_FILE_SIZE_BYTES as f64 * FILE_SIZE_WARN_FRACTION {
        warn!(
            path = rel,
            bytes = byte_len,
            limit = MAX_FILE_SIZE_BYTES,
            "file size approaching limit"
        );
    }

    if let Some(parent) = target.parent() {
        ensure_dirs(parent)?;
    }

    let temp = temp_path(&target);
    let write_result = write_temp(&temp, content, &target);
    if write_result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    write_result
}

fn write_temp(temp: &Path, content: &str, target: &Path) -> Result<()> {
    {
        let mut file = fs::File::create(temp)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }

    set_file_mode(temp, target)?;
    fs::rename(temp, target)?;
    Ok(())
}

/// Read `rel` under `workspace`.
///
/// # Errors
///
/// `AppForgeError::Validation` for unsafe paths; IO errors propagate.
pub fn read_file(workspace: &Path, rel: &str) -> Result<String> {
    let target = sanitize(workspace, rel)?;
    Ok(fs::read_to_string(target)?)
}

/// List workspace files relative to the root, excluding dotfiles and
/// `*.tmp` leftovers, sorted for deterministic output.
///
/// # Errors
///
/// IO errors propagate.
pub fn list_files(workspace: &Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    walk(workspace, workspace, &mut out)?;
    out.sort();
    Ok(out)
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if name.starts_with('.') || name.ends_with(".tmp") {
            continue;
        }

        if path.is_dir() {
            walk(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

fn temp_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}

fn ensure_dirs(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_file_mode(temp: &Path, target: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let executable = target
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| EXECUTABLE_WRAPPERS.contains(&n));
    let mode = if executable { 0o755 } else { 0o644 };
    fs::set_permissions(temp, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_file_mode(_temp: &Path, _target: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_and_reads_back() {
        let ws = TempDir::new().unwrap();
        write_file(ws.path(), "src/Main.kt", "fun main() {}").unwrap();
        let content = read_file(ws.path(), "src/Main.kt").unwrap();
        assert_eq!(content, "fun main() {}");
    }

    #[test]
    fn write_replaces_existing_content_atomically() {
        let ws = TempDir::new().unwrap();
        write_file(ws.path(), "a.kt", "first").unwrap();
        write_file(ws.path(), "a.kt", "second").unwrap();
        assert_eq!(read_file(ws.path(), "a.kt").unwrap(), "second");
    }

    #[test]
    fn no_temp_file_remains_after_write() {
        let ws = TempDir::new().unwrap();
        write_file(ws.path(), "b.kt", "content").unwrap();
        assert!(!ws.path().join("b.kt.tmp").exists());
    }

    #[test]
    fn size_limit_boundary() {
        let ws = TempDir::new().unwrap();
        let exact = "x".repeat(MAX_FILE_SIZE_BYTES);
        write_file(ws.path(), "exact.kt", &exact).unwrap();

        let over = "x".repeat(MAX_FILE_SIZE_BYTES + 1);
        let err = write_file(ws.path(), "over.kt", &over).unwrap_err();
        assert!(matches!(err, AppForgeError::Validation(_)));
        assert!(!ws.path().join("over.kt").exists());
    }

    #[test]
    fn unsafe_paths_are_rejected() {
        let ws = TempDir::new().unwrap();
        assert!(write_file(ws.path(), "../escape.kt", "x").is_err());
        assert!(write_file(ws.path(), "/abs.kt", "x").is_err());
        assert!(read_file(ws.path(), "../escape.kt").is_err());
    }

    #[test]
    fn listing_skips_dotfiles_and_temps() {
        let ws = TempDir::new().unwrap();
        write_file(ws.path(), "keep.kt", "x").unwrap();
        write_file(ws.path(), "nested/also.kt", "y").unwrap();
        fs::write(ws.path().join(".hidden"), "z").unwrap();
        fs::write(ws.path().join("orphan.tmp"), "z").unwrap();

        let files = list_files(ws.path()).unwrap();
        assert_eq!(files, vec!["keep.kt".to_string(), "nested/also.kt".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn wrapper_scripts_are_executable() {
        use std::os::unix::fs::PermissionsExt;
        let ws = TempDir::new().unwrap();
        write_file(ws.path(), "gradlew", "#!/bin/sh\n").unwrap();
        write_file(ws.path(), "normal.kt", "x").unwrap();

        let wrapper = fs::metadata(ws.path().join("gradlew")).unwrap();
        assert_eq!(wrapper.permissions().mode() & 0o777, 0o755);

        let normal = fs::metadata(ws.path().join("normal.kt")).unwrap();
        assert_eq!(normal.permissions().mode() & 0o777, 0o644);
    }
}
