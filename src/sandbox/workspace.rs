//! Job workspace
//!
//! A temporary directory named `ce-XXXXXX` under the configured root. It is
//! owned by exactly one job and removed when dropped, so cleanup also happens
//! on early returns and panics. `close` removes it eagerly and reports errors.
//!
//! Job code may strip permissions from the tree (`chmod 555 .`). Owner rwx is
//! restored on every directory before removal.

use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;
use tokio::fs;
use tracing::{debug, warn};

const WORKSPACE_PREFIX: &str = "ce-";

#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a fresh workspace under `root` (created if missing)
    pub fn create(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("Failed to create workspace root {}", root.display()))?;
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(root)
            .with_context(|| format!("Failed to create workspace in {}", root.display()))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `content` to `path` (inside the workspace), optionally as an
    /// executable
    pub async fn write_source(&self, path: &Path, content: &str, executable: bool) -> Result<PathBuf> {
        if !path.starts_with(self.path()) {
            anyhow::bail!("Source path {} escapes the workspace", path.display());
        }
        fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write source {}", path.display()))?;
        if executable {
            fs::set_permissions(path, Permissions::from_mode(0o755))
                .await
                .with_context(|| format!("Failed to chmod {}", path.display()))?;
        }
        Ok(path.to_path_buf())
    }

    /// Remove the workspace now, logging instead of failing
    pub fn close(self) {
        let path = self.path().to_path_buf();
        restore_owner_access(&path);
        if let Err(e) = std::fs::remove_dir_all(&path) {
            warn!("Failed to remove workspace {}: {}", path.display(), e);
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        // No-op after `close`; TempDir removes what is left
        restore_owner_access(self.dir.path());
    }
}

/// Give the owner rwx on `dir` and every directory below it. Symlinks are
/// not followed.
fn restore_owner_access(dir: &Path) {
    let Ok(meta) = std::fs::symlink_metadata(dir) else {
        return;
    };
    if !meta.is_dir() {
        return;
    }
    let mode = meta.permissions().mode();
    if mode & 0o700 != 0o700 {
        if let Err(e) = std::fs::set_permissions(dir, Permissions::from_mode(mode | 0o700)) {
            debug!("Failed to restore access to {}: {}", dir.display(), e);
            return;
        }
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        if entry.file_type().is_ok_and(|t| t.is_dir()) {
            restore_owner_access(&entry.path());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_write_close() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::create(root.path()).unwrap();
        let path = ws.path().to_path_buf();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("ce-"));

        let src = ws
            .write_source(&path.join("main.sh"), "echo hi\n", true)
            .await
            .unwrap();
        let mode = std::fs::metadata(&src).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);

        ws.close();
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let path = {
            let ws = Workspace::create(root.path()).unwrap();
            std::fs::write(ws.path().join("f"), "x").unwrap();
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    fn lock_down(ws: &Workspace) {
        let inner = ws.path().join("d/e");
        std::fs::create_dir_all(&inner).unwrap();
        std::fs::write(inner.join("f"), "x").unwrap();
        std::fs::set_permissions(&inner, Permissions::from_mode(0o000)).unwrap();
        std::fs::set_permissions(ws.path().join("d"), Permissions::from_mode(0o000)).unwrap();
        std::fs::set_permissions(ws.path(), Permissions::from_mode(0o555)).unwrap();
    }

    #[test]
    fn test_close_removes_locked_down_tree() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::create(root.path()).unwrap();
        let path = ws.path().to_path_buf();
        lock_down(&ws);
        ws.close();
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_removes_locked_down_tree() {
        let root = tempfile::tempdir().unwrap();
        let path = {
            let ws = Workspace::create(root.path()).unwrap();
            lock_down(&ws);
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_unique_names() {
        let root = tempfile::tempdir().unwrap();
        let a = Workspace::create(root.path()).unwrap();
        let b = Workspace::create(root.path()).unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[tokio::test]
    async fn test_rejects_path_outside() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::create(root.path()).unwrap();
        assert!(ws
            .write_source(Path::new("/tmp/elsewhere.txt"), "x", false)
            .await
            .is_err());
    }
}
