//! Mount-point handling behind a trait so the orchestrator can run without
//! privileges in tests.

use crate::errors::{Error, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

#[async_trait]
pub trait Mounter: Send + Sync {
    /// Whether `target` is the root of a mount. A missing path is not.
    async fn is_mount_point(&self, target: &Path) -> Result<bool>;

    /// Mount an empty tmpfs on `target`
    async fn mount_tmpfs(&self, target: &Path) -> Result<()>;

    /// Unmount `target`; a path that is missing or not mounted is not an error
    async fn unmount(&self, target: &Path) -> Result<()>;

    /// True when unmounting also drops the files written into the mount
    fn unmount_clears_entries(&self) -> bool;
}

/// Real tmpfs mounts via `mount(2)`.
#[derive(Debug, Default, Clone)]
pub struct SystemMounter;

impl SystemMounter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Mounter for SystemMounter {
    async fn is_mount_point(&self, target: &Path) -> Result<bool> {
        let target = target.to_path_buf();
        tokio::task::spawn_blocking(move || is_mount_point_blocking(&target))
            .await
            .map_err(|e| Error::internal(format!("mount point check task failed: {}", e)))?
    }

    async fn mount_tmpfs(&self, target: &Path) -> Result<()> {
        let target = target.to_path_buf();
        tokio::task::spawn_blocking(move || sys::mount_tmpfs(&target))
            .await
            .map_err(|e| Error::internal(format!("mount task failed: {}", e)))?
    }

    async fn unmount(&self, target: &Path) -> Result<()> {
        let target = target.to_path_buf();
        tokio::task::spawn_blocking(move || sys::unmount(&target))
            .await
            .map_err(|e| Error::internal(format!("unmount task failed: {}", e)))?
    }

    fn unmount_clears_entries(&self) -> bool {
        true
    }
}

/// A path is a mount point when it lives on a different device than its
/// parent, or when it is its own parent.
fn is_mount_point_blocking(target: &Path) -> Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;

        let meta = match std::fs::metadata(target) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(Error::mount_io(target, "failed to stat target", e)),
        };
        let parent = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => return Ok(true),
        };
        let parent_meta = std::fs::metadata(parent)
            .map_err(|e| Error::mount_io(target, "failed to stat parent", e))?;

        Ok(meta.dev() != parent_meta.dev() || meta.ino() == parent_meta.ino())
    }

    #[cfg(not(unix))]
    {
        let _ = target;
        Err(Error::internal("mount point detection is not supported on this platform"))
    }
}

#[cfg(target_os = "linux")]
mod sys {
    use crate::errors::{Error, Result};
    use nix::errno::Errno;
    use nix::mount::{mount, umount, MsFlags};
    use std::path::Path;

    pub(super) fn mount_tmpfs(target: &Path) -> Result<()> {
        mount(Some("tmpfs"), target, Some("tmpfs"), MsFlags::empty(), None::<&str>).map_err(|e| {
            Error::mount_io(target, "failed to mount tmpfs", std::io::Error::from(e))
        })
    }

    pub(super) fn unmount(target: &Path) -> Result<()> {
        match umount(target) {
            Ok(()) => Ok(()),
            // not mounted / already gone
            Err(Errno::EINVAL) | Err(Errno::ENOENT) => Ok(()),
            Err(e) => Err(Error::mount_io(target, "failed to unmount", std::io::Error::from(e))),
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod sys {
    use crate::errors::{Error, Result};
    use std::path::Path;

    pub(super) fn mount_tmpfs(target: &Path) -> Result<()> {
        Err(Error::mount(target, "tmpfs mounts are only supported on linux"))
    }

    pub(super) fn unmount(target: &Path) -> Result<()> {
        Err(Error::mount(target, "unmount is only supported on linux"))
    }
}

/// Records mounts in memory instead of calling `mount(2)`.
///
/// Files written into a "mounted" directory stay on disk after unmount, so
/// the orchestrator's residual cleanup path is exercised.
#[derive(Debug, Default)]
pub struct FakeMounter {
    mounted: Mutex<HashSet<PathBuf>>,
    mount_calls: AtomicU32,
    unmount_calls: AtomicU32,
    fail_mount: AtomicBool,
    fail_unmount: AtomicBool,
}

impl FakeMounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_mount(&self, fail: bool) {
        self.fail_mount.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_unmount(&self, fail: bool) {
        self.fail_unmount.store(fail, Ordering::SeqCst);
    }

    pub fn mount_calls(&self) -> u32 {
        self.mount_calls.load(Ordering::SeqCst)
    }

    pub fn unmount_calls(&self) -> u32 {
        self.unmount_calls.load(Ordering::SeqCst)
    }

    pub fn is_mounted(&self, target: &Path) -> bool {
        self.mounted().contains(target)
    }

    fn mounted(&self) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
        self.mounted.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Mounter for FakeMounter {
    async fn is_mount_point(&self, target: &Path) -> Result<bool> {
        Ok(self.is_mounted(target))
    }

    async fn mount_tmpfs(&self, target: &Path) -> Result<()> {
        self.mount_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_mount.load(Ordering::SeqCst) {
            return Err(Error::mount(target, "fake mount failure"));
        }
        self.mounted().insert(target.to_path_buf());
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<()> {
        self.unmount_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_unmount.load(Ordering::SeqCst) {
            return Err(Error::mount(target, "fake unmount failure"));
        }
        self.mounted().remove(target);
        Ok(())
    }

    fn unmount_clears_entries(&self) -> bool {
        false
    }
}
