//! # Filesystem Projection
//!
//! Atomic multi-file writes into a mount target, plus the helpers the mount
//! orchestrator and the rotation reconciler use to project provider responses.

pub mod atomic_writer;

pub use atomic_writer::{AtomicWriter, FileProjection, WriteOutcome, DATA_DIR_NAME};

use crate::errors::{Error, Result};
use crate::proto::File;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Whether `rename(2)` can atomically replace an existing symlink.
pub const fn supports_atomic_symlink_swap() -> bool {
    cfg!(unix)
}

/// Convert provider files into projections and write them into `target_path`.
///
/// Every file is owned by `fs_group` when one is given. Duplicate paths are
/// rejected.
pub fn write_payloads(
    target_path: &Path,
    files: &[File],
    fs_group: Option<u32>,
) -> Result<WriteOutcome> {
    let mut payload = BTreeMap::new();
    for file in files {
        let mode = u32::try_from(file.mode).map_err(|_| {
            Error::invalid_field(format!("invalid mode {} for {}", file.mode, file.path), "mode")
        })?;
        let projection = FileProjection::new(file.contents.clone(), mode).with_fs_group(fs_group);
        if payload.insert(file.path.clone(), projection).is_some() {
            return Err(Error::invalid_field(
                format!("duplicate file path in payload: {}", file.path),
                "path",
            ));
        }
    }

    let writer = AtomicWriter::new(target_path, "secrets-store-csi")?;
    writer.write(&payload)
}

/// Visible top-level names under `target_path` mapped to their full paths.
pub fn get_mounted_files(target_path: &Path) -> Result<BTreeMap<String, PathBuf>> {
    let entries = fs::read_dir(target_path).map_err(|e| {
        Error::io(format!("failed to list mounted files in {}", target_path.display()), e)
    })?;

    let mut files = BTreeMap::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io("failed to read directory entry", e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with("..") {
            continue;
        }
        files.insert(name.clone(), target_path.join(name));
    }
    Ok(files)
}

#[cfg(unix)]
pub(crate) fn symlink(original: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(windows)]
pub(crate) fn symlink(original: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(original, link)
}

#[cfg(unix)]
pub(crate) fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
pub(crate) fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
pub(crate) fn file_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
pub(crate) fn file_mode(meta: &fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(unix)]
pub(crate) fn create_dir_all_with_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(mode).create(path)
}

#[cfg(not(unix))]
pub(crate) fn create_dir_all_with_mode(path: &Path, _mode: u32) -> io::Result<()> {
    fs::create_dir_all(path)
}

#[cfg(unix)]
pub(crate) fn create_file_with_mode(path: &Path, mode: u32) -> io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new().write(true).create_new(true).mode(mode).open(path)
}

#[cfg(not(unix))]
pub(crate) fn create_file_with_mode(path: &Path, _mode: u32) -> io::Result<fs::File> {
    fs::OpenOptions::new().write(true).create_new(true).open(path)
}

#[cfg(unix)]
pub(crate) fn chown_group(path: &Path, gid: u32) -> io::Result<()> {
    std::os::unix::fs::chown(path, None, Some(gid))
}

#[cfg(not(unix))]
pub(crate) fn chown_group(_path: &Path, _gid: u32) -> io::Result<()> {
    Ok(())
}
