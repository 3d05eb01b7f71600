//! Atomic projection of a file set into a directory.
//!
//! Layout under the target directory:
//!
//! ```text
//! ..data            -> ..2026_10_19_12_00_00.123456789.42   (pointer symlink)
//! ..2026_10_19_...  /                                        (payload directory)
//! tls.crt           -> ..data/tls.crt                        (visible names)
//! nested            -> ..data/nested
//! ```
//!
//! Readers always resolve visible names through `..data`, so renaming a fresh
//! pointer over it switches every file at once. The rename is the single
//! commit point of [`AtomicWriter::write`].

use super::{set_mode, supports_atomic_symlink_swap, symlink};
use crate::errors::{Error, Result};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Name of the pointer symlink
pub const DATA_DIR_NAME: &str = "..data";
const NEW_DATA_DIR_NAME: &str = "..data_tmp";

const MAX_FILE_NAME_LENGTH: usize = 255;
const MAX_PATH_LENGTH: usize = 4096;

/// One file to project: content, mode and optional owning group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileProjection {
    pub data: Vec<u8>,
    pub mode: u32,
    pub fs_group: Option<u32>,
}

impl FileProjection {
    pub fn new(data: impl Into<Vec<u8>>, mode: u32) -> Self {
        Self { data: data.into(), mode, fs_group: None }
    }

    pub fn with_fs_group(mut self, gid: Option<u32>) -> Self {
        self.fs_group = gid;
        self
    }
}

/// Result of a [`AtomicWriter::write`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Payload matched what was on disk; nothing was touched
    Unchanged,
    /// A new payload directory was committed
    Written { data_dir: String },
}

/// Writes a payload into `target_dir` so readers never observe partial state.
///
/// Not internally synchronized: callers must ensure a single writer per target
/// directory at a time.
#[derive(Debug, Clone)]
pub struct AtomicWriter {
    target_dir: PathBuf,
    log_context: String,
}

impl AtomicWriter {
    /// Create a writer for an existing directory
    pub fn new(target_dir: impl Into<PathBuf>, log_context: impl Into<String>) -> Result<Self> {
        let target_dir = target_dir.into();
        let meta = fs::metadata(&target_dir).map_err(|e| {
            Error::io(format!("target directory {} is not accessible", target_dir.display()), e)
        })?;
        if !meta.is_dir() {
            return Err(Error::invalid_argument(format!(
                "target {} is not a directory",
                target_dir.display()
            )));
        }
        Ok(Self { target_dir, log_context: log_context.into() })
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// Project `payload` into the target directory.
    ///
    /// Any failure before the pointer swap leaves the directory exactly as it
    /// was. Failures after the swap are logged only: the new content is live.
    pub fn write(&self, payload: &BTreeMap<String, FileProjection>) -> Result<WriteOutcome> {
        // (1) validate and clean
        let payload = validate_payload(payload)?;

        // (2) resolve the current payload directory
        let data_dir_path = self.target_dir.join(DATA_DIR_NAME);
        let old_ts_dir = match fs::read_link(&data_dir_path) {
            Ok(target) => Some(target.to_string_lossy().into_owned()),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                error!(context = %self.log_context, error = %e, "Unable to read pointer symlink");
                return Err(Error::io("failed to read data directory pointer", e));
            }
        };

        // (3) skip the write entirely when nothing changes
        let mut paths_to_remove = BTreeSet::new();
        if let Some(old) = &old_ts_dir {
            let old_ts_path = self.target_dir.join(old);
            paths_to_remove = paths_to_remove_for(&payload, &old_ts_path)?;
            if should_write_payload(&payload, &old_ts_path)? {
                debug!(context = %self.log_context, "Payload changed, writing new version");
            } else if paths_to_remove.is_empty() {
                debug!(context = %self.log_context, "No change in payload, skipping write");
                return Ok(WriteOutcome::Unchanged);
            }
        }

        // (4) write the new payload directory
        let ts_dir = self.new_timestamp_dir()?;
        let ts_path = self.target_dir.join(&ts_dir);
        if let Err(e) = write_payload_to_dir(&payload, &ts_path) {
            error!(context = %self.log_context, error = %e, "Unable to write payload");
            self.discard(&ts_path, &[]);
            return Err(e);
        }

        // (5) visible names resolve through the pointer, so they survive swaps
        let created_links = match self.create_user_visible_files(&payload) {
            Ok(created) => created,
            Err((created, e)) => {
                error!(context = %self.log_context, error = %e, "Unable to create visible links");
                self.discard(&ts_path, &created);
                return Err(e);
            }
        };

        // (6) commit: swap the pointer
        if let Err(e) = self.swap_pointer(&ts_dir, &data_dir_path) {
            error!(context = %self.log_context, error = %e, "Unable to swap data directory pointer");
            self.discard(&ts_path, &created_links);
            return Err(e);
        }

        // (7) drop top-level names no longer in the payload
        for path in &paths_to_remove {
            if path.contains('/') {
                continue;
            }
            let visible = self.target_dir.join(path);
            if let Err(e) = fs::remove_file(&visible) {
                if e.kind() != ErrorKind::NotFound {
                    warn!(
                        context = %self.log_context,
                        path = %visible.display(),
                        error = %e,
                        "Unable to remove stale visible path"
                    );
                }
            }
        }

        // (8) the previous payload directory is now unreferenced
        if let Some(old) = &old_ts_dir {
            let old_ts_path = self.target_dir.join(old);
            if let Err(e) = fs::remove_dir_all(&old_ts_path) {
                warn!(
                    context = %self.log_context,
                    path = %old_ts_path.display(),
                    error = %e,
                    "Unable to remove previous payload directory"
                );
            }
        }

        info!(
            context = %self.log_context,
            data_dir = %ts_dir,
            files = payload.len(),
            removed = paths_to_remove.len(),
            "Payload written"
        );

        Ok(WriteOutcome::Written { data_dir: ts_dir })
    }

    fn new_timestamp_dir(&self) -> Result<String> {
        let stamp = Utc::now().format("%Y_%m_%d_%H_%M_%S%.9f");
        for _ in 0..8 {
            let name = format!("..{}.{}", stamp, rand::random::<u32>());
            let path = self.target_dir.join(&name);
            match fs::create_dir(&path) {
                Ok(()) => {
                    set_mode(&path, 0o755)
                        .map_err(|e| Error::io("failed to set payload directory mode", e))?;
                    return Ok(name);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(Error::io("failed to create payload directory", e)),
            }
        }
        Err(Error::internal("unable to allocate a unique payload directory name"))
    }

    /// Returns the links it created so a failed write can undo them.
    fn create_user_visible_files(
        &self,
        payload: &BTreeMap<String, FileProjection>,
    ) -> std::result::Result<Vec<PathBuf>, (Vec<PathBuf>, Error)> {
        let mut created = Vec::new();
        let top_level: BTreeSet<&str> =
            payload.keys().filter_map(|p| p.split('/').next()).collect();

        for name in top_level {
            let visible = self.target_dir.join(name);
            match fs::symlink_metadata(&visible) {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    let link_target = Path::new(DATA_DIR_NAME).join(name);
                    if let Err(e) = symlink(&link_target, &visible) {
                        return Err((created, Error::io("failed to create visible symlink", e)));
                    }
                    created.push(visible);
                }
                Err(e) => return Err((created, Error::io("failed to stat visible path", e))),
            }
        }

        Ok(created)
    }

    fn swap_pointer(&self, ts_dir: &str, data_dir_path: &Path) -> Result<()> {
        let new_data_dir_path = self.target_dir.join(NEW_DATA_DIR_NAME);
        // leftover from an interrupted write
        match fs::remove_file(&new_data_dir_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io("failed to clear temporary pointer", e)),
        }

        symlink(Path::new(ts_dir), &new_data_dir_path)
            .map_err(|e| Error::io("failed to create temporary pointer", e))?;

        if !supports_atomic_symlink_swap() {
            // brief window where ..data is missing
            match fs::remove_file(data_dir_path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    let _ = fs::remove_file(&new_data_dir_path);
                    return Err(Error::io("failed to remove data directory pointer", e));
                }
            }
        }

        if let Err(e) = fs::rename(&new_data_dir_path, data_dir_path) {
            let _ = fs::remove_file(&new_data_dir_path);
            return Err(Error::io("failed to rename temporary pointer", e));
        }
        Ok(())
    }

    fn discard(&self, ts_path: &Path, links: &[PathBuf]) {
        for link in links {
            if let Err(e) = fs::remove_file(link) {
                warn!(context = %self.log_context, path = %link.display(), error = %e, "Cleanup failed");
            }
        }
        if let Err(e) = fs::remove_dir_all(ts_path) {
            warn!(context = %self.log_context, path = %ts_path.display(), error = %e, "Cleanup failed");
        }
    }
}

/// Validate every path and return the payload keyed by cleaned paths.
pub fn validate_payload(
    payload: &BTreeMap<String, FileProjection>,
) -> Result<BTreeMap<String, FileProjection>> {
    let mut cleaned = BTreeMap::new();
    for (path, projection) in payload {
        validate_path(path)?;
        let clean = clean_path(path);
        if clean.is_empty() {
            return Err(Error::invalid_field(
                format!("invalid path: names the target directory itself: {}", path),
                "path",
            ));
        }
        if cleaned.insert(clean.clone(), projection.clone()).is_some() {
            return Err(Error::invalid_field(
                format!("invalid path: {} collides with another path as {}", path, clean),
                "path",
            ));
        }
    }
    Ok(cleaned)
}

/// Reject paths that could escape the target directory or exceed OS limits.
pub fn validate_path(target_path: &str) -> Result<()> {
    if target_path.len() > MAX_PATH_LENGTH {
        return Err(Error::invalid_field(
            format!("invalid path: must be less than or equal to {} characters", MAX_PATH_LENGTH),
            "path",
        ));
    }
    if target_path.is_empty() {
        return Err(Error::invalid_field("invalid path: must not be empty", "path"));
    }
    if target_path.starts_with('/') || Path::new(target_path).is_absolute() {
        return Err(Error::invalid_field(
            format!("invalid path: must be relative path: {}", target_path),
            "path",
        ));
    }

    let items: Vec<&str> = target_path.split('/').collect();
    for item in &items {
        if *item == ".." {
            return Err(Error::invalid_field(
                format!("invalid path: must not contain '..': {}", target_path),
                "path",
            ));
        }
        if item.len() > MAX_FILE_NAME_LENGTH {
            return Err(Error::invalid_field(
                format!(
                    "invalid path: filenames must be less than or equal to {} characters",
                    MAX_FILE_NAME_LENGTH
                ),
                "path",
            ));
        }
    }
    if items[0].starts_with("..") && items[0].len() > 2 {
        return Err(Error::invalid_field(
            format!("invalid path: must not start with '..': {}", target_path),
            "path",
        ));
    }
    Ok(())
}

fn clean_path(path: &str) -> String {
    path.split('/').filter(|s| !s.is_empty() && *s != ".").collect::<Vec<_>>().join("/")
}

/// Every path under the old payload that the new payload no longer covers.
fn paths_to_remove_for(
    payload: &BTreeMap<String, FileProjection>,
    old_ts_path: &Path,
) -> Result<BTreeSet<String>> {
    let mut existing = BTreeSet::new();
    walk_relative(old_ts_path, "", &mut existing)
        .map_err(|e| Error::io("failed to walk previous payload directory", e))?;

    let mut new_paths = BTreeSet::new();
    for file in payload.keys() {
        // ancestors too, so non-empty directories are never scheduled for removal
        let mut sub_path = file.as_str();
        loop {
            new_paths.insert(sub_path.to_string());
            match sub_path.rfind('/') {
                Some(idx) => sub_path = &sub_path[..idx],
                None => break,
            }
        }
    }

    Ok(existing.difference(&new_paths).cloned().collect())
}

fn walk_relative(root: &Path, prefix: &str, out: &mut BTreeSet<String>) -> std::io::Result<()> {
    let dir = if prefix.is_empty() { root.to_path_buf() } else { root.join(prefix) };
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let relative = if prefix.is_empty() { name } else { format!("{}/{}", prefix, name) };
        let file_type = entry.file_type()?;
        out.insert(relative.clone());
        if file_type.is_dir() {
            walk_relative(root, &relative, out)?;
        }
    }
    Ok(())
}

fn should_write_payload(
    payload: &BTreeMap<String, FileProjection>,
    old_ts_path: &Path,
) -> Result<bool> {
    for (path, projection) in payload {
        if should_write_file(&old_ts_path.join(path), projection)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn should_write_file(path: &Path, projection: &FileProjection) -> Result<bool> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(Error::io("failed to stat existing file", e)),
    };
    if !meta.is_file() {
        return Ok(true);
    }
    if super::file_mode(&meta) != projection.mode & 0o7777 {
        return Ok(true);
    }
    let existing = fs::read(path).map_err(|e| Error::io("failed to read existing file", e))?;
    Ok(existing != projection.data)
}

fn write_payload_to_dir(payload: &BTreeMap<String, FileProjection>, dir: &Path) -> Result<()> {
    for (path, projection) in payload {
        let full_path = dir.join(path);
        if let Some(parent) = full_path.parent() {
            super::create_dir_all_with_mode(parent, 0o755)
                .map_err(|e| Error::io(format!("failed to create directory for {}", path), e))?;
        }

        let mut file = super::create_file_with_mode(&full_path, projection.mode)
            .map_err(|e| Error::io(format!("failed to create {}", path), e))?;
        file.write_all(&projection.data)
            .map_err(|e| Error::io(format!("failed to write {}", path), e))?;
        file.sync_all().map_err(|e| Error::io(format!("failed to sync {}", path), e))?;
        drop(file);

        // the create above is narrowed by umask
        set_mode(&full_path, projection.mode)
            .map_err(|e| Error::io(format!("failed to chmod {}", path), e))?;

        if let Some(gid) = projection.fs_group {
            super::chown_group(&full_path, gid)
                .map_err(|e| Error::io(format!("failed to chown {}", path), e))?;
        }
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn payload(entries: &[(&str, &str, u32)]) -> BTreeMap<String, FileProjection> {
        entries
            .iter()
            .map(|(p, data, mode)| (p.to_string(), FileProjection::new(data.as_bytes(), *mode)))
            .collect()
    }

    fn visible_names(dir: &Path) -> BTreeSet<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| !n.starts_with(".."))
            .collect()
    }

    fn hidden_names(dir: &Path) -> BTreeSet<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(".."))
            .collect()
    }

    fn assert_matches_disk(dir: &Path, payload: &BTreeMap<String, FileProjection>) {
        for (path, projection) in payload {
            let full = dir.join(path);
            assert_eq!(fs::read(&full).unwrap(), projection.data, "content of {}", path);
            let mode = fs::metadata(&full).unwrap().permissions().mode() & 0o7777;
            assert_eq!(mode, projection.mode, "mode of {}", path);
        }
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let writer = AtomicWriter::new(dir.path(), "test").unwrap();
        let p = payload(&[("foo", "foo-data", 0o644), ("nested/bar.txt", "bar", 0o600)]);

        let outcome = writer.write(&p).unwrap();
        assert!(matches!(outcome, WriteOutcome::Written { .. }));
        assert_matches_disk(dir.path(), &p);

        let pointer = fs::read_link(dir.path().join(DATA_DIR_NAME)).unwrap();
        assert!(pointer.to_string_lossy().starts_with(".."));
        assert_eq!(
            fs::read_link(dir.path().join("foo")).unwrap(),
            Path::new(DATA_DIR_NAME).join("foo")
        );
    }

    #[test]
    fn test_mode_is_not_narrowed_by_umask() {
        let dir = TempDir::new().unwrap();
        let writer = AtomicWriter::new(dir.path(), "test").unwrap();
        let p = payload(&[("wide", "x", 0o666), ("exec", "y", 0o777)]);
        writer.write(&p).unwrap();
        assert_matches_disk(dir.path(), &p);
    }

    #[test]
    #[traced_test]
    fn test_second_identical_write_is_noop() {
        let dir = TempDir::new().unwrap();
        let writer = AtomicWriter::new(dir.path(), "test").unwrap();
        let p = payload(&[("a", "1", 0o644), ("b/c", "2", 0o644)]);

        writer.write(&p).unwrap();
        let pointer_before = fs::read_link(dir.path().join(DATA_DIR_NAME)).unwrap();
        let hidden_before = hidden_names(dir.path());

        assert_eq!(writer.write(&p).unwrap(), WriteOutcome::Unchanged);
        assert_eq!(fs::read_link(dir.path().join(DATA_DIR_NAME)).unwrap(), pointer_before);
        assert_eq!(hidden_names(dir.path()), hidden_before);
        assert!(logs_contain("No change in payload"));
    }

    #[test]
    fn test_mode_change_triggers_write() {
        let dir = TempDir::new().unwrap();
        let writer = AtomicWriter::new(dir.path(), "test").unwrap();
        writer.write(&payload(&[("a", "1", 0o644)])).unwrap();

        let p = payload(&[("a", "1", 0o600)]);
        assert!(matches!(writer.write(&p).unwrap(), WriteOutcome::Written { .. }));
        assert_matches_disk(dir.path(), &p);
    }

    #[test]
    fn test_removed_top_level_names_disappear() {
        let dir = TempDir::new().unwrap();
        let writer = AtomicWriter::new(dir.path(), "test").unwrap();

        writer.write(&payload(&[("foo/bar.txt", "hi", 0o644), ("foo.txt", "x", 0o644)])).unwrap();
        let old_pointer = fs::read_link(dir.path().join(DATA_DIR_NAME)).unwrap();

        writer.write(&payload(&[("foo/baz.txt", "y", 0o644)])).unwrap();

        assert_eq!(visible_names(dir.path()), BTreeSet::from(["foo".to_string()]));
        assert_eq!(fs::read(dir.path().join("foo/baz.txt")).unwrap(), b"y");
        assert!(!dir.path().join("foo.txt").exists());
        assert!(!dir.path().join("foo/bar.txt").exists());
        // old payload directory is gone, only the pointer and the new one remain
        assert!(!dir.path().join(&old_pointer).exists());
        assert_eq!(hidden_names(dir.path()).len(), 2);
    }

    #[test]
    fn test_failed_write_leaves_directory_untouched() {
        let dir = TempDir::new().unwrap();
        let writer = AtomicWriter::new(dir.path(), "test").unwrap();
        let p = payload(&[("keep", "v1", 0o644)]);
        writer.write(&p).unwrap();

        let pointer_before = fs::read_link(dir.path().join(DATA_DIR_NAME)).unwrap();
        let hidden_before = hidden_names(dir.path());
        let visible_before = visible_names(dir.path());

        // "clash" is both a file and a directory, so payload writing fails
        let bad = payload(&[("clash", "file", 0o644), ("clash/inner", "x", 0o644)]);
        assert!(writer.write(&bad).is_err());

        assert_eq!(fs::read_link(dir.path().join(DATA_DIR_NAME)).unwrap(), pointer_before);
        assert_eq!(hidden_names(dir.path()), hidden_before);
        assert_eq!(visible_names(dir.path()), visible_before);
        assert_matches_disk(dir.path(), &p);
    }

    #[test]
    fn test_path_validation() {
        assert!(validate_path("/abs/path").is_err());
        assert!(validate_path("a/../b").is_err());
        assert!(validate_path("..").is_err());
        assert!(validate_path("..hidden").is_err());
        assert!(validate_path("").is_err());
        assert!(validate_path(&"x".repeat(256)).is_err());
        assert!(validate_path(&"a/".repeat(2049)).is_err());
        assert!(validate_path(&format!("{}/{}", "d".repeat(255), "f")).is_ok());
        assert!(validate_path("a/b/c.txt").is_ok());
        assert!(validate_path("a..b").is_ok());
    }

    #[test]
    fn test_long_path_rejected_before_touching_disk() {
        let dir = TempDir::new().unwrap();
        let writer = AtomicWriter::new(dir.path(), "test").unwrap();
        let long = "a/".repeat(2048) + "b";
        assert!(long.len() > MAX_PATH_LENGTH);
        let err = writer.write(&payload(&[(long.as_str(), "x", 0o644)])).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_paths_are_cleaned() {
        let dir = TempDir::new().unwrap();
        let writer = AtomicWriter::new(dir.path(), "test").unwrap();
        writer.write(&payload(&[("./a//b.txt", "x", 0o644)])).unwrap();
        assert_eq!(fs::read(dir.path().join("a/b.txt")).unwrap(), b"x");
    }

    #[test]
    fn test_paths_cleaning_to_nothing_or_colliding_are_rejected() {
        let dir = TempDir::new().unwrap();
        let writer = AtomicWriter::new(dir.path(), "test").unwrap();

        for bad in [".", "./", ".//."] {
            let err = writer.write(&payload(&[(bad, "x", 0o644)])).unwrap_err();
            assert!(matches!(err, Error::InvalidArgument { .. }), "{:?}", bad);
        }

        let err = writer.write(&payload(&[("a", "1", 0o644), ("./a", "2", 0o644)])).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
        assert!(fs::read_link(dir.path().join(DATA_DIR_NAME)).is_err());
        assert!(visible_names(dir.path()).is_empty());
    }

    #[test]
    fn test_missing_target_dir() {
        let dir = TempDir::new().unwrap();
        assert!(AtomicWriter::new(dir.path().join("missing"), "test").is_err());
    }

    fn payload_strategy() -> impl Strategy<Value = BTreeMap<String, FileProjection>> {
        let path = prop_oneof![
            "[a-z]{1,6}\\.txt",
            "d[a-z]{0,4}/[a-z]{1,6}\\.txt",
        ];
        let mode = prop::sample::select(vec![0o400u32, 0o440, 0o600, 0o640, 0o644, 0o755]);
        let projection = (prop::collection::vec(any::<u8>(), 0..64), mode)
            .prop_map(|(data, mode)| FileProjection::new(data, mode));
        prop::collection::btree_map(path, projection, 1..6)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_write_reads_back_exactly(p in payload_strategy()) {
            let dir = TempDir::new().unwrap();
            let writer = AtomicWriter::new(dir.path(), "prop").unwrap();
            writer.write(&p).unwrap();
            for (path, projection) in &p {
                let full = dir.path().join(path);
                prop_assert_eq!(fs::read(&full).unwrap(), projection.data.clone());
                let mode = fs::metadata(&full).unwrap().permissions().mode() & 0o7777;
                prop_assert_eq!(mode, projection.mode);
            }
            prop_assert_eq!(writer.write(&p).unwrap(), WriteOutcome::Unchanged);
        }

        #[test]
        fn prop_successive_writes_expose_only_latest(a in payload_strategy(), b in payload_strategy()) {
            let dir = TempDir::new().unwrap();
            let writer = AtomicWriter::new(dir.path(), "prop").unwrap();
            writer.write(&a).unwrap();
            writer.write(&b).unwrap();

            let expected: BTreeSet<String> =
                b.keys().map(|k| k.split('/').next().unwrap().to_string()).collect();
            prop_assert_eq!(visible_names(dir.path()), expected);
            for (path, projection) in &b {
                prop_assert_eq!(fs::read(dir.path().join(path)).unwrap(), projection.data.clone());
            }
        }
    }
}
