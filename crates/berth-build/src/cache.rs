//! Shared dependency cache, scoped per branch or tag.
//!
//! Each invocation gets a private [`CacheSession`] directory, restored from
//! the scope's last published snapshot. Only sessions that were acquired
//! read-write and marked populated by a successful build are written back.
//!
//! The backend is best-effort: a read failure yields a cold session and a
//! write failure drops the snapshot. Neither fails the build.
//!
//! # On-disk layout ([`FsCacheBackend`])
//!
//! ```text
//! <root>/<key>/CURRENT          id of the live generation
//! <root>/<key>/gen-<uuid>/...   complete snapshots
//! ```
//!
//! Writers fill a fresh generation and then atomically replace `CURRENT`,
//! so the last writer wins and readers only ever see complete snapshots.

use berth_core::{CachePolicy, CacheScope};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

const CURRENT_FILE: &str = "CURRENT";
const GENERATION_PREFIX: &str = "gen-";

/// Generations younger than this are never pruned, so in-flight readers and
/// writers of the same key keep their directories.
const PRUNE_GRACE: Duration = Duration::from_secs(15 * 60);

/// Mode given to files inserted without one.
const DEFAULT_FILE_MODE: u32 = 0o644;

/// One entry of a loaded snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntry {
    /// Regular file with its permission bits.
    File { contents: Vec<u8>, mode: u32 },
    /// Symbolic link, stored by target and never followed.
    Symlink(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Snapshot {
    /// A complete tree on disk, copied on restore.
    Dir(PathBuf),
    Entries(BTreeMap<PathBuf, CacheEntry>),
}

/// Snapshot of a directory tree.
///
/// Backends that already keep snapshots on disk hand out [`CachedData::at`]
/// handles, so restoring a large `CARGO_HOME` is a directory copy and never
/// goes through memory. [`CachedData::load`] reads a tree into memory for
/// backends that need to own the data. Both forms keep permission bits and
/// symlinks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedData {
    snapshot: Snapshot,
}

impl Default for CachedData {
    fn default() -> Self {
        Self {
            snapshot: Snapshot::Entries(BTreeMap::new()),
        }
    }
}

impl CachedData {
    /// An empty in-memory snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refer to the tree under `dir` without reading it.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self {
            snapshot: Snapshot::Dir(dir.into()),
        }
    }

    /// Read every file and symlink under `dir` into memory.
    pub fn capture(dir: &Path) -> Result<Self, CacheError> {
        let mut entries = BTreeMap::new();
        capture_into(dir, Path::new(""), &mut entries)?;
        Ok(Self {
            snapshot: Snapshot::Entries(entries),
        })
    }

    /// The in-memory form of this snapshot.
    pub fn load(self) -> Result<Self, CacheError> {
        match &self.snapshot {
            Snapshot::Dir(dir) => Self::capture(dir),
            Snapshot::Entries(_) => Ok(self),
        }
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        self.insert_entry(
            path,
            CacheEntry::File {
                contents: contents.into(),
                mode: DEFAULT_FILE_MODE,
            },
        );
    }

    /// Add an entry to an in-memory snapshot. An on-disk handle is replaced
    /// by an empty in-memory snapshot first.
    pub fn insert_entry(&mut self, path: impl Into<PathBuf>, entry: CacheEntry) {
        if let Snapshot::Dir(_) = self.snapshot {
            self.snapshot = Snapshot::Entries(BTreeMap::new());
        }
        if let Snapshot::Entries(entries) = &mut self.snapshot {
            entries.insert(path.into(), entry);
        }
    }

    /// Look up an entry of a loaded snapshot. On-disk handles have no
    /// loaded entries.
    pub fn get(&self, path: &Path) -> Option<&CacheEntry> {
        match &self.snapshot {
            Snapshot::Entries(entries) => entries.get(path),
            Snapshot::Dir(_) => None,
        }
    }

    /// Contents of a regular file in a loaded snapshot.
    pub fn file(&self, path: &Path) -> Option<&[u8]> {
        match self.get(path)? {
            CacheEntry::File { contents, .. } => Some(contents),
            CacheEntry::Symlink(_) => None,
        }
    }

    /// Number of loaded entries.
    pub fn len(&self) -> usize {
        match &self.snapshot {
            Snapshot::Entries(entries) => entries.len(),
            Snapshot::Dir(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recreate the snapshot below `dir`, creating directories as needed.
    pub fn restore(&self, dir: &Path) -> Result<(), CacheError> {
        match &self.snapshot {
            Snapshot::Dir(src) => copy_tree(src, dir),
            Snapshot::Entries(entries) => {
                for (relative, entry) in entries {
                    let dst = dir.join(relative);
                    if let Some(parent) = dst.parent() {
                        create_dir_all(parent)?;
                    }
                    match entry {
                        CacheEntry::File { contents, mode } => {
                            std::fs::write(&dst, contents).map_err(|e| io_error(&dst, e))?;
                            set_mode(&dst, *mode)?;
                        }
                        CacheEntry::Symlink(target) => symlink(target, &dst)?,
                    }
                }
                Ok(())
            }
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> CacheError {
    CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn create_dir_all(path: &Path) -> Result<(), CacheError> {
    std::fs::create_dir_all(path).map_err(|e| io_error(path, e))
}

fn capture_into(
    root: &Path,
    relative: &Path,
    entries: &mut BTreeMap<PathBuf, CacheEntry>,
) -> Result<(), CacheError> {
    let dir = root.join(relative);
    for entry in std::fs::read_dir(&dir).map_err(|e| io_error(&dir, e))? {
        let entry = entry.map_err(|e| io_error(&dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| io_error(&path, e))?;
        let child = relative.join(entry.file_name());

        if file_type.is_dir() {
            capture_into(root, &child, entries)?;
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(&path).map_err(|e| io_error(&path, e))?;
            entries.insert(child, CacheEntry::Symlink(target));
        } else if file_type.is_file() {
            let contents = std::fs::read(&path).map_err(|e| io_error(&path, e))?;
            let metadata = entry.metadata().map_err(|e| io_error(&path, e))?;
            entries.insert(
                child,
                CacheEntry::File {
                    contents,
                    mode: file_mode(&metadata),
                },
            );
        }
    }
    Ok(())
}

/// Copy `src` into `dst` on disk. `std::fs::copy` carries permission bits;
/// symlinks are recreated rather than followed.
fn copy_tree(src: &Path, dst: &Path) -> Result<(), CacheError> {
    create_dir_all(dst)?;
    for entry in std::fs::read_dir(src).map_err(|e| io_error(src, e))? {
        let entry = entry.map_err(|e| io_error(src, e))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| io_error(&from, e))?;

        if file_type.is_dir() {
            copy_tree(&from, &to)?;
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(&from).map_err(|e| io_error(&from, e))?;
            symlink(&target, &to)?;
        } else if file_type.is_file() {
            std::fs::copy(&from, &to).map_err(|e| io_error(&from, e))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        DEFAULT_FILE_MODE
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), CacheError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| io_error(path, e))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> Result<(), CacheError> {
    let mut permissions = std::fs::metadata(path)
        .map_err(|e| io_error(path, e))?
        .permissions();
    permissions.set_readonly(mode & 0o222 == 0);
    std::fs::set_permissions(path, permissions).map_err(|e| io_error(path, e))
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> Result<(), CacheError> {
    std::os::unix::fs::symlink(target, link).map_err(|e| io_error(link, e))
}

#[cfg(not(unix))]
fn symlink(target: &Path, link: &Path) -> Result<(), CacheError> {
    Err(CacheError::Unsupported(format!(
        "symlink {} -> {}",
        link.display(),
        target.display()
    )))
}

/// Empty `dir` after a failed restore so a build never sees a partial tree.
fn reset_dir(dir: &Path) -> Result<(), CacheError> {
    std::fs::remove_dir_all(dir).map_err(|e| io_error(dir, e))?;
    std::fs::create_dir(dir).map_err(|e| io_error(dir, e))
}

/// Storage for cache snapshots, keyed by [`CacheScope::key`].
pub trait CacheBackend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<CachedData>, CacheError>;

    /// Best-effort; a backend under pressure may drop the write.
    fn write(&self, key: &str, data: &CachedData) -> Result<(), CacheError>;
}

/// Directory-backed cache shared by invocations on the same machine or volume.
#[derive(Debug, Clone)]
pub struct FsCacheBackend {
    root: PathBuf,
}

impl FsCacheBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn key_dir(&self, key: &str) -> Result<PathBuf, CacheError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
        if valid {
            Ok(self.root.join(key))
        } else {
            Err(CacheError::InvalidKey(key.to_owned()))
        }
    }

    fn prune(&self, key_dir: &Path, live: &str) {
        let entries = match std::fs::read_dir(key_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(path = %key_dir.display(), error = %e, "skipping cache prune");
                return;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(GENERATION_PREFIX) || name == live {
                continue;
            }
            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(|modified| is_stale(modified, SystemTime::now()))
                .unwrap_or(false);
            if stale && let Err(e) = std::fs::remove_dir_all(entry.path()) {
                tracing::debug!(path = %entry.path().display(), error = %e, "failed to prune cache generation");
            }
        }
    }
}

fn is_stale(modified: SystemTime, now: SystemTime) -> bool {
    now.duration_since(modified)
        .is_ok_and(|age| age > PRUNE_GRACE)
}

impl CacheBackend for FsCacheBackend {
    fn read(&self, key: &str) -> Result<Option<CachedData>, CacheError> {
        let key_dir = self.key_dir(key)?;
        let pointer = key_dir.join(CURRENT_FILE);

        let live = match std::fs::read_to_string(&pointer) {
            Ok(live) => live.trim().to_owned(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CacheError::Io {
                    path: pointer,
                    source: e,
                });
            }
        };

        let generation = key_dir.join(&live);
        if !generation.is_dir() {
            tracing::warn!(key, generation = %live, "cache pointer references a missing generation");
            return Ok(None);
        }

        Ok(Some(CachedData::at(generation)))
    }

    fn write(&self, key: &str, data: &CachedData) -> Result<(), CacheError> {
        let key_dir = self.key_dir(key)?;
        std::fs::create_dir_all(&key_dir).map_err(|e| CacheError::Io {
            path: key_dir.clone(),
            source: e,
        })?;

        let id = uuid::Uuid::new_v4().simple().to_string();
        let live = format!("{GENERATION_PREFIX}{id}");
        data.restore(&key_dir.join(&live))?;

        let staged = key_dir.join(format!(".{CURRENT_FILE}-{id}"));
        std::fs::write(&staged, &live).map_err(|e| CacheError::Io {
            path: staged.clone(),
            source: e,
        })?;
        let pointer = key_dir.join(CURRENT_FILE);
        std::fs::rename(&staged, &pointer).map_err(|e| CacheError::Io {
            path: pointer,
            source: e,
        })?;

        tracing::debug!(key, generation = %live, "cache generation published");
        self.prune(&key_dir, &live);
        Ok(())
    }
}

/// In-process cache, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    entries: Mutex<HashMap<String, CachedData>>,
    unavailable: bool,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that fails every call, as an unreachable remote would.
    pub fn unavailable() -> Self {
        Self {
            entries: Mutex::default(),
            unavailable: true,
        }
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.unavailable {
            Err(CacheError::Unavailable("memory backend disabled".to_owned()))
        } else {
            Ok(())
        }
    }
}

impl CacheBackend for MemoryCacheBackend {
    fn read(&self, key: &str) -> Result<Option<CachedData>, CacheError> {
        self.check()?;
        let entries = self.entries.lock().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, data: &CachedData) -> Result<(), CacheError> {
        self.check()?;
        let data = data.clone().load()?;
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        entries.insert(key.to_owned(), data);
        Ok(())
    }
}

fn poisoned() -> CacheError {
    CacheError::Unavailable("cache lock poisoned".to_owned())
}

/// One invocation's working copy of a cache scope.
#[derive(Debug)]
pub struct CacheSession {
    key: String,
    policy: CachePolicy,
    dir: tempfile::TempDir,
    warm: bool,
    populated: bool,
}

impl CacheSession {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Effective policy after combining the scope and the requested mode.
    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Directory the build reads and writes cached intermediates in.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Whether a snapshot was restored at acquisition.
    pub fn is_warm(&self) -> bool {
        self.warm
    }

    /// Called by a build that completed successfully. Unpopulated sessions
    /// are never written back, so a failed build cannot publish partial state.
    pub fn mark_populated(&mut self) {
        self.populated = true;
    }

    pub fn is_populated(&self) -> bool {
        self.populated
    }
}

/// Outcome of releasing a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheRelease {
    /// The session contents were published under the scope key.
    Persisted,
    /// Nothing to publish: read-only session or unsuccessful build.
    Skipped,
    /// The backend rejected the write; the next build starts colder.
    Dropped,
}

/// Hands out cache sessions against a backend.
pub struct CacheScopeManager<B: CacheBackend> {
    backend: B,
    work_root: PathBuf,
}

impl<B: CacheBackend> CacheScopeManager<B> {
    /// `work_root` holds the per-invocation session directories.
    pub fn new(backend: B, work_root: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            work_root: work_root.into(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Open a session on `scope`. Writes are allowed only when both the
    /// scope policy and `mode` allow them.
    ///
    /// Backend failures degrade to a cold session; only a failure to create
    /// the local session directory is an error.
    pub fn acquire(&self, scope: &CacheScope, mode: CachePolicy) -> Result<CacheSession, CacheError> {
        std::fs::create_dir_all(&self.work_root).map_err(|e| CacheError::Io {
            path: self.work_root.clone(),
            source: e,
        })?;
        let dir = tempfile::Builder::new()
            .prefix("session-")
            .tempdir_in(&self.work_root)
            .map_err(|e| CacheError::Io {
                path: self.work_root.clone(),
                source: e,
            })?;

        let warm = match self.backend.read(&scope.key) {
            Ok(Some(data)) => match data.restore(dir.path()) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(key = %scope.key, error = %e, "failed to restore cache; starting cold");
                    reset_dir(dir.path())?;
                    false
                }
            },
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(key = %scope.key, error = %e, "cache backend unavailable; starting cold");
                false
            }
        };

        let policy = scope.policy.restrict(mode);
        tracing::info!(key = %scope.key, ?policy, warm, "cache session acquired");

        Ok(CacheSession {
            key: scope.key.clone(),
            policy,
            dir,
            warm,
            populated: false,
        })
    }

    /// Close a session, publishing it if it is writable and populated.
    pub fn release(&self, session: CacheSession) -> CacheRelease {
        if !session.policy.allows_write() || !session.populated {
            tracing::debug!(key = %session.key, populated = session.populated, "cache write-back skipped");
            return CacheRelease::Skipped;
        }

        let outcome = self
            .backend
            .write(&session.key, &CachedData::at(session.path()));

        match outcome {
            Ok(()) => {
                tracing::info!(key = %session.key, "cache persisted");
                CacheRelease::Persisted
            }
            Err(e) => {
                tracing::warn!(key = %session.key, error = %e, "cache write dropped");
                CacheRelease::Dropped
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O failed at {path}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid cache key {0:?}")]
    InvalidKey(String),
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("unsupported on this platform: {0}")]
    Unsupported(String),
}
