//! Tunnel state store
//!
//! Start records what Stop needs to undo it (today: the remote's public
//! address, used for the local host route). Values are small strings keyed
//! by `<identity>.<fact>`.

use std::collections::HashMap;
use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sshpn_common::{TunnelError, TunnelResult};
use tracing::debug;

/// Default directory for persisted tunnel state.
pub const DEFAULT_STATE_DIR: &str = "/run/sshpn";

/// State key for the remote's observed public address.
pub const PUBLIC_IP_FACT: &str = "public_ip";

/// Keyed store for facts that must survive between start and stop.
pub trait StateStore: Send + Sync {
    fn put(&self, key: &str, value: &str) -> TunnelResult<()>;

    /// Returns `Ok(None)` when nothing is stored under `key`.
    fn get(&self, key: &str) -> TunnelResult<Option<String>>;

    /// Removing a missing key is not an error.
    fn delete(&self, key: &str) -> TunnelResult<()>;
}

/// One file per key under a state directory, written with mode 0600.
///
/// The directory must be a real directory owned by the effective user and
/// not writable by group or others. Value files are never opened through a
/// symlink.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    fn state_err(key: &str) -> impl FnOnce(io::Error) -> TunnelError + '_ {
        move |source| TunnelError::State {
            key: key.to_string(),
            source,
        }
    }

    /// Refuse a state directory another user could tamper with.
    fn check_dir(&self) -> io::Result<()> {
        let meta = fs::symlink_metadata(&self.dir)?;
        if !meta.file_type().is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not a directory", self.dir.display()),
            ));
        }
        let euid = unsafe { libc::geteuid() };
        if meta.uid() != euid {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is owned by uid {}", self.dir.display(), meta.uid()),
            ));
        }
        if meta.mode() & 0o022 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is writable by other users", self.dir.display()),
            ));
        }
        Ok(())
    }

    fn prepare_dir(&self) -> io::Result<()> {
        DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&self.dir)?;
        self.check_dir()
    }

    fn read_value(&self, path: &Path) -> io::Result<String> {
        let mut file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NOFOLLOW)
            .open(path)?;
        if !file.metadata()?.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not a regular file", path.display()),
            ));
        }
        let mut content = String::new();
        file.read_to_string(&mut content)?;
        Ok(content)
    }
}

impl Default for FileStateStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_DIR)
    }
}

impl StateStore for FileStateStore {
    fn put(&self, key: &str, value: &str) -> TunnelResult<()> {
        self.prepare_dir().map_err(Self::state_err(key))?;

        let path = self.path_for(key);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .custom_flags(libc::O_NOFOLLOW)
            .open(&path)
            .map_err(Self::state_err(key))?;
        file.write_all(value.as_bytes())
            .map_err(Self::state_err(key))?;

        debug!(key = key, path = %path.display(), "Persisted tunnel state");
        Ok(())
    }

    fn get(&self, key: &str) -> TunnelResult<Option<String>> {
        match self.check_dir() {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::state_err(key)(e)),
        }
        match self.read_value(&self.path_for(key)) {
            Ok(content) => Ok(Some(content.trim().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::state_err(key)(e)),
        }
    }

    fn delete(&self, key: &str) -> TunnelResult<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => {
                debug!(key = key, "Removed tunnel state");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::state_err(key)(e)),
        }
    }
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with one entry.
    pub fn with_entry(key: &str, value: &str) -> Self {
        let store = Self::new();
        if let Ok(mut entries) = store.entries.lock() {
            entries.insert(key.to_string(), value.to_string());
        }
        store
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> TunnelError {
        TunnelError::internal("state store lock poisoned")
    }
}

impl StateStore for MemoryStateStore {
    fn put(&self, key: &str, value: &str) -> TunnelResult<()> {
        self.entries
            .lock()
            .map_err(|_| Self::poisoned())?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> TunnelResult<Option<String>> {
        Ok(self
            .entries
            .lock()
            .map_err(|_| Self::poisoned())?
            .get(key)
            .cloned())
    }

    fn delete(&self, key: &str) -> TunnelResult<()> {
        self.entries
            .lock()
            .map_err(|_| Self::poisoned())?
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state"));

        assert_eq!(store.get("tun0.public_ip").unwrap(), None);

        store.put("tun0.public_ip", "203.0.113.7").unwrap();
        assert_eq!(
            store.get("tun0.public_ip").unwrap().as_deref(),
            Some("203.0.113.7")
        );

        store.delete("tun0.public_ip").unwrap();
        assert_eq!(store.get("tun0.public_ip").unwrap(), None);
    }

    #[test]
    fn test_file_store_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        store.put("tun1.public_ip", "198.51.100.4").unwrap();

        let mode = fs::metadata(store.path_for("tun1.public_ip"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_file_store_trims_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        fs::write(store.path_for("tun0.public_ip"), "203.0.113.7\n").unwrap();
        assert_eq!(
            store.get("tun0.public_ip").unwrap().as_deref(),
            Some("203.0.113.7")
        );
    }

    #[test]
    fn test_file_store_delete_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        assert!(store.delete("nothing").is_ok());
    }

    #[test]
    fn test_file_store_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        // A directory where the value file should be cannot be read as text.
        fs::create_dir(store.path_for("tun0.public_ip")).unwrap();
        assert!(matches!(
            store.get("tun0.public_ip"),
            Err(TunnelError::State { .. })
        ));
    }

    #[test]
    fn test_file_store_put_refuses_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state"));
        let victim = dir.path().join("victim");
        fs::write(&victim, "untouched").unwrap();

        fs::create_dir(store.dir()).unwrap();
        fs::set_permissions(store.dir(), fs::Permissions::from_mode(0o700)).unwrap();
        std::os::unix::fs::symlink(&victim, store.path_for("tun0.public_ip")).unwrap();

        assert!(matches!(
            store.put("tun0.public_ip", "203.0.113.7"),
            Err(TunnelError::State { .. })
        ));
        assert_eq!(fs::read_to_string(&victim).unwrap(), "untouched");
    }

    #[test]
    fn test_file_store_get_refuses_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state"));
        let planted = dir.path().join("planted");
        fs::write(&planted, "192.0.2.66").unwrap();

        fs::create_dir(store.dir()).unwrap();
        fs::set_permissions(store.dir(), fs::Permissions::from_mode(0o700)).unwrap();
        std::os::unix::fs::symlink(&planted, store.path_for("tun0.public_ip")).unwrap();

        assert!(matches!(
            store.get("tun0.public_ip"),
            Err(TunnelError::State { .. })
        ));
    }

    #[test]
    fn test_file_store_refuses_symlinked_dir() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        fs::create_dir(&real).unwrap();
        fs::set_permissions(&real, fs::Permissions::from_mode(0o700)).unwrap();
        let link = dir.path().join("state");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let store = FileStateStore::new(&link);
        assert!(matches!(
            store.put("tun0.public_ip", "203.0.113.7"),
            Err(TunnelError::State { .. })
        ));
        assert!(!real.join("tun0.public_ip").exists());
    }

    #[test]
    fn test_file_store_refuses_shared_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state"));
        fs::create_dir(store.dir()).unwrap();
        fs::set_permissions(store.dir(), fs::Permissions::from_mode(0o1777)).unwrap();

        assert!(matches!(
            store.put("tun0.public_ip", "203.0.113.7"),
            Err(TunnelError::State { .. })
        ));
        assert!(matches!(
            store.get("tun0.public_ip"),
            Err(TunnelError::State { .. })
        ));
    }

    #[test]
    fn test_file_store_creates_private_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("run").join("sshpn"));
        store.put("tun0.public_ip", "203.0.113.7").unwrap();

        let mode = fs::metadata(store.dir()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStateStore::with_entry("tun0.public_ip", "203.0.113.7");
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get("tun0.public_ip").unwrap().as_deref(),
            Some("203.0.113.7")
        );
        store.delete("tun0.public_ip").unwrap();
        assert!(store.is_empty());
    }
}
