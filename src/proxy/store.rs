//! Local store capability
//!
//! `Store` abstracts placing an artifact at its canonical path under the web
//! root. `DiskStore` does it with real directories, a temp file renamed into
//! place, public permissions and a best-effort ownership change.

use std::ffi::OsString;
use std::fs;
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hyper::body::Bytes;

use super::error::{StoreError, Warning};
use super::path::RequestPath;

/// Prefix of in-flight temp files, never a valid artifact name
pub const TEMP_PREFIX: &str = ".pullcache-";

/// Storage settings, frozen at startup
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub dir_mode: u32,
    pub file_mode: u32,
    pub owner: Option<String>,
    pub group: Option<String>,
}

/// Where an artifact will go, resolved against the canonical web root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Canonical web root
    pub root: PathBuf,
    /// Parent directory as requested (may not exist yet)
    pub parent: PathBuf,
    pub file_name: OsString,
}

/// A file written at its final path
#[derive(Debug)]
pub struct Persisted {
    pub path: PathBuf,
    pub warnings: Vec<Warning>,
}

pub trait Store: Send + Sync {
    /// Resolve the target's parent against the root without touching anything.
    ///
    /// Fails with `RootUnavailable` or `Escapes` when the write would leave the root.
    fn locate(
        &self,
        root: &Path,
        path: &RequestPath,
    ) -> impl Future<Output = Result<Placement, StoreError>> + Send;

    /// Create the parent directory if missing and return its canonical form
    fn create_parent(
        &self,
        placement: &Placement,
    ) -> impl Future<Output = Result<PathBuf, StoreError>> + Send;

    /// Write `data` as `dir/file_name`; readers never observe a partial file
    fn persist(
        &self,
        dir: &Path,
        file_name: &OsString,
        data: Bytes,
    ) -> impl Future<Output = Result<Persisted, StoreError>> + Send;

    fn read(&self, path: &Path) -> impl Future<Output = Result<Bytes, StoreError>> + Send;
}

/// Filesystem-backed store
#[derive(Debug, Clone)]
pub struct DiskStore {
    settings: Arc<StoreSettings>,
}

impl DiskStore {
    pub fn new(settings: StoreSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }
}

impl Store for DiskStore {
    async fn locate(&self, root: &Path, path: &RequestPath) -> Result<Placement, StoreError> {
        let root = root.to_path_buf();
        let relative = path.relative().to_path_buf();
        let file_name = OsString::from(path.file_name());
        blocking(move || locate(&root, &relative, file_name)).await
    }

    async fn create_parent(&self, placement: &Placement) -> Result<PathBuf, StoreError> {
        let placement = placement.clone();
        let dir_mode = self.settings.dir_mode;
        blocking(move || create_parent(&placement, dir_mode)).await
    }

    async fn persist(
        &self,
        dir: &Path,
        file_name: &OsString,
        data: Bytes,
    ) -> Result<Persisted, StoreError> {
        let target = dir.join(file_name);
        let settings = Arc::clone(&self.settings);
        blocking(move || persist(&target, &data, &settings)).await
    }

    async fn read(&self, path: &Path) -> Result<Bytes, StoreError> {
        tokio::fs::read(path)
            .await
            .map(Bytes::from)
            .map_err(|source| StoreError::Read {
                path: path.to_path_buf(),
                source,
            })
    }
}

/// Run blocking filesystem work off the async workers
async fn blocking<T, F>(work: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StoreError::Worker(e.to_string()))?
}

fn locate(root: &Path, relative: &Path, file_name: OsString) -> Result<Placement, StoreError> {
    let real_root = root.canonicalize().map_err(StoreError::RootUnavailable)?;

    let target = root.join(relative);
    let parent = target
        .parent()
        .map_or_else(|| root.to_path_buf(), Path::to_path_buf);

    // A missing parent is checked through its nearest existing ancestor.
    // `symlink_metadata` stops at a dangling link so it gets canonicalized too.
    let mut existing = parent.as_path();
    while fs::symlink_metadata(existing).is_err() {
        existing = match existing.parent() {
            Some(up) => up,
            None => return Err(StoreError::Escapes(parent.clone())),
        };
    }

    let real = existing
        .canonicalize()
        .map_err(|_| StoreError::Escapes(parent.clone()))?;
    if !real.starts_with(&real_root) {
        return Err(StoreError::Escapes(real));
    }

    Ok(Placement {
        root: real_root,
        parent,
        file_name,
    })
}

fn create_parent(placement: &Placement, dir_mode: u32) -> Result<PathBuf, StoreError> {
    let create_err = |source| StoreError::CreateDir {
        path: placement.parent.clone(),
        source,
    };

    dir_builder(dir_mode)
        .create(&placement.parent)
        .map_err(create_err)?;

    // Re-check: a symlink may have appeared since `locate`
    let real_parent = placement.parent.canonicalize().map_err(create_err)?;
    if !real_parent.starts_with(&placement.root) {
        return Err(StoreError::Escapes(real_parent));
    }
    Ok(real_parent)
}

fn persist(target: &Path, data: &[u8], settings: &StoreSettings) -> Result<Persisted, StoreError> {
    let write_err = |source| StoreError::Write {
        path: target.to_path_buf(),
        source,
    };
    let dir = target
        .parent()
        .ok_or_else(|| write_err(io::Error::from(io::ErrorKind::InvalidInput)))?;

    // Dropped (and removed) on any error below
    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(dir)
        .map_err(write_err)?;
    tmp.write_all(data).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;

    set_mode(tmp.path(), settings.file_mode).map_err(write_err)?;
    let warnings = assign_ownership(
        tmp.path(),
        target,
        settings.owner.as_deref(),
        settings.group.as_deref(),
    );

    tmp.persist(target).map_err(|e| write_err(e.error))?;

    Ok(Persisted {
        path: target.to_path_buf(),
        warnings,
    })
}

#[cfg(unix)]
fn dir_builder(mode: u32) -> fs::DirBuilder {
    use std::os::unix::fs::DirBuilderExt;

    let mut builder = fs::DirBuilder::new();
    builder.recursive(true).mode(mode);
    builder
}

#[cfg(not(unix))]
fn dir_builder(_mode: u32) -> fs::DirBuilder {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    builder
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Best-effort chown; every failure becomes a warning
#[cfg(unix)]
fn assign_ownership(
    path: &Path,
    reported: &Path,
    owner: Option<&str>,
    group: Option<&str>,
) -> Vec<Warning> {
    use nix::unistd::{chown, Group, User};

    let mut warnings = Vec::new();

    let uid = owner.and_then(|name| match User::from_name(name) {
        Ok(Some(user)) => Some(user.uid),
        Ok(None) => {
            warnings.push(Warning::UnknownOwner(name.to_string()));
            None
        }
        Err(e) => {
            warnings.push(Warning::UnknownOwner(format!("{name} ({e})")));
            None
        }
    });
    let gid = group.and_then(|name| match Group::from_name(name) {
        Ok(Some(group)) => Some(group.gid),
        Ok(None) => {
            warnings.push(Warning::UnknownGroup(name.to_string()));
            None
        }
        Err(e) => {
            warnings.push(Warning::UnknownGroup(format!("{name} ({e})")));
            None
        }
    });

    if uid.is_none() && gid.is_none() {
        return warnings;
    }
    if let Err(e) = chown(path, uid, gid) {
        warnings.push(Warning::Chown {
            path: reported.to_path_buf(),
            reason: e.to_string(),
        });
    }
    warnings
}

#[cfg(not(unix))]
fn assign_ownership(
    _path: &Path,
    _reported: &Path,
    _owner: Option<&str>,
    _group: Option<&str>,
) -> Vec<Warning> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> DiskStore {
        DiskStore::new(StoreSettings {
            dir_mode: 0o755,
            file_mode: 0o644,
            owner: None,
            group: None,
        })
    }

    fn leftover_temp_files(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(TEMP_PREFIX))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_locate_missing_parent() {
        let root = tempfile::tempdir().unwrap();
        let path = RequestPath::parse("/a/b/c/site.css").unwrap();

        let placement = store().locate(root.path(), &path).await.unwrap();
        assert_eq!(placement.root, root.path().canonicalize().unwrap());
        assert_eq!(placement.parent, root.path().join("a/b/c"));
        assert_eq!(placement.file_name, OsString::from("site.css"));
        // Nothing created yet
        assert!(!root.path().join("a").exists());
    }

    #[tokio::test]
    async fn test_locate_missing_root() {
        let root = tempfile::tempdir().unwrap();
        let gone = root.path().join("not-there");
        let path = RequestPath::parse("/x.js").unwrap();

        let err = store().locate(&gone, &path).await.unwrap_err();
        assert!(matches!(err, StoreError::RootUnavailable(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_locate_symlinked_parent_escapes() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("uploads")).unwrap();

        let path = RequestPath::parse("/uploads/deep/evil.js").unwrap();
        let err = store().locate(root.path(), &path).await.unwrap_err();
        assert!(matches!(err, StoreError::Escapes(_)));
        assert!(!outside.path().join("deep").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_locate_dangling_symlink_escapes() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path().join("not-yet"), root.path().join("uploads"))
            .unwrap();

        let path = RequestPath::parse("/uploads/evil.js").unwrap();
        let err = store().locate(root.path(), &path).await.unwrap_err();
        assert!(matches!(err, StoreError::Escapes(_)));
    }

    #[tokio::test]
    async fn test_create_parent_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let store = store();
        let path = RequestPath::parse("/img/icons/home.svg").unwrap();
        let placement = store.locate(root.path(), &path).await.unwrap();

        let first = store.create_parent(&placement).await.unwrap();
        let second = store.create_parent(&placement).await.unwrap();
        assert_eq!(first, second);
        assert!(first.is_dir());
        assert!(first.starts_with(&placement.root));
    }

    #[tokio::test]
    async fn test_create_parent_through_file_fails() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("img"), b"not a directory").unwrap();
        let store = store();
        let path = RequestPath::parse("/img/home.svg").unwrap();
        let placement = store.locate(root.path(), &path).await.unwrap();

        let err = store.create_parent(&placement).await.unwrap_err();
        assert!(matches!(err, StoreError::CreateDir { .. }));
    }

    #[tokio::test]
    async fn test_persist_and_read() {
        let root = tempfile::tempdir().unwrap();
        let store = store();
        let name = OsString::from("app.js");

        let persisted = store
            .persist(root.path(), &name, Bytes::from_static(b"console.log(1);"))
            .await
            .unwrap();
        assert_eq!(persisted.path, root.path().join("app.js"));
        assert!(persisted.warnings.is_empty());
        assert_eq!(fs::read(&persisted.path).unwrap(), b"console.log(1);");
        assert_eq!(&store.read(&persisted.path).await.unwrap()[..], b"console.log(1);");
        assert!(leftover_temp_files(root.path()).is_empty());
    }

    #[tokio::test]
    async fn test_persist_replaces_whole_file() {
        let root = tempfile::tempdir().unwrap();
        let store = store();
        let name = OsString::from("data.bin");

        store
            .persist(root.path(), &name, Bytes::from(vec![1u8; 8192]))
            .await
            .unwrap();
        store
            .persist(root.path(), &name, Bytes::from_static(b"short"))
            .await
            .unwrap();
        assert_eq!(fs::read(root.path().join("data.bin")).unwrap(), b"short");
    }

    #[tokio::test]
    async fn test_persist_over_directory_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("taken")).unwrap();
        let err = store()
            .persist(root.path(), &OsString::from("taken"), Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Write { .. }));
        assert!(leftover_temp_files(root.path()).is_empty());
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let root = tempfile::tempdir().unwrap();
        let err = store().read(&root.path().join("gone.css")).await.unwrap_err();
        assert!(matches!(err, StoreError::Read { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_mode_applied() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let persisted = store()
            .persist(root.path(), &OsString::from("font.woff2"), Bytes::from_static(b"wOF2"))
            .await
            .unwrap();
        let mode = fs::metadata(&persisted.path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unknown_owner_is_a_warning() {
        let root = tempfile::tempdir().unwrap();
        let store = DiskStore::new(StoreSettings {
            dir_mode: 0o755,
            file_mode: 0o644,
            owner: Some("pullcache-no-such-user".to_string()),
            group: Some("pullcache-no-such-group".to_string()),
        });

        let persisted = store
            .persist(root.path(), &OsString::from("a.txt"), Bytes::from_static(b"a"))
            .await
            .unwrap();
        assert_eq!(
            persisted.warnings,
            vec![
                Warning::UnknownOwner("pullcache-no-such-user".to_string()),
                Warning::UnknownGroup("pullcache-no-such-group".to_string()),
            ]
        );
        assert_eq!(fs::read(&persisted.path).unwrap(), b"a");
    }
}
