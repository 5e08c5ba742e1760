//! On-disk layout and filesystem primitives.
//!
//! All components coordinate through the filesystem tree rooted here, not
//! through in-process shared memory, so the same discipline holds when
//! several process instances share one storage tree: artifacts are written
//! atomically (temp file + rename) and cross-process critical sections take
//! advisory file locks.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::Identity;

/// The storage tree, relative to a configured root:
///
/// ```text
/// ca/ca.crt                 CA certificate, PEM
/// ca/ca.key                 CA private key, PEM, unencrypted
/// ca/crl.pem                Current CRL, PEM
/// ca/revoked_serials.txt    One serial number per line, append-only
/// crts/<identity>.crt       Issued client certificate, PEM
/// private/<identity>.key    Issued client private key, PEM
/// clients/<identity>.pfx    PKCS#12 bundle
/// ```
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    /// Creates a layout rooted at the given directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the storage root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the directory tree if it does not exist.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in ["ca", "crts", "private", "clients"] {
            let path = self.root.join(dir);
            fs::create_dir_all(&path).map_err(|e| storage_error("create directory", &path, &e))?;
        }
        Ok(())
    }

    /// Path of the CA certificate.
    #[must_use]
    pub fn ca_cert(&self) -> PathBuf {
        self.root.join("ca").join("ca.crt")
    }

    /// Path of the CA private key.
    #[must_use]
    pub fn ca_key(&self) -> PathBuf {
        self.root.join("ca").join("ca.key")
    }

    /// Path of the published CRL.
    #[must_use]
    pub fn crl(&self) -> PathBuf {
        self.root.join("ca").join("crl.pem")
    }

    /// Path of the append-only revoked-serial log.
    #[must_use]
    pub fn revoked_serials(&self) -> PathBuf {
        self.root.join("ca").join("revoked_serials.txt")
    }

    /// Path of a client certificate.
    #[must_use]
    pub fn client_cert(&self, identity: &Identity) -> PathBuf {
        self.root.join("crts").join(format!("{identity}.crt"))
    }

    /// Path of a client private key.
    #[must_use]
    pub fn client_key(&self, identity: &Identity) -> PathBuf {
        self.root.join("private").join(format!("{identity}.key"))
    }

    /// Path of a client PKCS#12 bundle.
    #[must_use]
    pub fn client_pfx(&self, identity: &Identity) -> PathBuf {
        self.root.join("clients").join(format!("{identity}.pfx"))
    }

    /// Directory holding issued client certificates.
    #[must_use]
    pub fn crts_dir(&self) -> PathBuf {
        self.root.join("crts")
    }

    /// Lock sentinel guarding CA bootstrap.
    pub(crate) fn ca_lock(&self) -> PathBuf {
        self.root.join("ca").join(".ca.lock")
    }

    /// Lock sentinel guarding revocation + CRL regeneration.
    pub(crate) fn revocation_lock(&self) -> PathBuf {
        self.root.join("ca").join(".revocation.lock")
    }
}

/// Cross-process advisory lock, released on drop.
#[derive(Debug)]
pub(crate) struct FileLock {
    file: File,
}

impl FileLock {
    /// Blocks until the exclusive lock on the sentinel file is held.
    pub(crate) fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| storage_error("open lock file", path, &e))?;
        file.lock_exclusive()
            .map_err(|e| storage_error("acquire lock", path, &e))?;
        debug!(path = %path.display(), "acquired file lock");
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Releasing an flock we hold cannot meaningfully fail; the OS also
        // releases it when the descriptor closes.
        let _ = FileExt::unlock(&self.file);
    }
}

/// Writes a file atomically: temp sibling first, then rename over the
/// target. Readers never observe a partial artifact.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8], restrict: bool) -> Result<()> {
    let tmp = temp_sibling(path);
    let result = write_atomic_inner(path, &tmp, bytes, restrict);
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_atomic_inner(path: &Path, tmp: &Path, bytes: &[u8], restrict: bool) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    if restrict {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    #[cfg(not(unix))]
    let _ = restrict;

    let mut file = options
        .open(tmp)
        .map_err(|e| storage_error("create temp file", tmp, &e))?;
    file.write_all(bytes)
        .map_err(|e| storage_error("write", tmp, &e))?;
    file.sync_all()
        .map_err(|e| storage_error("sync", tmp, &e))?;
    drop(file);

    fs::rename(tmp, path).map_err(|e| storage_error("rename into place", path, &e))
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map_or_else(
        || std::ffi::OsString::from("artifact"),
        std::ffi::OsStr::to_os_string,
    );
    name.push(".tmp");
    path.with_file_name(name)
}

/// Appends a line to a log file and flushes it to disk.
pub(crate) fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| storage_error("open for append", path, &e))?;
    writeln!(file, "{line}").map_err(|e| storage_error("append", path, &e))?;
    file.sync_all().map_err(|e| storage_error("sync", path, &e))
}

/// Reads a whole file, with path context on failure.
pub(crate) fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(path.display().to_string())
        } else {
            storage_error("read", path, &e)
        }
    })
}

pub(crate) fn storage_error(what: &str, path: &Path, err: &std::io::Error) -> Error {
    Error::Storage(format!("{what} '{}': {err}", path.display()))
}
