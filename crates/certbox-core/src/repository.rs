//! Per-identity artifact persistence.
//!
//! Pure storage over the layout in [`crate::storage`]: certificates under
//! `crts/`, private keys under `private/`, PKCS#12 bundles under
//! `clients/`, all keyed by identity. No crypto happens here.

use tracing::debug;

use crate::error::{Error, Result};
use crate::pfx::PfxBundle;
use crate::serial::SerialIndex;
use crate::storage::{self, StorageLayout};
use crate::types::{Certificate, Identity, PrivateKey, SerialNumber};

/// Persists and retrieves issued certificates, keys, and PFX bundles.
#[derive(Debug)]
pub struct CertificateRepository {
    layout: StorageLayout,
}

impl CertificateRepository {
    /// Creates a repository over the given storage tree.
    #[must_use]
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    /// Persists a certificate and its private key. The key file is written
    /// with restrictive permissions; both writes are atomic.
    pub fn save(
        &self,
        identity: &Identity,
        certificate: &Certificate,
        private_key: &PrivateKey,
    ) -> Result<()> {
        storage::write_atomic(
            &self.layout.client_cert(identity),
            certificate.pem().as_bytes(),
            false,
        )?;
        storage::write_atomic(
            &self.layout.client_key(identity),
            private_key.pem().as_bytes(),
            true,
        )?;
        debug!(%identity, serial = %certificate.serial(), "certificate stored");
        Ok(())
    }

    /// Loads the certificate and private key for an identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if nothing is stored for the identity.
    pub fn load(&self, identity: &Identity) -> Result<(Certificate, PrivateKey)> {
        let cert_pem = self.read_artifact(&self.layout.client_cert(identity), identity)?;
        let certificate = Certificate::from_pem(&cert_pem)?;
        let key_pem = self.read_artifact(&self.layout.client_key(identity), identity)?;
        let private_key = PrivateKey::from_pem(&key_pem)?;
        Ok((certificate, private_key))
    }

    /// Persists a PKCS#12 bundle for an identity.
    pub fn save_pfx(&self, identity: &Identity, bundle: &PfxBundle) -> Result<()> {
        storage::write_atomic(&self.layout.client_pfx(identity), bundle.as_bytes(), false)
    }

    /// Loads the PKCS#12 bundle for an identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no bundle is stored for the identity.
    pub fn load_pfx(&self, identity: &Identity) -> Result<Vec<u8>> {
        self.read_artifact(&self.layout.client_pfx(identity), identity)
    }

    /// Returns whether a certificate is stored for the identity.
    #[must_use]
    pub fn exists(&self, identity: &Identity) -> bool {
        self.layout.client_cert(identity).exists()
    }

    /// Returns the serial of the stored certificate for an identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if nothing is stored for the identity.
    pub fn serial_for(&self, identity: &Identity) -> Result<SerialNumber> {
        let pem = self.read_artifact(&self.layout.client_cert(identity), identity)?;
        Ok(Certificate::from_pem(&pem)?.serial().clone())
    }

    /// Best-effort removal of everything stored for an identity. Used to
    /// roll back a partially persisted issuance.
    pub(crate) fn discard(&self, identity: &Identity) {
        for path in [
            self.layout.client_cert(identity),
            self.layout.client_key(identity),
            self.layout.client_pfx(identity),
        ] {
            let _ = std::fs::remove_file(path);
        }
    }

    fn read_artifact(&self, path: &std::path::Path, identity: &Identity) -> Result<Vec<u8>> {
        storage::read(path).map_err(|e| match e {
            Error::NotFound(_) => {
                Error::NotFound(format!("no certificate for identity '{identity}'"))
            }
            other => other,
        })
    }
}

/// The repository doubles as the issued-serial index over live
/// certificates: superseded serials are covered by the revocation log.
impl SerialIndex for CertificateRepository {
    fn contains(&self, serial: &SerialNumber) -> Result<bool> {
        let dir = self.layout.crts_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(storage::storage_error("scan", &dir, &e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| storage::storage_error("scan", &dir, &e))?;
            let path = entry.path();
            if path.extension().and_then(std::ffi::OsStr::to_str) != Some("crt") {
                continue;
            }
            let pem = storage::read(&path)?;
            let certificate = Certificate::from_pem(&pem)?;
            if certificate.serial() == serial {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
