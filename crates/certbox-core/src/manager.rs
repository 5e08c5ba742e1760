//! High-level certificate lifecycle operations.
//!
//! [`CertificateManager`] is the single entry point the request layer talks
//! to. It wires the authority store, issuer, repository, revocation
//! registry, and CRL generator together and enforces the locking rules:
//! per-identity mutexes serialize issuance for the same identity, and a
//! process-wide mutex plus a cross-process file lock make revocation and
//! CRL regeneration one atomic unit.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::authority::{AuthorityStore, CertificateAuthority};
use crate::config::CaConfig;
use crate::crl;
use crate::error::{Error, Result};
use crate::issuer;
use crate::keys::{KeyFactory, RsaKeyFactory};
use crate::pfx;
use crate::repository::CertificateRepository;
use crate::revocation::RevocationRegistry;
use crate::serial::{SerialAllocator, SerialIndex};
use crate::storage::{FileLock, StorageLayout};
use crate::types::{
    Identity, IssuedCertificate, RenewedCertificate, RevocationOutcome, RevocationRecord,
    RevocationStatus, SerialNumber,
};

/// Coordinates the full certificate lifecycle over one storage tree.
pub struct CertificateManager {
    config: CaConfig,
    layout: StorageLayout,
    key_factory: Arc<dyn KeyFactory>,
    authority: AuthorityStore,
    repository: CertificateRepository,
    registry: RevocationRegistry,
    allocator: SerialAllocator,
    // Revocation + CRL regeneration form one critical section; the file
    // lock extends it across processes sharing the storage tree.
    revocation_mutex: Mutex<()>,
    identity_locks: Mutex<HashMap<Identity, Arc<Mutex<()>>>>,
}

impl CertificateManager {
    /// Creates a manager rooted at `root`, generating RSA keys.
    #[must_use]
    pub fn new(root: impl Into<std::path::PathBuf>, config: CaConfig) -> Self {
        Self::with_key_factory(root, config, Arc::new(RsaKeyFactory))
    }

    /// Creates a manager with a caller-supplied key factory.
    #[must_use]
    pub fn with_key_factory(
        root: impl Into<std::path::PathBuf>,
        config: CaConfig,
        key_factory: Arc<dyn KeyFactory>,
    ) -> Self {
        let layout = StorageLayout::new(root);
        Self {
            authority: AuthorityStore::new(layout.clone(), Arc::clone(&key_factory)),
            repository: CertificateRepository::new(layout.clone()),
            registry: RevocationRegistry::new(layout.clone()),
            allocator: SerialAllocator::new(),
            revocation_mutex: Mutex::new(()),
            identity_locks: Mutex::new(HashMap::new()),
            config,
            layout,
            key_factory,
        }
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &CaConfig {
        &self.config
    }

    /// Returns the CA certificate, bootstrapping the CA if needed.
    pub fn ca_certificate(&self) -> Result<crate::types::Certificate> {
        Ok(self.authority.ensure_initialized(&self.config)?.certificate().clone())
    }

    /// Issues a certificate for `identity` and stores the certificate, the
    /// private key, and a PKCS#12 bundle protected by `password`.
    ///
    /// Re-issuing for an existing identity overwrites the stored artifacts
    /// with a freshly keyed certificate under a new serial; the previous
    /// serial is left alone and stays valid unless separately revoked.
    pub fn create_certificate(
        &self,
        identity: &Identity,
        password: Option<&str>,
    ) -> Result<IssuedCertificate> {
        let lock = self.identity_lock(identity);
        let _guard = lock.lock();

        let authority = self.authority.ensure_initialized(&self.config)?;
        if self.repository.exists(identity) {
            warn!(%identity, "re-issuing over an existing certificate");
        }
        self.issue_and_store(&authority, identity, password)
    }

    /// Replaces the certificate for an existing identity.
    ///
    /// With `revoke_old` set, the superseded serial is revoked and the CRL
    /// regenerated before the result is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no certificate exists for `identity`.
    pub fn renew_certificate(
        &self,
        identity: &Identity,
        revoke_old: bool,
        password: Option<&str>,
    ) -> Result<RenewedCertificate> {
        let lock = self.identity_lock(identity);
        let _guard = lock.lock();

        let authority = self.authority.ensure_initialized(&self.config)?;
        let old_serial = self.repository.serial_for(identity)?;
        let issued = self.issue_and_store(&authority, identity, password)?;

        let old_serial_revoked = if revoke_old {
            let (record, _) = self.revoke_locked(&authority, &old_serial)?;
            Some(record.serial)
        } else {
            None
        };

        info!(%identity, revoked_old = revoke_old, "certificate renewed");
        Ok(RenewedCertificate {
            issued,
            old_serial_revoked,
        })
    }

    /// Revokes the certificate currently stored for `identity` and
    /// regenerates the CRL.
    ///
    /// Revoking an already-revoked certificate succeeds with
    /// [`RevocationStatus::AlreadyRevoked`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no certificate exists for `identity`.
    pub fn revoke_certificate(&self, identity: &Identity) -> Result<RevocationOutcome> {
        let authority = self.authority.ensure_initialized(&self.config)?;
        let serial = self.repository.serial_for(identity)?;
        let (record, status) = self.revoke_locked(&authority, &serial)?;
        Ok(RevocationOutcome {
            identity: identity.clone(),
            serial_number: record.serial,
            revoked_at: record.revoked_at,
            status,
        })
    }

    /// Revokes a certificate by serial number and regenerates the CRL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownSerial`] if the serial belongs to no stored
    /// or previously revoked certificate.
    pub fn revoke_serial(
        &self,
        serial: &SerialNumber,
    ) -> Result<(RevocationRecord, RevocationStatus)> {
        let authority = self.authority.ensure_initialized(&self.config)?;
        if !self.repository.contains(serial)? && !self.registry.is_revoked(serial)? {
            return Err(Error::UnknownSerial(serial.to_string()));
        }
        self.revoke_locked(&authority, serial)
    }

    /// Returns the current CRL as PEM, bootstrapping the CA and generating
    /// an initial CRL if none exists yet.
    pub fn crl(&self) -> Result<Vec<u8>> {
        let authority = self.authority.ensure_initialized(&self.config)?;
        if self.layout.crl().exists() {
            return crate::storage::read(&self.layout.crl());
        }
        let _guard = self.revocation_mutex.lock();
        let _file_lock = FileLock::acquire(&self.layout.revocation_lock())?;
        let records = self.registry.list_records()?;
        crl::regenerate(&authority, &records, &self.config, &self.layout)
    }

    /// Returns the stored PKCS#12 bundle for `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no bundle is stored.
    pub fn pfx(&self, identity: &Identity) -> Result<Vec<u8>> {
        self.repository.load_pfx(identity)
    }

    /// Returns the stored certificate for `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no certificate is stored.
    pub fn certificate(&self, identity: &Identity) -> Result<crate::types::Certificate> {
        Ok(self.repository.load(identity)?.0)
    }

    /// Returns whether `serial` is in the revocation registry.
    pub fn is_revoked(&self, serial: &SerialNumber) -> Result<bool> {
        self.registry.is_revoked(serial)
    }

    fn issue_and_store(
        &self,
        authority: &CertificateAuthority,
        identity: &Identity,
        password: Option<&str>,
    ) -> Result<IssuedCertificate> {
        let index = LiveOrRevoked {
            repository: &self.repository,
            registry: &self.registry,
        };
        let (certificate, private_key) = issuer::issue(
            authority,
            identity,
            &self.config,
            self.key_factory.as_ref(),
            &self.allocator,
            &index,
        )?;
        // Bundle before the first write: a bundling failure must not leave
        // any artifact behind.
        let bundle = pfx::export(&certificate, &private_key, authority.certificate(), password)?;

        let existed = self.repository.exists(identity);
        let persisted = self
            .repository
            .save(identity, &certificate, &private_key)
            .and_then(|()| self.repository.save_pfx(identity, &bundle));
        if let Err(e) = persisted {
            // A fresh identity's half-written artifact set is removed so a
            // failed issuance persists nothing. Overwritten artifacts of an
            // existing identity cannot be restored; the caller retries.
            if !existed {
                self.repository.discard(identity);
            }
            return Err(e);
        }

        Ok(IssuedCertificate {
            identity: identity.clone(),
            serial_number: certificate.serial().clone(),
            valid_from: certificate.not_before(),
            valid_until: certificate.not_after(),
            certificate_path: self.layout.client_cert(identity),
            private_key_path: self.layout.client_key(identity),
            pfx_path: self.layout.client_pfx(identity),
        })
    }

    /// Records a revocation and regenerates the CRL under the revocation
    /// locks. If CRL regeneration fails the log entry stays in place; the
    /// next successful regeneration picks it up.
    fn revoke_locked(
        &self,
        authority: &CertificateAuthority,
        serial: &SerialNumber,
    ) -> Result<(RevocationRecord, RevocationStatus)> {
        let _guard = self.revocation_mutex.lock();
        let _file_lock = FileLock::acquire(&self.layout.revocation_lock())?;

        let (record, status) = self.registry.revoke(serial, Utc::now())?;
        let records = self.registry.list_records()?;
        crl::regenerate(authority, &records, &self.config, &self.layout)?;
        Ok((record, status))
    }

    fn identity_lock(&self, identity: &Identity) -> Arc<Mutex<()>> {
        let mut locks = self.identity_locks.lock();
        // Entries nobody holds anymore (strong count 1 = the map's own Arc)
        // are evicted so the map does not grow with every identity seen.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(identity.clone()).or_default())
    }
}

impl std::fmt::Debug for CertificateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateManager")
            .field("root", &self.layout.root())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Serial uniqueness index spanning both live certificates and the
/// revocation log, so a serial is never reused even after the certificate
/// carrying it was revoked.
struct LiveOrRevoked<'a> {
    repository: &'a CertificateRepository,
    registry: &'a RevocationRegistry,
}

impl SerialIndex for LiveOrRevoked<'_> {
    fn contains(&self, serial: &SerialNumber) -> Result<bool> {
        Ok(self.repository.contains(serial)? || self.registry.is_revoked(serial)?)
    }
}
