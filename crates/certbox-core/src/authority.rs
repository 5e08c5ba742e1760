//! CA bootstrap and loading.
//!
//! The authority store exclusively owns the CA keypair and self-signed
//! certificate. First use bootstraps them on disk; later calls load the
//! persisted material. Existing-but-unreadable material is a hard error,
//! never a trigger to regenerate: a replacement CA would orphan the trust
//! chain of everything issued before it.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rcgen::{
    BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose,
    SerialNumber as RcgenSerial,
};
use tracing::{debug, info};
use x509_parser::prelude::FromDer;
use x509_parser::certificate::X509Certificate;

use crate::config::CaConfig;
use crate::error::{Error, Result};
use crate::keys::{KeyFactory, KeyMaterial};
use crate::serial::random_serial;
use crate::storage::{self, FileLock, StorageLayout};
use crate::types::{to_rcgen_time, Certificate, PrivateKey, PEM_CERTIFICATE};
use crate::crl;
use crate::revocation::RevocationRegistry;

/// The CA's certificate and signing material, loaded for one operation.
pub struct CertificateAuthority {
    certificate: Certificate,
    private_key: PrivateKey,
    key_pair: KeyPair,
    issuer_cert: rcgen::Certificate,
}

impl CertificateAuthority {
    /// Returns the CA certificate.
    #[must_use]
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Returns the CA private key.
    #[must_use]
    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    /// Signing handle for certificate and CRL signatures.
    pub(crate) fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// rcgen issuer handle carrying the CA subject and constraints.
    pub(crate) fn issuer_cert(&self) -> &rcgen::Certificate {
        &self.issuer_cert
    }
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("subject", &self.certificate.subject())
            .field("serial", &self.certificate.serial().to_string())
            .field("private_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// Owns CA bootstrap and loading over a storage tree.
pub struct AuthorityStore {
    layout: StorageLayout,
    key_factory: Arc<dyn KeyFactory>,
    init_lock: parking_lot::Mutex<()>,
}

impl AuthorityStore {
    /// Creates a store over the given layout.
    #[must_use]
    pub fn new(layout: StorageLayout, key_factory: Arc<dyn KeyFactory>) -> Self {
        Self {
            layout,
            key_factory,
            init_lock: parking_lot::Mutex::new(()),
        }
    }

    /// Loads the CA, bootstrapping it first if absent. Idempotent: once
    /// material exists on disk, every call returns exactly that material.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthorityInit`] if generation fails or if existing
    /// CA files are partial, unreadable, or inconsistent.
    pub fn ensure_initialized(&self, config: &CaConfig) -> Result<CertificateAuthority> {
        if self.layout.ca_cert().exists() && self.layout.ca_key().exists() {
            return self.load();
        }
        // Anything else goes through the locked path: what looks partial
        // here may simply be a bootstrap in flight elsewhere, and the lock
        // settles it either way.
        self.bootstrap(config)
    }

    fn load(&self) -> Result<CertificateAuthority> {
        let cert_pem = storage::read(&self.layout.ca_cert())
            .map_err(|e| Error::AuthorityInit(format!("CA certificate unreadable: {e}")))?;
        let der = crate::types::pem_decode(PEM_CERTIFICATE, &cert_pem)
            .map_err(|e| Error::AuthorityInit(format!("CA certificate corrupt: {e}")))?;
        let certificate = Certificate::from_der(&der)
            .map_err(|e| Error::AuthorityInit(format!("CA certificate corrupt: {e}")))?;

        let key_pem = storage::read(&self.layout.ca_key())
            .map_err(|e| Error::AuthorityInit(format!("CA key unreadable: {e}")))?;
        let private_key = PrivateKey::from_pem(&key_pem)
            .map_err(|e| Error::AuthorityInit(format!("CA key corrupt: {e}")))?;
        let material = KeyMaterial::from_pkcs8_der(private_key.der())
            .map_err(|e| Error::AuthorityInit(format!("CA key unusable: {e}")))?;

        Self::check_key_matches(&der, material.key_pair())?;

        let authority = build_authority(&der, certificate, material)?;
        debug!(subject = authority.certificate.subject(), "loaded CA from disk");
        Ok(authority)
    }

    fn bootstrap(&self, config: &CaConfig) -> Result<CertificateAuthority> {
        let _in_process = self.init_lock.lock();
        self.layout.ensure_dirs()?;
        let _cross_process = FileLock::acquire(&self.layout.ca_lock())?;

        // Re-check under the lock: a concurrent first-request (possibly in
        // another process) may have won the bootstrap race.
        match (
            self.layout.ca_cert().exists(),
            self.layout.ca_key().exists(),
        ) {
            (true, true) => return self.load(),
            (false, false) => {}
            (cert, _) => {
                return Err(Error::AuthorityInit(format!(
                    "partial CA state: {} exists without its counterpart",
                    if cert { "ca.crt" } else { "ca.key" }
                )))
            }
        }

        info!(
            common_name = config.ca_common_name,
            key_size = config.key_size,
            "bootstrapping new certificate authority"
        );

        let material = self
            .key_factory
            .generate(config.key_size)
            .map_err(|e| Error::AuthorityInit(format!("CA key generation failed: {e}")))?;

        let mut params = CertificateParams::default();
        push_subject(&mut params, config, &config.ca_common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

        let now = Utc::now();
        params.not_before = to_rcgen_time(now)
            .map_err(|e| Error::AuthorityInit(e.to_string()))?;
        params.not_after = to_rcgen_time(now + Duration::days(i64::from(config.ca_validity_days)))
            .map_err(|e| Error::AuthorityInit(e.to_string()))?;

        let serial = random_serial().map_err(|e| Error::AuthorityInit(e.to_string()))?;
        params.serial_number = Some(RcgenSerial::from(serial.as_bytes().to_vec()));

        let cert = params
            .self_signed(material.key_pair())
            .map_err(|e| Error::AuthorityInit(format!("CA self-signing failed: {e}")))?;
        let der = cert.der().to_vec();

        storage::write_atomic(
            &self.layout.ca_cert(),
            crate::types::pem_encode(PEM_CERTIFICATE, &der).as_bytes(),
            false,
        )?;
        storage::write_atomic(
            &self.layout.ca_key(),
            material.private_key().pem().as_bytes(),
            true,
        )?;

        let authority = self.load()?;

        // An empty CRL is published immediately so relying parties have an
        // artifact to fetch before the first revocation.
        let registry = RevocationRegistry::new(self.layout.clone());
        crl::regenerate(&authority, &registry.list_records()?, config, &self.layout)?;

        info!(
            subject = authority.certificate.subject(),
            serial = %authority.certificate.serial(),
            "certificate authority created"
        );
        Ok(authority)
    }

    /// Verifies the persisted key actually belongs to the persisted
    /// certificate.
    fn check_key_matches(cert_der: &[u8], key_pair: &KeyPair) -> Result<()> {
        let (_, parsed) = X509Certificate::from_der(cert_der)
            .map_err(|e| Error::AuthorityInit(format!("CA certificate corrupt: {e}")))?;
        if parsed.public_key().raw != key_pair.public_key_der() {
            return Err(Error::AuthorityInit(
                "CA key does not match CA certificate".into(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for AuthorityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorityStore")
            .field("root", &self.layout.root())
            .finish_non_exhaustive()
    }
}

/// Pushes the configured subject attributes in the conventional order,
/// ending with the common name.
pub(crate) fn push_subject(params: &mut CertificateParams, config: &CaConfig, common_name: &str) {
    let dn = &mut params.distinguished_name;
    dn.push(DnType::CountryName, &config.country);
    dn.push(DnType::StateOrProvinceName, &config.state_province);
    dn.push(DnType::LocalityName, &config.locality);
    dn.push(DnType::OrganizationName, &config.organization);
    dn.push(DnType::CommonName, common_name);
}

/// Rebuilds an rcgen issuer handle from persisted CA material. The handle
/// carries the exact subject DN of the stored certificate so issued
/// certificates and CRLs name their issuer byte-compatibly.
fn build_authority(
    der: &[u8],
    certificate: Certificate,
    material: KeyMaterial,
) -> Result<CertificateAuthority> {
    let mut params = CertificateParams::default();
    copy_subject_dn(der, &mut params)?;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params.not_before = to_rcgen_time(certificate.not_before())
        .map_err(|e| Error::AuthorityInit(e.to_string()))?;
    params.not_after = to_rcgen_time(certificate.not_after())
        .map_err(|e| Error::AuthorityInit(e.to_string()))?;
    params.serial_number = Some(RcgenSerial::from(certificate.serial().as_bytes().to_vec()));

    let issuer_cert = params
        .self_signed(material.key_pair())
        .map_err(|e| Error::AuthorityInit(format!("failed to rebuild issuer: {e}")))?;
    let (private_key, key_pair) = material.into_parts();

    Ok(CertificateAuthority {
        certificate,
        private_key,
        key_pair,
        issuer_cert,
    })
}

/// Copies the subject DN of a parsed certificate into fresh parameters,
/// preserving attribute order.
fn copy_subject_dn(der: &[u8], params: &mut CertificateParams) -> Result<()> {
    use x509_parser::oid_registry::{
        OID_X509_COMMON_NAME, OID_X509_COUNTRY_NAME, OID_X509_LOCALITY_NAME,
        OID_X509_ORGANIZATIONAL_UNIT, OID_X509_ORGANIZATION_NAME,
        OID_X509_STATE_OR_PROVINCE_NAME,
    };

    let (_, parsed) = X509Certificate::from_der(der)
        .map_err(|e| Error::AuthorityInit(format!("CA certificate corrupt: {e}")))?;

    for rdn in parsed.subject().iter() {
        for attr in rdn.iter() {
            let oid = attr.attr_type();
            let dn_type = if *oid == OID_X509_COUNTRY_NAME {
                DnType::CountryName
            } else if *oid == OID_X509_STATE_OR_PROVINCE_NAME {
                DnType::StateOrProvinceName
            } else if *oid == OID_X509_LOCALITY_NAME {
                DnType::LocalityName
            } else if *oid == OID_X509_ORGANIZATION_NAME {
                DnType::OrganizationName
            } else if *oid == OID_X509_ORGANIZATIONAL_UNIT {
                DnType::OrganizationalUnitName
            } else if *oid == OID_X509_COMMON_NAME {
                DnType::CommonName
            } else {
                return Err(Error::AuthorityInit(format!(
                    "unsupported subject attribute {oid} in CA certificate"
                )));
            };
            let value = attr
                .as_str()
                .map_err(|e| Error::AuthorityInit(format!("undecodable subject attribute: {e}")))?;
            params.distinguished_name.push(dn_type, value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::test_support::SharedKeyFactory;

    fn store(dir: &std::path::Path) -> AuthorityStore {
        AuthorityStore::new(StorageLayout::new(dir), Arc::new(SharedKeyFactory))
    }

    #[test]
    fn bootstrap_creates_ca_files_and_initial_crl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = CaConfig::default();
        let authority = store(dir.path()).ensure_initialized(&config).unwrap();

        assert_eq!(authority.certificate().subject(), "GISCE-TI CA");
        assert_eq!(authority.certificate().issuer(), "GISCE-TI CA");
        assert!(dir.path().join("ca/ca.crt").exists());
        assert!(dir.path().join("ca/ca.key").exists());
        assert!(dir.path().join("ca/crl.pem").exists());
    }

    #[test]
    fn ensure_initialized_is_idempotent_byte_for_byte() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = CaConfig::default();
        let authority_store = store(dir.path());

        authority_store.ensure_initialized(&config).unwrap();
        let cert1 = std::fs::read(dir.path().join("ca/ca.crt")).unwrap();
        let key1 = std::fs::read(dir.path().join("ca/ca.key")).unwrap();

        authority_store.ensure_initialized(&config).unwrap();
        let cert2 = std::fs::read(dir.path().join("ca/ca.crt")).unwrap();
        let key2 = std::fs::read(dir.path().join("ca/ca.key")).unwrap();

        assert_eq!(cert1, cert2);
        assert_eq!(key1, key2);
    }

    #[test]
    fn ca_validity_window_follows_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = CaConfig {
            ca_validity_days: 30,
            ..CaConfig::default()
        };
        let authority = store(dir.path()).ensure_initialized(&config).unwrap();
        let cert = authority.certificate();
        let days = (cert.not_after() - cert.not_before()).num_days();
        assert_eq!(days, 30);
    }

    #[test]
    fn corrupt_ca_key_is_fatal_and_leaves_cert_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = CaConfig::default();
        let authority_store = store(dir.path());
        authority_store.ensure_initialized(&config).unwrap();

        let cert_before = std::fs::read(dir.path().join("ca/ca.crt")).unwrap();
        std::fs::write(dir.path().join("ca/ca.key"), b"not a key").unwrap();

        let err = authority_store.ensure_initialized(&config).unwrap_err();
        assert!(matches!(err, Error::AuthorityInit(_)));

        let cert_after = std::fs::read(dir.path().join("ca/ca.crt")).unwrap();
        assert_eq!(cert_before, cert_after);
    }

    #[test]
    fn partial_ca_state_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = CaConfig::default();
        let authority_store = store(dir.path());
        authority_store.ensure_initialized(&config).unwrap();

        std::fs::remove_file(dir.path().join("ca/ca.key")).unwrap();
        let err = authority_store.ensure_initialized(&config).unwrap_err();
        assert!(matches!(err, Error::AuthorityInit(_)));
    }

    #[test]
    fn deleting_both_files_resets_the_ca() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = CaConfig::default();
        let authority_store = store(dir.path());

        let first = authority_store.ensure_initialized(&config).unwrap();
        std::fs::remove_file(dir.path().join("ca/ca.crt")).unwrap();
        std::fs::remove_file(dir.path().join("ca/ca.key")).unwrap();

        let second = authority_store.ensure_initialized(&config).unwrap();
        assert_ne!(
            first.certificate().serial(),
            second.certificate().serial()
        );
    }

    #[test]
    fn mismatched_key_is_detected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = CaConfig::default();
        let authority_store = store(dir.path());
        authority_store.ensure_initialized(&config).unwrap();

        // Swap in a different (valid) key.
        let other = crate::keys::test_support::cached_key_material_alt();
        std::fs::write(
            dir.path().join("ca/ca.key"),
            other.private_key().pem().as_bytes(),
        )
        .unwrap();

        let err = authority_store.ensure_initialized(&config).unwrap_err();
        assert!(matches!(err, Error::AuthorityInit(_)));
    }

    #[cfg(unix)]
    #[test]
    fn ca_key_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tempdir");
        store(dir.path())
            .ensure_initialized(&CaConfig::default())
            .unwrap();
        let mode = std::fs::metadata(dir.path().join("ca/ca.key"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn concurrent_first_requests_produce_one_ca() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = CaConfig::default();
        let authority_store = Arc::new(store(dir.path()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let authority_store = Arc::clone(&authority_store);
                let config = config.clone();
                std::thread::spawn(move || {
                    authority_store
                        .ensure_initialized(&config)
                        .expect("ensure_initialized")
                        .certificate()
                        .serial()
                        .clone()
                })
            })
            .collect();

        let serials: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("bootstrap thread"))
            .collect();
        assert!(serials.windows(2).all(|w| w[0] == w[1]));
    }
}
