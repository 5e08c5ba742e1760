//! PKCS#12 (PFX) bundling.
//!
//! A PFX bundle is a cache of the certificate + key pair, packaged together
//! with the CA certificate for chain trust so clients can import everything
//! in one file. It is never authoritative state.

use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{Certificate, PrivateKey};

/// A serialized PKCS#12 container.
#[derive(Clone)]
pub struct PfxBundle {
    der: Vec<u8>,
}

impl PfxBundle {
    /// Returns the DER bytes of the container.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.der
    }

    /// Consumes the bundle, returning its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.der
    }
}

impl std::fmt::Debug for PfxBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PfxBundle")
            .field("len", &self.der.len())
            .finish()
    }
}

/// Packages a certificate, its private key, and the CA certificate into a
/// PKCS#12 container. `None` for the password produces the empty-password
/// container conventional for PKCS#12.
///
/// # Errors
///
/// Returns [`Error::Bundling`] if the inputs cannot be assembled.
pub fn export(
    certificate: &Certificate,
    private_key: &PrivateKey,
    ca_certificate: &Certificate,
    password: Option<&str>,
) -> Result<PfxBundle> {
    let password = password.unwrap_or("");
    let pfx = p12::PFX::new(
        certificate.der(),
        private_key.der(),
        Some(ca_certificate.der()),
        password,
        certificate.subject(),
    )
    .ok_or_else(|| {
        Error::Bundling(format!(
            "failed to assemble PKCS#12 container for '{}'",
            certificate.subject()
        ))
    })?;

    let der = pfx.to_der();
    debug!(subject = certificate.subject(), len = der.len(), "PFX bundle built");
    Ok(PfxBundle { der })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::authority::AuthorityStore;
    use crate::config::CaConfig;
    use crate::issuer;
    use crate::keys::test_support::SharedKeyFactory;
    use crate::serial::{EmptyIndex, SerialAllocator};
    use crate::storage::StorageLayout;
    use crate::types::Identity;

    fn issued() -> (Certificate, PrivateKey, Certificate) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = CaConfig::default();
        let authority = AuthorityStore::new(StorageLayout::new(dir.path()), Arc::new(SharedKeyFactory))
            .ensure_initialized(&config)
            .expect("bootstrap");
        let identity = Identity::new("alice").expect("identity");
        let (cert, key) = issuer::issue(
            &authority,
            &identity,
            &config,
            &SharedKeyFactory,
            &SerialAllocator::new(),
            &EmptyIndex,
        )
        .expect("issue");
        (cert, key, authority.certificate().clone())
    }

    #[test]
    fn export_produces_a_parseable_container() {
        let (cert, key, ca) = issued();
        let bundle = export(&cert, &key, &ca, None).unwrap();
        assert!(!bundle.as_bytes().is_empty());
        assert!(p12::PFX::parse(bundle.as_bytes()).is_ok());
    }

    #[test]
    fn bundle_contains_client_and_ca_certificates() {
        let (cert, key, ca) = issued();
        let bundle = export(&cert, &key, &ca, None).unwrap();

        let pfx = p12::PFX::parse(bundle.as_bytes()).unwrap();
        let bags = pfx.cert_x509_bags("").unwrap();
        assert!(bags.iter().any(|der| der == cert.der()));
        assert!(bags.iter().any(|der| der == ca.der()));
    }

    #[test]
    fn password_protected_bundle_rejects_wrong_password() {
        let (cert, key, ca) = issued();
        let bundle = export(&cert, &key, &ca, Some("hunter2")).unwrap();

        let pfx = p12::PFX::parse(bundle.as_bytes()).unwrap();
        assert!(pfx.verify_mac("hunter2"));
        assert!(!pfx.verify_mac("wrong"));
    }
}
