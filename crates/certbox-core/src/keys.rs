//! Key material generation.
//!
//! rcgen signs with imported keys but cannot generate RSA keys itself, so
//! generation goes through the `rsa` crate and the PKCS#8 encoding bridges
//! the result into an [`rcgen::KeyPair`] for signing.

use pkcs8::EncodePrivateKey;
use rand::rngs::OsRng;
use rcgen::KeyPair;
use rsa::RsaPrivateKey;
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::PrivateKey;

/// A generated keypair: the PKCS#8 private key bytes plus the signing
/// handle built from them.
pub struct KeyMaterial {
    private_key: PrivateKey,
    key_pair: KeyPair,
}

impl KeyMaterial {
    /// Builds key material from PKCS#8 DER bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a usable private key.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        let key_pair = KeyPair::try_from(der)
            .map_err(|e| Error::Signing(format!("failed to load private key: {e}")))?;
        Ok(Self {
            private_key: PrivateKey::new(der.to_vec()),
            key_pair,
        })
    }

    /// Returns the private key bytes.
    #[must_use]
    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    /// Returns the signing handle.
    #[must_use]
    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// Splits the material into its private key bytes and signing handle.
    #[must_use]
    pub fn into_parts(self) -> (PrivateKey, KeyPair) {
        (self.private_key, self.key_pair)
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("private_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// Capability interface for keypair generation.
///
/// The issuer and the authority store depend on this abstraction so tests
/// can substitute a fixture that skips the keygen cost.
pub trait KeyFactory: Send + Sync {
    /// Generates a fresh keypair of the given bit length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Signing`] if generation fails.
    fn generate(&self, bits: usize) -> Result<KeyMaterial>;
}

/// Production [`KeyFactory`]: RSA with public exponent 65537, keyed from
/// the operating system RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RsaKeyFactory;

impl KeyFactory for RsaKeyFactory {
    fn generate(&self, bits: usize) -> Result<KeyMaterial> {
        debug!(bits, "generating RSA keypair");
        let key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| Error::Signing(format!("RSA key generation failed: {e}")))?;
        let der = key
            .to_pkcs8_der()
            .map_err(|e| Error::Signing(format!("PKCS#8 encoding failed: {e}")))?;
        KeyMaterial::from_pkcs8_der(der.as_bytes())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Shared key fixtures so test suites pay the RSA keygen cost once.

    use std::sync::OnceLock;

    use super::{KeyFactory, KeyMaterial, RsaKeyFactory};
    use crate::error::Result;

    static CACHED_PKCS8: OnceLock<Vec<u8>> = OnceLock::new();
    static CACHED_PKCS8_ALT: OnceLock<Vec<u8>> = OnceLock::new();

    fn generate_der() -> Vec<u8> {
        RsaKeyFactory
            .generate(2048)
            .expect("RSA generation")
            .private_key()
            .der()
            .to_vec()
    }

    /// Returns key material backed by a process-wide cached RSA key.
    pub(crate) fn cached_key_material() -> KeyMaterial {
        let der = CACHED_PKCS8.get_or_init(generate_der);
        KeyMaterial::from_pkcs8_der(der).expect("cached key is valid")
    }

    /// A second cached key, for cases that need two distinct keys.
    pub(crate) fn cached_key_material_alt() -> KeyMaterial {
        let der = CACHED_PKCS8_ALT.get_or_init(generate_der);
        KeyMaterial::from_pkcs8_der(der).expect("cached key is valid")
    }

    /// [`KeyFactory`] that always returns the cached key.
    #[derive(Debug, Default, Clone, Copy)]
    pub(crate) struct SharedKeyFactory;

    impl KeyFactory for SharedKeyFactory {
        fn generate(&self, _bits: usize) -> Result<KeyMaterial> {
            Ok(cached_key_material())
        }
    }
}
