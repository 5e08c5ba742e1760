//! Configuration for certificate generation.
//!
//! The configuration is threaded explicitly into the authority store and the
//! issuer; nothing in this crate reads ambient process state. Loading from
//! environment variables or files belongs to the embedding application.

use serde::{Deserialize, Serialize};

/// Configuration consumed by CA bootstrap and certificate issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaConfig {
    /// Validity of issued client certificates, in days.
    pub cert_validity_days: u32,
    /// Validity of the self-signed CA certificate, in days.
    pub ca_validity_days: u32,
    /// Validity window of a published CRL, in days.
    pub crl_validity_days: u32,
    /// RSA key size in bits, for both the CA and client keys.
    pub key_size: usize,
    /// Subject country name (C).
    pub country: String,
    /// Subject state or province name (ST).
    pub state_province: String,
    /// Subject locality name (L).
    pub locality: String,
    /// Subject organization name (O).
    pub organization: String,
    /// Common name (CN) of the CA certificate.
    pub ca_common_name: String,
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            cert_validity_days: 365,
            ca_validity_days: 3650,
            crl_validity_days: 7,
            key_size: 2048,
            country: "ES".into(),
            state_province: "Catalonia".into(),
            locality: "Girona".into(),
            organization: "GISCE-TI".into(),
            ca_common_name: "GISCE-TI CA".into(),
        }
    }
}
