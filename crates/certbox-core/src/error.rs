//! Error types for the certificate lifecycle engine.

use thiserror::Error;

/// Result type for certificate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Certificate lifecycle error variants.
///
/// The core never logs-and-swallows; every failure is returned to the
/// caller as one of these. `AuthorityInit` and `SerialExhausted` are fatal
/// for the service; `InvalidIdentity`, `UnknownSerial` and `NotFound` are
/// caller errors; the rest are operation-local or environment failures.
#[derive(Debug, Error)]
pub enum Error {
    /// CA bootstrap or load failed. The service cannot operate without a
    /// valid CA, and existing material is never regenerated over.
    #[error("authority initialization failed: {0}")]
    AuthorityInit(String),

    /// The serial number space could not produce a fresh serial.
    #[error("serial number space exhausted")]
    SerialExhausted,

    /// Identity is empty or unsafe to use as a filesystem key.
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    /// A cryptographic signing or key generation operation failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// PKCS#12 bundling failed.
    #[error("PKCS#12 bundling failed: {0}")]
    Bundling(String),

    /// CRL regeneration failed. The triggering revocation is not fully
    /// successful until a regeneration succeeds.
    #[error("CRL generation failed: {0}")]
    CrlGeneration(String),

    /// Asked to revoke a serial this authority never issued.
    #[error("unknown serial: {0}")]
    UnknownSerial(String),

    /// No stored artifact for the given identity.
    #[error("not found: {0}")]
    NotFound(String),

    /// A persisted artifact could not be parsed.
    #[error("parse failed: {0}")]
    Parse(String),

    /// Underlying filesystem I/O failure. Surfaced, never retried here.
    #[error("storage error: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_context() {
        let err = Error::NotFound("alice".into());
        assert_eq!(err.to_string(), "not found: alice");

        let err = Error::UnknownSerial("deadbeef".into());
        assert!(err.to_string().contains("deadbeef"));
    }

    #[test]
    fn serial_exhaustion_has_fixed_message() {
        assert_eq!(
            Error::SerialExhausted.to_string(),
            "serial number space exhausted"
        );
    }
}
