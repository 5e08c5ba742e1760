//! CRL regeneration.
//!
//! The CRL is a derived artifact, fully reconstructible from the revocation
//! registry and the CA. It is regenerated synchronously after every
//! successful revocation so a fetched CRL always reflects the latest
//! revocation; mTLS rejection correctness depends on that freshness.

use chrono::{Duration, Utc};
use rcgen::{
    CertificateRevocationListParams, KeyIdMethod, RevokedCertParams,
    SerialNumber as RcgenSerial,
};
use tracing::debug;

use crate::authority::CertificateAuthority;
use crate::config::CaConfig;
use crate::error::{Error, Result};
use crate::storage::{self, StorageLayout};
use crate::types::{pem_encode, to_rcgen_time, RevocationRecord, PEM_X509_CRL};

/// Builds a CRL listing exactly `revoked`, signs it with the CA key, and
/// persists it atomically at `ca/crl.pem`. Returns the PEM bytes.
///
/// # Errors
///
/// Returns [`Error::CrlGeneration`] on signing failure and
/// [`Error::Storage`] if the artifact cannot be persisted. Either way the
/// triggering revocation must not be reported as fully successful.
pub fn regenerate(
    authority: &CertificateAuthority,
    revoked: &[RevocationRecord],
    config: &CaConfig,
    layout: &StorageLayout,
) -> Result<Vec<u8>> {
    let this_update = Utc::now();
    let next_update = this_update + Duration::days(i64::from(config.crl_validity_days));

    let revoked_certs = revoked
        .iter()
        .map(|record| {
            Ok(RevokedCertParams {
                serial_number: RcgenSerial::from(record.serial.as_bytes().to_vec()),
                revocation_time: to_rcgen_time(record.revoked_at)
                    .map_err(|e| Error::CrlGeneration(e.to_string()))?,
                reason_code: None,
                invalidity_date: None,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let params = CertificateRevocationListParams {
        this_update: to_rcgen_time(this_update).map_err(|e| Error::CrlGeneration(e.to_string()))?,
        next_update: to_rcgen_time(next_update).map_err(|e| Error::CrlGeneration(e.to_string()))?,
        // Monotonic enough: seconds since the epoch at regeneration time.
        crl_number: RcgenSerial::from(this_update.timestamp().to_be_bytes().to_vec()),
        issuing_distribution_point: None,
        revoked_certs,
        key_identifier_method: KeyIdMethod::Sha256,
    };

    let crl = params
        .signed_by(authority.issuer_cert(), authority.key_pair())
        .map_err(|e| Error::CrlGeneration(format!("CRL signing failed: {e}")))?;

    let pem = pem_encode(PEM_X509_CRL, crl.der());
    storage::write_atomic(&layout.crl(), pem.as_bytes(), false)?;

    debug!(entries = revoked.len(), "CRL regenerated");
    Ok(pem.into_bytes())
}
