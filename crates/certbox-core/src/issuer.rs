//! Client certificate issuance.

use chrono::{Duration, Utc};
use rcgen::{CertificateParams, ExtendedKeyUsagePurpose, IsCa, KeyUsagePurpose, SerialNumber as RcgenSerial};
use tracing::info;

use crate::authority::{push_subject, CertificateAuthority};
use crate::config::CaConfig;
use crate::error::{Error, Result};
use crate::keys::KeyFactory;
use crate::serial::{SerialAllocator, SerialIndex};
use crate::types::{to_rcgen_time, Certificate, Identity, PrivateKey};

/// Builds and signs a client certificate for `identity`.
///
/// A fresh keypair is generated, a unique serial allocated, and the
/// certificate signed with the CA key. The subject carries the configured
/// country/state/locality/organization plus CN = identity; the certificate
/// is an end-entity restricted to TLS client authentication, valid from now
/// for the configured number of days. The only side effect is serial
/// consumption; persisting the result belongs to the caller.
///
/// # Errors
///
/// Returns [`Error::Signing`] if key generation or the signature fails, and
/// propagates allocator errors.
pub fn issue(
    authority: &CertificateAuthority,
    identity: &Identity,
    config: &CaConfig,
    factory: &dyn KeyFactory,
    allocator: &SerialAllocator,
    index: &dyn SerialIndex,
) -> Result<(Certificate, PrivateKey)> {
    info!(%identity, "issuing client certificate");

    let material = factory.generate(config.key_size)?;
    let serial = allocator.next_serial(index)?;

    let mut params = CertificateParams::default();
    push_subject(&mut params, config, identity.as_str());
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
    params.use_authority_key_identifier_extension = true;
    params.serial_number = Some(RcgenSerial::from(serial.as_bytes().to_vec()));

    let now = Utc::now();
    params.not_before = to_rcgen_time(now)?;
    params.not_after = to_rcgen_time(now + Duration::days(i64::from(config.cert_validity_days)))?;

    let cert = params
        .signed_by(material.key_pair(), authority.issuer_cert(), authority.key_pair())
        .map_err(|e| Error::Signing(format!("failed to sign certificate: {e}")))?;

    let certificate = Certificate::from_der(cert.der())
        .map_err(|e| Error::Signing(format!("issued certificate unreadable: {e}")))?;
    let (private_key, _) = material.into_parts();

    info!(%identity, serial = %certificate.serial(), "client certificate issued");
    Ok((certificate, private_key))
}
