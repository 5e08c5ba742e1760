//! End-to-end lifecycle tests against a real storage tree, with real RSA
//! key generation.

use std::sync::Arc;

use certbox_core::{CaConfig, CertificateManager, Error, Identity, RevocationStatus};
use x509_parser::prelude::*;

fn identity(name: &str) -> Identity {
    Identity::new(name).expect("valid identity")
}

fn crl_serials(pem: &[u8]) -> Vec<Vec<u8>> {
    let (_, doc) = x509_parser::pem::parse_x509_pem(pem).expect("CRL PEM");
    let (_, crl) = CertificateRevocationList::from_der(&doc.contents).expect("CRL DER");
    crl.iter_revoked_certificates()
        .map(|r| r.raw_serial().to_vec())
        .collect()
}

#[test]
fn full_certificate_lifecycle() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = CertificateManager::new(dir.path(), CaConfig::default());
    let alice = identity("alice");

    // First issuance bootstraps the CA as a side effect.
    let issued = manager
        .create_certificate(&alice, Some("changeit"))
        .expect("issue");
    assert!(dir.path().join("ca/ca.crt").exists());
    assert!(dir.path().join("ca/ca.key").exists());
    assert!(dir.path().join("ca/crl.pem").exists());

    // The bundle opens with the password it was built with, and no other.
    let pfx_der = manager.pfx(&alice).expect("pfx");
    let pfx = p12::PFX::parse(&pfx_der).expect("parse pfx");
    assert!(pfx.verify_mac("changeit"));
    assert!(!pfx.verify_mac("wrong"));

    // Revocation succeeds once, then reports the serial as already revoked.
    let outcome = manager.revoke_certificate(&alice).expect("revoke");
    assert_eq!(outcome.status, RevocationStatus::Revoked);
    assert_eq!(outcome.serial_number, issued.serial_number);
    let again = manager.revoke_certificate(&alice).expect("revoke again");
    assert_eq!(again.status, RevocationStatus::AlreadyRevoked);

    // Re-issuing after revocation yields a new serial; the revoked one
    // stays on the CRL.
    let reissued = manager
        .create_certificate(&alice, Some("changeit"))
        .expect("re-issue");
    assert_ne!(reissued.serial_number, issued.serial_number);

    let serials = crl_serials(&manager.crl().expect("crl"));
    assert!(serials.contains(&issued.serial_number.as_bytes().to_vec()));
    assert!(!serials.contains(&reissued.serial_number.as_bytes().to_vec()));
}

#[test]
fn state_survives_a_new_manager_instance() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bob = identity("bob");

    let first = CertificateManager::new(dir.path(), CaConfig::default());
    let issued = first.create_certificate(&bob, None).expect("issue");
    first.revoke_certificate(&bob).expect("revoke");
    let ca_before = first.ca_certificate().expect("ca").der().to_vec();
    drop(first);

    // A fresh instance over the same tree loads, not re-bootstraps.
    let second = CertificateManager::new(dir.path(), CaConfig::default());
    assert_eq!(second.ca_certificate().expect("ca").der(), ca_before);
    assert!(second.is_revoked(&issued.serial_number).expect("registry"));
    assert!(second.pfx(&bob).is_ok());

    // Revoking again through the new instance is still idempotent.
    let outcome = second.revoke_certificate(&bob).expect("revoke");
    assert_eq!(outcome.status, RevocationStatus::AlreadyRevoked);
}

#[test]
fn unknown_identities_are_rejected_cleanly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = CertificateManager::new(dir.path(), CaConfig::default());
    let ghost = identity("ghost");

    assert!(matches!(manager.pfx(&ghost), Err(Error::NotFound(_))));
    assert!(matches!(
        manager.revoke_certificate(&ghost),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        manager.renew_certificate(&ghost, true, None),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn concurrent_issuance_for_distinct_identities() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = Arc::new(CertificateManager::new(dir.path(), CaConfig::default()));

    let handles: Vec<_> = ["carol", "dave", "erin"]
        .into_iter()
        .map(|name| {
            let manager = Arc::clone(&manager);
            std::thread::spawn(move || {
                manager
                    .create_certificate(&identity(name), None)
                    .expect("issue")
            })
        })
        .collect();

    let mut serials = Vec::new();
    for handle in handles {
        let issued = handle.join().expect("thread");
        assert!(issued.certificate_path.exists());
        assert!(issued.pfx_path.exists());
        serials.push(issued.serial_number);
    }
    serials.sort();
    serials.dedup();
    assert_eq!(serials.len(), 3, "serials must be unique");
}
