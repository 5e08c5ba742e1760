//! Single-tenant certificate authority engine.
//!
//! This crate bootstraps and operates one private CA over a filesystem
//! storage tree: it issues TLS client certificates, packages them as
//! PKCS#12 bundles, records revocations in an append-only log, and keeps a
//! signed CRL in sync with that log. It is the core behind an mTLS client
//! provisioning service; HTTP and CLI surfaces live elsewhere and talk to
//! [`CertificateManager`].
//!
//! # Example
//!
//! ```no_run
//! use certbox_core::{CaConfig, CertificateManager, Identity};
//!
//! fn main() -> certbox_core::Result<()> {
//!     let manager = CertificateManager::new("/var/lib/certbox", CaConfig::default());
//!     let identity = Identity::new("alice@example.org")?;
//!     let issued = manager.create_certificate(&identity, None)?;
//!     println!("issued serial {}", issued.serial_number);
//!
//!     let outcome = manager.revoke_certificate(&identity)?;
//!     println!("revocation status: {}", outcome.status);
//!     Ok(())
//! }
//! ```
//!
//! # Concurrency
//!
//! All operations are safe to call from multiple threads, and the on-disk
//! protocol (atomic writes, advisory file locks) keeps several process
//! instances sharing one storage tree consistent: CA bootstrap runs under a
//! file lock, issuance for one identity is serialized, and revocation plus
//! CRL regeneration happen as a single locked unit.

pub mod authority;
pub mod config;
pub mod crl;
pub mod error;
pub mod issuer;
pub mod keys;
pub mod manager;
pub mod pfx;
pub mod repository;
pub mod revocation;
pub mod serial;
pub mod storage;
pub mod types;

pub use authority::{AuthorityStore, CertificateAuthority};
pub use config::CaConfig;
pub use error::{Error, Result};
pub use keys::{KeyFactory, KeyMaterial, RsaKeyFactory};
pub use manager::CertificateManager;
pub use pfx::PfxBundle;
pub use repository::CertificateRepository;
pub use revocation::RevocationRegistry;
pub use serial::{SerialAllocator, SerialIndex};
pub use storage::StorageLayout;
pub use types::{
    Certificate, Identity, IssuedCertificate, PrivateKey, RenewedCertificate, RevocationOutcome,
    RevocationRecord, RevocationStatus, SerialNumber,
};
