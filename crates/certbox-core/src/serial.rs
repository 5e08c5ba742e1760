//! Serial number allocation.
//!
//! Serials are 159-bit cryptographically random values checked for
//! uniqueness before acceptance. Entropy alone makes cross-restart
//! collisions unreachable in practice; the explicit check turns
//! "practically never" into "never" for serials this tree has seen.

use std::collections::HashSet;

use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::SerialNumber;

/// Capability interface answering "has this serial ever been issued?".
///
/// Implemented over the issued-certificate store and the revocation log, so
/// the allocator can be exercised in isolation with an in-memory fake.
pub trait SerialIndex {
    /// Returns whether the serial is already known to this authority.
    ///
    /// # Errors
    ///
    /// Propagates storage failures from the backing index.
    fn contains(&self, serial: &SerialNumber) -> Result<bool>;
}

/// A [`SerialIndex`] that knows no serials. Used when bootstrapping the CA
/// certificate itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyIndex;

impl SerialIndex for EmptyIndex {
    fn contains(&self, _serial: &SerialNumber) -> Result<bool> {
        Ok(false)
    }
}

const SERIAL_BYTES: usize = 20;
const MAX_ATTEMPTS: usize = 64;

/// Produces strictly-unique serial numbers for issued certificates.
///
/// Concurrent callers serialize on an internal mutex, and every serial
/// handed out by this instance is remembered so two in-flight issuances can
/// never receive the same value even before either certificate is persisted.
///
/// The backing index covers live certificates and the revocation log, not
/// serials superseded by re-issuance without a revocation; for those the
/// 159 bits of entropy alone rule out reuse.
#[derive(Debug, Default)]
pub struct SerialAllocator {
    handed_out: Mutex<HashSet<SerialNumber>>,
}

impl SerialAllocator {
    /// Creates a new allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a serial not present in `index` nor previously handed out
    /// by this instance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SerialExhausted`] if no fresh serial is found within
    /// the attempt bound, which is unreachable short of a broken RNG, and
    /// propagates index storage failures.
    pub fn next_serial(&self, index: &dyn SerialIndex) -> Result<SerialNumber> {
        let mut handed_out = self.handed_out.lock();
        for _ in 0..MAX_ATTEMPTS {
            let serial = random_serial()?;
            if handed_out.contains(&serial) || index.contains(&serial)? {
                warn!(%serial, "serial collision, retrying");
                continue;
            }
            debug!(%serial, "allocated serial");
            handed_out.insert(serial.clone());
            return Ok(serial);
        }
        Err(Error::SerialExhausted)
    }
}

/// Draws a random 159-bit serial (top bit cleared so the DER integer stays
/// positive).
pub(crate) fn random_serial() -> Result<SerialNumber> {
    for _ in 0..MAX_ATTEMPTS {
        let mut bytes = [0u8; SERIAL_BYTES];
        OsRng.fill_bytes(&mut bytes);
        bytes[0] &= 0x7f;
        // All-zero draws are rejected by the constructor.
        if let Ok(serial) = SerialNumber::from_bytes(&bytes) {
            return Ok(serial);
        }
    }
    Err(Error::SerialExhausted)
}
