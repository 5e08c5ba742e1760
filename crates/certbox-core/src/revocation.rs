//! Durable revocation bookkeeping.
//!
//! The registry is an append-only log of revoked serials
//! (`ca/revoked_serials.txt`, one lowercase-hex serial per line). A recorded
//! revocation survives restart and is never un-recorded by anything in this
//! crate. The file is re-read on every operation so multiple processes
//! sharing the tree observe each other's writes; callers serialize mutation
//! through the revocation lock.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::info;

use crate::error::{Error, Result};
use crate::storage::{self, StorageLayout};
use crate::types::{RevocationRecord, RevocationStatus, SerialNumber};

/// The revoked-serial set, backed by the append-only log.
pub struct RevocationRegistry {
    layout: StorageLayout,
    /// Revocation timestamps recorded by this instance. The log itself
    /// stores only serials, so times for entries written by other processes
    /// or earlier runs are not recoverable; CRL entries for those fall back
    /// to the regeneration time.
    recorded_at: Mutex<HashMap<SerialNumber, DateTime<Utc>>>,
}

impl RevocationRegistry {
    /// Creates a registry over the given storage tree.
    #[must_use]
    pub fn new(layout: StorageLayout) -> Self {
        Self {
            layout,
            recorded_at: Mutex::new(HashMap::new()),
        }
    }

    /// Records a revocation. Idempotent: a serial already present yields
    /// the existing record with [`RevocationStatus::AlreadyRevoked`] — an
    /// explicit success, distinguished so the request layer can map it.
    ///
    /// # Errors
    ///
    /// Propagates log read/append failures as [`Error::Storage`].
    pub fn revoke(
        &self,
        serial: &SerialNumber,
        timestamp: DateTime<Utc>,
    ) -> Result<(RevocationRecord, RevocationStatus)> {
        let current = self.read_log()?;
        if current.contains(serial) {
            let revoked_at = self
                .recorded_at
                .lock()
                .get(serial)
                .copied()
                .unwrap_or(timestamp);
            return Ok((
                RevocationRecord {
                    serial: serial.clone(),
                    revoked_at,
                },
                RevocationStatus::AlreadyRevoked,
            ));
        }

        storage::append_line(&self.layout.revoked_serials(), &serial.to_string())?;
        self.recorded_at.lock().insert(serial.clone(), timestamp);
        info!(%serial, "serial revoked");

        Ok((
            RevocationRecord {
                serial: serial.clone(),
                revoked_at: timestamp,
            },
            RevocationStatus::Revoked,
        ))
    }

    /// Returns the full revoked-serial set.
    pub fn list_revoked(&self) -> Result<BTreeSet<SerialNumber>> {
        self.read_log()
    }

    /// Returns the revoked set as records, for CRL generation. Serials with
    /// no known revocation time are stamped with the current time.
    pub fn list_records(&self) -> Result<Vec<RevocationRecord>> {
        let now = Utc::now();
        let recorded_at = self.recorded_at.lock();
        Ok(self
            .read_log()?
            .into_iter()
            .map(|serial| {
                let revoked_at = recorded_at.get(&serial).copied().unwrap_or(now);
                RevocationRecord { serial, revoked_at }
            })
            .collect())
    }

    /// Returns whether the serial is revoked.
    pub fn is_revoked(&self, serial: &SerialNumber) -> Result<bool> {
        Ok(self.read_log()?.contains(serial))
    }

    fn read_log(&self) -> Result<BTreeSet<SerialNumber>> {
        let path = self.layout.revoked_serials();
        let contents = match storage::read(&path) {
            Ok(bytes) => bytes,
            Err(Error::NotFound(_)) => return Ok(BTreeSet::new()),
            Err(e) => return Err(e),
        };
        let text = String::from_utf8(contents)
            .map_err(|_| Error::Storage(format!("corrupt revocation log '{}'", path.display())))?;
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                line.parse().map_err(|_| {
                    Error::Storage(format!(
                        "corrupt revocation log '{}': bad line '{line}'",
                        path.display()
                    ))
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for RevocationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationRegistry")
            .field("log", &self.layout.revoked_serials())
            .finish_non_exhaustive()
    }
}
