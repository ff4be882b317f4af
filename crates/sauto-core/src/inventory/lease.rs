//! Exclusive use of a shared MXA analyzer.
//!
//! The `mxa.in_use` column is taken with a single conditional UPDATE, so two
//! runs racing for the same analyzer cannot both see it free. The winner's
//! owner token is stored next to the flag and only that token releases it.

use super::Inventory;
use crate::error::{Result, SautoError};
use rusqlite::params;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaseStatus {
    pub mxa_id: i64,
    pub name: String,
    pub in_use: bool,
    pub owner: Option<String>,
    pub acquired_at: Option<String>,
}

impl Inventory {
    /// Take the lease on MXA `id` for `owner`. Returns `false` when another
    /// owner holds it.
    pub fn try_acquire_mxa(&self, id: i64, owner: &str) -> Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let n = self.conn().execute(
            "UPDATE mxa SET in_use = 1, lease_owner = ?1, lease_acquired_at = ?2
             WHERE id = ?3 AND COALESCE(in_use, 0) = 0",
            params![owner, now, id],
        )?;
        if n == 1 {
            tracing::info!(mxa = id, owner, "acquired MXA lease");
            return Ok(true);
        }
        // Distinguish "held by someone" from "no such analyzer".
        self.is_mxa_busy(id)?;
        Ok(false)
    }

    /// Release the lease if `owner` holds it. Returns whether anything changed.
    pub fn release_mxa(&self, id: i64, owner: &str) -> Result<bool> {
        let n = self.conn().execute(
            "UPDATE mxa SET in_use = 0, lease_owner = NULL, lease_acquired_at = NULL
             WHERE id = ?1 AND lease_owner = ?2",
            params![id, owner],
        )?;
        if n == 1 {
            tracing::info!(mxa = id, owner, "released MXA lease");
        } else {
            tracing::warn!(mxa = id, owner, "MXA lease not held by this owner");
        }
        Ok(n == 1)
    }

    /// Clear the flag regardless of owner.
    pub fn force_release_mxa(&self, id: i64) -> Result<()> {
        let n = self.conn().execute(
            "UPDATE mxa SET in_use = 0, lease_owner = NULL, lease_acquired_at = NULL
             WHERE id = ?1",
            params![id],
        )?;
        if n == 0 {
            return Err(SautoError::RowNotFound { table: "mxa", id });
        }
        tracing::warn!(mxa = id, "force released MXA lease");
        Ok(())
    }

    pub fn mxa_leases(&self) -> Result<Vec<LeaseStatus>> {
        let records = self.select(
            "SELECT id, name, in_use, lease_owner, lease_acquired_at FROM mxa ORDER BY id",
            &[],
        )?;
        Ok(records
            .iter()
            .filter_map(|r| {
                Some(LeaseStatus {
                    mxa_id: r.i64("id")?,
                    name: r.text("name").unwrap_or_default(),
                    in_use: r.i64("in_use").unwrap_or(0) != 0,
                    owner: r.text("lease_owner"),
                    acquired_at: r.text("lease_acquired_at"),
                })
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// LeaseRegistry
// ---------------------------------------------------------------------------

/// Analyzer ids currently leased by this process. Shared with the interrupt
/// handler so it can free them before exiting.
#[derive(Debug, Clone, Default)]
pub struct LeaseRegistry {
    held: Arc<Mutex<BTreeSet<i64>>>,
}

impl LeaseRegistry {
    pub fn held(&self) -> Vec<i64> {
        match self.held.lock() {
            Ok(set) => set.iter().copied().collect(),
            Err(poisoned) => poisoned.into_inner().iter().copied().collect(),
        }
    }

    fn insert(&self, id: i64) {
        if let Ok(mut set) = self.held.lock() {
            set.insert(id);
        }
    }

    fn remove(&self, id: i64) {
        if let Ok(mut set) = self.held.lock() {
            set.remove(&id);
        }
    }
}

// ---------------------------------------------------------------------------
// MxaLease
// ---------------------------------------------------------------------------

/// Held MXA lease; released when dropped.
pub struct MxaLease<'a> {
    inventory: &'a Inventory,
    mxa_id: i64,
    owner: String,
    registry: Option<LeaseRegistry>,
    released: bool,
}

impl<'a> MxaLease<'a> {
    /// Try once to take the lease for `owner`.
    pub fn try_acquire(
        inventory: &'a Inventory,
        mxa_id: i64,
        owner: &str,
        registry: Option<&LeaseRegistry>,
    ) -> Result<Option<Self>> {
        if !inventory.try_acquire_mxa(mxa_id, owner)? {
            return Ok(None);
        }
        if let Some(r) = registry {
            r.insert(mxa_id);
        }
        Ok(Some(Self {
            inventory,
            mxa_id,
            owner: owner.to_string(),
            registry: registry.cloned(),
            released: false,
        }))
    }

    pub fn mxa_id(&self) -> i64 {
        self.mxa_id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Release now and report failures instead of logging them from `drop`.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        if let Some(r) = &self.registry {
            r.remove(self.mxa_id);
        }
        self.inventory.release_mxa(self.mxa_id, &self.owner)?;
        Ok(())
    }
}

impl Drop for MxaLease<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Some(r) = &self.registry {
            r.remove(self.mxa_id);
        }
        if let Err(e) = self.inventory.release_mxa(self.mxa_id, &self.owner) {
            tracing::error!(mxa = self.mxa_id, error = %e, "failed to release MXA lease");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::tests::seeded;

    #[test]
    fn second_owner_cannot_acquire() {
        let inv = seeded();
        assert!(inv.try_acquire_mxa(1, "run-a").unwrap());
        assert!(!inv.try_acquire_mxa(1, "run-b").unwrap());
        assert!(inv.is_mxa_busy(1).unwrap());
    }

    #[test]
    fn only_owner_releases() {
        let inv = seeded();
        assert!(inv.try_acquire_mxa(1, "run-a").unwrap());
        assert!(!inv.release_mxa(1, "run-b").unwrap());
        assert!(inv.is_mxa_busy(1).unwrap());
        assert!(inv.release_mxa(1, "run-a").unwrap());
        assert!(!inv.is_mxa_busy(1).unwrap());
        assert!(inv.try_acquire_mxa(1, "run-b").unwrap());
    }

    #[test]
    fn legacy_row_with_null_flag_can_be_leased() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("lab.sqlite");
        {
            let conn = rusqlite::Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE mxa (id INTEGER PRIMARY KEY, name TEXT, ip TEXT, port INTEGER,
                 jfw_port INTEGER, mxa_port INTEGER, in_use INTEGER);
                 INSERT INTO mxa (id, name, ip) VALUES (1, 'MXA1', '10.0.0.5');",
            )
            .unwrap();
        }
        let inv = Inventory::open(&path).unwrap();
        assert!(!inv.is_mxa_busy(1).unwrap());
        let lease = MxaLease::try_acquire(&inv, 1, "run-a", None).unwrap();
        assert!(lease.is_some());
        assert!(inv.is_mxa_busy(1).unwrap());
        drop(lease);
        assert!(!inv.is_mxa_busy(1).unwrap());
    }

    #[test]
    fn force_release_clears_owner() {
        let inv = seeded();
        inv.try_acquire_mxa(1, "run-a").unwrap();
        inv.force_release_mxa(1).unwrap();
        let status = &inv.mxa_leases().unwrap()[0];
        assert!(!status.in_use);
        assert_eq!(status.owner, None);
    }

    #[test]
    fn unknown_mxa_is_an_error() {
        let inv = seeded();
        assert!(matches!(
            inv.try_acquire_mxa(7, "run-a"),
            Err(SautoError::RowNotFound { table: "mxa", id: 7 })
        ));
        assert!(inv.force_release_mxa(7).is_err());
    }

    #[test]
    fn guard_releases_on_drop_and_updates_registry() {
        let inv = seeded();
        let registry = LeaseRegistry::default();
        {
            let lease = MxaLease::try_acquire(&inv, 1, "run-a", Some(&registry))
                .unwrap()
                .unwrap();
            assert_eq!(lease.mxa_id(), 1);
            assert_eq!(registry.held(), vec![1]);
            assert!(MxaLease::try_acquire(&inv, 1, "run-b", None)
                .unwrap()
                .is_none());
        }
        assert!(registry.held().is_empty());
        assert!(!inv.is_mxa_busy(1).unwrap());
    }

    #[test]
    fn lease_status_lists_owner() {
        let inv = seeded();
        inv.try_acquire_mxa(1, "run-a").unwrap();
        let status = &inv.mxa_leases().unwrap()[0];
        assert!(status.in_use);
        assert_eq!(status.owner.as_deref(), Some("run-a"));
        assert!(status.acquired_at.is_some());
    }
}
