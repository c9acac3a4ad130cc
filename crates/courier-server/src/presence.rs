//! Presence registry.
//!
//! Keeps two views of who is online:
//!
//! - the **live registry** (machine -> connection, user -> machine), held in
//!   memory and used to route events with no I/O;
//! - the **presence snapshot**, a single persisted document mapping every
//!   online user to a [`PresenceRecord`], rewritten wholesale on each change.
//!
//! Conversation creation asks the snapshot ([`PresenceRegistry::is_online`])
//! because it survives restarts; delivery asks the live registry
//! ([`PresenceRegistry::lookup_connection`]). The two agree except while a
//! snapshot write is failing or entries left by a previous process have not
//! been swept yet.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use courier_shared::constants::{PRESENCE_COLLECTION, PRESENCE_SNAPSHOT_KEY};
use courier_shared::{
    ConnectionId, MachineId, PresenceRecord, PresenceSnapshot, PresenceStatus, UserId,
};
use courier_store::{DocumentStore, StoreError};

use crate::connection::ConnectionHandle;

#[derive(Debug, Clone)]
struct MachineEntry {
    connection: ConnectionHandle,
    user_id: UserId,
}

#[derive(Debug, Default)]
struct Registry {
    machines: HashMap<MachineId, MachineEntry>,
    users: HashMap<UserId, MachineId>,
    /// In-memory copy of the persisted snapshot; the next write source.
    snapshot: PresenceSnapshot,
    /// The last snapshot write failed.
    dirty: bool,
}

impl Registry {
    /// Drop `user_id`'s device mapping and presence record, but only if the
    /// user is currently mapped to `machine_id`.
    fn unmap_user_from(&mut self, user_id: &UserId, machine_id: &MachineId) -> bool {
        if self.users.get(user_id) != Some(machine_id) {
            return false;
        }
        self.users.remove(user_id);
        self.snapshot.remove(user_id);
        true
    }
}

/// Live connection counts for the query surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceStats {
    pub live_connections: usize,
    pub known_users: usize,
}

pub struct PresenceRegistry {
    store: Arc<DocumentStore>,
    inner: RwLock<Registry>,
}

impl PresenceRegistry {
    /// Empty registry. Any snapshot already on disk is overwritten by the
    /// first change.
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self {
            store,
            inner: RwLock::new(Registry::default()),
        }
    }

    /// Registry seeded with the persisted snapshot, so users recorded by a
    /// previous process stay visible to [`Self::is_online`] until they
    /// re-register, log off or are swept.
    pub async fn load(store: Arc<DocumentStore>) -> Self {
        let mut registry = Registry::default();

        match store
            .get::<PresenceSnapshot>(PRESENCE_COLLECTION, PRESENCE_SNAPSHOT_KEY)
            .await
        {
            Ok(Some(snapshot)) => {
                if !snapshot.is_empty() {
                    info!(
                        users = snapshot.len(),
                        "Restored presence snapshot without live connections"
                    );
                }
                registry.snapshot = snapshot;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Could not read presence snapshot, starting empty");
                registry.dirty = true;
            }
        }

        Self {
            store,
            inner: RwLock::new(registry),
        }
    }

    /// Register `user_id` on `machine_id` with `connection`.
    ///
    /// Whatever was mapped to the machine or the user before is replaced.
    /// A superseded connection is not closed; it simply stops being
    /// reachable through the registry.
    pub async fn set_online(
        &self,
        user_id: UserId,
        machine_id: MachineId,
        connection: ConnectionHandle,
    ) -> PresenceRecord {
        let _section = self.snapshot_section().await;

        let (record, snapshot) = {
            let mut reg = self.inner.write().await;
            let conn_id = connection.id();

            // One connection carries one identity: drop what it registered elsewhere.
            let stale: Vec<MachineId> = reg
                .machines
                .iter()
                .filter(|(machine, entry)| entry.connection.id() == conn_id && **machine != machine_id)
                .map(|(machine, _)| machine.clone())
                .collect();
            for machine in stale {
                if let Some(entry) = reg.machines.remove(&machine) {
                    if entry.user_id != user_id && reg.unmap_user_from(&entry.user_id, &machine) {
                        debug!(
                            user = %entry.user_id,
                            machine = %machine,
                            conn = %conn_id.short(),
                            "Connection re-registered, previous identity dropped"
                        );
                    }
                }
            }

            let previous = reg.machines.insert(
                machine_id.clone(),
                MachineEntry {
                    connection,
                    user_id: user_id.clone(),
                },
            );
            if let Some(previous) = previous {
                if previous.connection.id() != conn_id {
                    info!(
                        machine = %machine_id,
                        old_conn = %previous.connection.id().short(),
                        new_conn = %conn_id.short(),
                        "Machine re-registered, previous connection superseded"
                    );
                }
                // Another user on this device must not resolve to the new connection.
                if previous.user_id != user_id && reg.unmap_user_from(&previous.user_id, &machine_id)
                {
                    debug!(
                        user = %previous.user_id,
                        machine = %machine_id,
                        "Previous user of machine dropped from presence"
                    );
                }
            }

            if let Some(old_machine) = reg.users.insert(user_id.clone(), machine_id.clone()) {
                if old_machine != machine_id {
                    debug!(user = %user_id, from = %old_machine, to = %machine_id, "User moved machines");
                }
            }

            let record = PresenceRecord {
                user_id: user_id.clone(),
                machine_id: machine_id.clone(),
                connection_handle_id: conn_id,
                last_seen: Utc::now(),
                status: PresenceStatus::Online,
            };
            reg.snapshot.insert(user_id, record.clone());
            (record, reg.snapshot.clone())
        };

        self.persist(&snapshot).await;
        info!(user = %record.user_id, machine = %record.machine_id, "User online");
        record
    }

    /// Remove `user_id` from presence. Returns whether anything was removed;
    /// calling it again is a no-op.
    pub async fn set_offline(&self, user_id: &UserId, machine_id: &MachineId) -> bool {
        let _section = self.snapshot_section().await;

        let snapshot = {
            let mut reg = self.inner.write().await;
            let mut removed = false;

            if let Some(mapped) = reg.users.remove(user_id) {
                removed = true;
                if reg.machines.get(&mapped).is_some_and(|e| &e.user_id == user_id) {
                    reg.machines.remove(&mapped);
                }
            }
            if reg.machines.get(machine_id).is_some_and(|e| &e.user_id == user_id) {
                reg.machines.remove(machine_id);
                removed = true;
            }
            if reg.snapshot.remove(user_id).is_some() {
                removed = true;
            }

            if !removed {
                return false;
            }
            reg.snapshot.clone()
        };

        self.persist(&snapshot).await;
        info!(user = %user_id, machine = %machine_id, "User offline");
        true
    }

    /// Live connection for `user_id`, in-memory only.
    pub async fn lookup_connection(&self, user_id: &UserId) -> Option<ConnectionHandle> {
        let reg = self.inner.read().await;
        let machine_id = reg.users.get(user_id)?;
        reg.machines
            .get(machine_id)
            .filter(|entry| &entry.user_id == user_id)
            .map(|entry| entry.connection.clone())
    }

    /// Whether `user_id` has a live device mapping.
    pub async fn is_registered(&self, user_id: &UserId) -> bool {
        self.inner.read().await.users.contains_key(user_id)
    }

    /// Whether the persisted snapshot lists `user_id` as online.
    pub async fn is_online(&self, user_id: &UserId) -> Result<bool, StoreError> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot
            .get(user_id)
            .is_some_and(|record| record.status == PresenceStatus::Online))
    }

    /// The persisted presence snapshot.
    pub async fn snapshot(&self) -> Result<PresenceSnapshot, StoreError> {
        Ok(self
            .store
            .get::<PresenceSnapshot>(PRESENCE_COLLECTION, PRESENCE_SNAPSHOT_KEY)
            .await?
            .unwrap_or_default())
    }

    /// The (machine, user) pair currently bound to `conn_id`, if that user is
    /// still mapped to the machine.
    pub async fn find_by_connection(&self, conn_id: ConnectionId) -> Option<(MachineId, UserId)> {
        let reg = self.inner.read().await;
        reg.machines
            .iter()
            .find(|(_, entry)| entry.connection.id() == conn_id)
            .filter(|(machine_id, entry)| reg.users.get(&entry.user_id) == Some(*machine_id))
            .map(|(machine_id, entry)| (machine_id.clone(), entry.user_id.clone()))
    }

    /// Drop the mapping bound to `conn_id`.
    ///
    /// Returns the (machine, user) pair whose presence was cleared. A handle
    /// that was already superseded or never registered changes nothing.
    pub async fn remove_by_connection(&self, conn_id: ConnectionId) -> Option<(MachineId, UserId)> {
        let _section = self.snapshot_section().await;

        let (pair, snapshot) = {
            let mut reg = self.inner.write().await;
            let machine_id = reg
                .machines
                .iter()
                .find(|(_, entry)| entry.connection.id() == conn_id)
                .map(|(machine_id, _)| machine_id.clone())?;
            let entry = reg.machines.remove(&machine_id)?;

            if !reg.unmap_user_from(&entry.user_id, &machine_id) {
                debug!(
                    machine = %machine_id,
                    conn = %conn_id.short(),
                    "Removed orphaned machine mapping"
                );
                return None;
            }
            ((machine_id, entry.user_id), reg.snapshot.clone())
        };

        self.persist(&snapshot).await;
        info!(user = %pair.1, machine = %pair.0, "User disconnected");
        Some(pair)
    }

    pub async fn stats(&self) -> PresenceStats {
        let reg = self.inner.read().await;
        PresenceStats {
            live_connections: reg.machines.len(),
            known_users: reg.users.len(),
        }
    }

    /// Maintenance pass: prune snapshot records that have no live mapping
    /// and were last seen more than `stale_after` ago, and retry a failed
    /// snapshot write. Returns the number of records pruned.
    pub async fn sweep(&self, stale_after: Duration) -> usize {
        let _section = self.snapshot_section().await;

        let (pruned, snapshot) = {
            let mut guard = self.inner.write().await;
            let Registry {
                users,
                snapshot,
                dirty,
                ..
            } = &mut *guard;

            let now = Utc::now();
            let before = snapshot.len();
            snapshot.retain(|user_id, record| {
                if users.contains_key(user_id) {
                    return true;
                }
                match now.signed_duration_since(record.last_seen).to_std() {
                    Ok(age) => age < stale_after,
                    // Clock went backwards; keep it.
                    Err(_) => true,
                }
            });
            let pruned = before - snapshot.len();

            if pruned == 0 && !*dirty {
                return 0;
            }
            (pruned, snapshot.clone())
        };

        if self.persist(&snapshot).await && pruned > 0 {
            info!(pruned, "Pruned stale presence records");
        }
        pruned
    }

    async fn snapshot_section(&self) -> tokio::sync::OwnedMutexGuard<()> {
        self.store
            .lock(PRESENCE_COLLECTION, PRESENCE_SNAPSHOT_KEY)
            .await
    }

    /// Write the snapshot. On failure the in-memory registry stays
    /// authoritative and the write is retried by the next sweep.
    async fn persist(&self, snapshot: &PresenceSnapshot) -> bool {
        let result = self
            .store
            .put(PRESENCE_COLLECTION, PRESENCE_SNAPSHOT_KEY, snapshot)
            .await;
        let ok = result.is_ok();
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist presence snapshot, keeping in-memory state");
        }
        self.inner.write().await.dirty = !ok;
        ok
    }
}
