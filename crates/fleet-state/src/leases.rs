//! Leader leases: one row per role, naming the holder and its expiry.

use redb::{ReadableDatabase, ReadableTable};
use tracing::{debug, info};

use crate::error::StateResult;
use crate::store::{StateStore, read_json};
use crate::tables::LEADER_LEASES;
use crate::types::{LeaderLease, LeaseAcquisition};

impl StateStore {
    /// Try to become (or stay) the leader of `role`.
    ///
    /// - no lease, or an expired one: `holder` takes it until `now + ttl`
    /// - already held by `holder`: extended only when it expires within
    ///   `renew_window_ms`, otherwise kept untouched
    /// - held by someone else and not expired: nothing changes
    pub fn acquire_lease(
        &self,
        role: &str,
        holder: &str,
        now_ms: u64,
        ttl_ms: u64,
        renew_window_ms: u64,
    ) -> StateResult<LeaseAcquisition> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let result;
        {
            let mut table = txn.open_table(LEADER_LEASES).map_err(map_err!(Table))?;
            let current: Option<LeaderLease> = read_json(&table, role)?;

            let (acquired, lease, dirty) = match current {
                Some(lease) if lease.holder == holder => {
                    if lease.expires_at_ms.saturating_sub(now_ms) <= renew_window_ms {
                        let renewed = LeaderLease {
                            expires_at_ms: now_ms + ttl_ms,
                            ..lease
                        };
                        (true, renewed, true)
                    } else {
                        (true, lease, false)
                    }
                }
                Some(lease) if !lease.is_expired(now_ms) => (false, lease, false),
                _ => {
                    let lease = LeaderLease {
                        role: role.to_string(),
                        holder: holder.to_string(),
                        expires_at_ms: now_ms + ttl_ms,
                    };
                    (true, lease, true)
                }
            };

            if dirty {
                let value = serde_json::to_vec(&lease).map_err(map_err!(Serialize))?;
                table
                    .insert(role, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            result = LeaseAcquisition { acquired, lease };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            %role,
            %holder,
            acquired = result.acquired,
            expires_at_ms = result.lease.expires_at_ms,
            "lease acquisition"
        );
        Ok(result)
    }

    /// Current lease of a role, expired or not.
    pub fn get_lease(&self, role: &str) -> StateResult<Option<LeaderLease>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LEADER_LEASES).map_err(map_err!(Table))?;
        read_json(&table, role)
    }

    /// Give up a lease. Only the holder can release it.
    pub fn release_lease(&self, role: &str, holder: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let released;
        {
            let mut table = txn.open_table(LEADER_LEASES).map_err(map_err!(Table))?;
            let current: Option<LeaderLease> = read_json(&table, role)?;
            released = current.is_some_and(|lease| lease.holder == holder);
            if released {
                table.remove(role).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if released {
            info!(%role, %holder, "lease released");
        }
        Ok(released)
    }

    /// All stored leases.
    pub fn list_leases(&self) -> StateResult<Vec<LeaderLease>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LEADER_LEASES).map_err(map_err!(Table))?;
        let mut leases = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            leases.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
        }
        Ok(leases)
    }
}
