//! StateStore: redb-backed persistence for the fleet manager.
//!
//! Typed CRUD over clusters and instance requests, plus the conditional
//! updates the workers rely on. Every conditional update runs inside a single
//! write transaction, so the check and the write cannot be interleaved by
//! another writer.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Wakes lock waiters when a lock row is removed.
#[derive(Default)]
pub(crate) struct LockSignal {
    pub(crate) mutex: Mutex<()>,
    pub(crate) released: Condvar,
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    pub(crate) db: Arc<Database>,
    pub(crate) lock_signal: Arc<LockSignal>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            lock_signal: Arc::new(LockSignal::default()),
        }
    }

    /// Create all tables if they don't exist yet. Lock rows left behind by a
    /// previous process are dropped: locks never outlive their holder.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        txn.open_table(INSTANCE_REQUESTS).map_err(map_err!(Table))?;
        txn.open_table(LEADER_LEASES).map_err(map_err!(Table))?;
        {
            let mut locks = txn.open_table(LOCKS).map_err(map_err!(Table))?;
            locks.retain(|_, _| false).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Clusters ───────────────────────────────────────────────────

    /// Insert or replace a cluster row.
    pub fn put_cluster(&self, cluster: &Cluster) -> StateResult<()> {
        let key = cluster.table_key();
        let value = serde_json::to_vec(cluster).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cluster_id = %key, status = %cluster.status, "cluster stored");
        Ok(())
    }

    /// Insert a cluster unless a row with the same cluster id exists.
    /// Returns true if the row was inserted.
    pub fn insert_cluster_if_absent(&self, cluster: &Cluster) -> StateResult<bool> {
        let key = cluster.table_key();
        let value = serde_json::to_vec(cluster).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let inserted;
        {
            let mut table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            let exists = table.get(key).map_err(map_err!(Read))?.is_some();
            if !exists {
                table
                    .insert(key, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            inserted = !exists;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cluster_id = %key, inserted, "cluster registration");
        Ok(inserted)
    }

    /// Get a cluster by its cluster id, soft-deleted rows included.
    pub fn get_cluster(&self, cluster_id: &str) -> StateResult<Option<Cluster>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        read_json(&table, cluster_id)
    }

    /// List all clusters that have not been soft-deleted.
    pub fn list_clusters(&self) -> StateResult<Vec<Cluster>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        let clusters: Vec<Cluster> = scan_json(&table)?;
        Ok(clusters.into_iter().filter(|c| !c.is_deleted()).collect())
    }

    /// List live clusters whose status is one of `statuses`.
    pub fn list_clusters_by_status(&self, statuses: &[ClusterStatus]) -> StateResult<Vec<Cluster>> {
        Ok(self
            .list_clusters()?
            .into_iter()
            .filter(|c| statuses.contains(&c.status))
            .collect())
    }

    /// Apply `f` to a cluster if its current status is in `from` (an empty
    /// slice accepts any status). Returns the updated row, or `None` when the
    /// cluster is missing, soft-deleted, or in another status.
    pub fn update_cluster_if<F>(
        &self,
        cluster_id: &str,
        from: &[ClusterStatus],
        f: F,
    ) -> StateResult<Option<Cluster>>
    where
        F: FnOnce(&mut Cluster),
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            let current: Option<Cluster> = read_json(&table, cluster_id)?;
            updated = match current {
                Some(mut cluster)
                    if !cluster.is_deleted()
                        && (from.is_empty() || from.contains(&cluster.status)) =>
                {
                    f(&mut cluster);
                    cluster.cluster_id = cluster_id.to_string();
                    cluster.updated_at = epoch_secs();
                    let value = serde_json::to_vec(&cluster).map_err(map_err!(Serialize))?;
                    table
                        .insert(cluster_id, value.as_slice())
                        .map_err(map_err!(Write))?;
                    Some(cluster)
                }
                _ => None,
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    /// Move a cluster to `to` if it is currently in one of `from`.
    /// Reaching `ready` for the first time stamps `ready_at`.
    pub fn transition_cluster(
        &self,
        cluster_id: &str,
        from: &[ClusterStatus],
        to: ClusterStatus,
    ) -> StateResult<bool> {
        let updated = self.update_cluster_if(cluster_id, from, |cluster| {
            cluster.status = to;
            if to == ClusterStatus::Ready && cluster.ready_at.is_none() {
                cluster.ready_at = Some(epoch_secs());
            }
        })?;
        if updated.is_some() {
            debug!(%cluster_id, status = %to, "cluster transitioned");
        }
        Ok(updated.is_some())
    }

    /// Move a cluster from one of `from` to `to` only if no live instance
    /// request is assigned to it. The emptiness check and the write share one
    /// transaction, so a concurrent placement cannot slip in between.
    pub fn transition_cluster_if_empty(
        &self,
        cluster_id: &str,
        from: &[ClusterStatus],
        to: ClusterStatus,
    ) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let moved;
        {
            let mut clusters = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            let requests = txn.open_table(INSTANCE_REQUESTS).map_err(map_err!(Table))?;
            let current: Option<Cluster> = read_json(&clusters, cluster_id)?;
            let assigned: Vec<InstanceRequest> = scan_json(&requests)?;
            let empty = !assigned
                .iter()
                .any(|r| !r.is_deleted() && r.cluster_id.as_deref() == Some(cluster_id));
            moved = match current {
                Some(mut cluster)
                    if empty
                        && !cluster.is_deleted()
                        && (from.is_empty() || from.contains(&cluster.status)) =>
                {
                    cluster.status = to;
                    cluster.updated_at = epoch_secs();
                    let value = serde_json::to_vec(&cluster).map_err(map_err!(Serialize))?;
                    clusters
                        .insert(cluster_id, value.as_slice())
                        .map_err(map_err!(Write))?;
                    true
                }
                _ => false,
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if moved {
            debug!(%cluster_id, status = %to, "empty cluster transitioned");
        }
        Ok(moved)
    }

    /// Mark a cluster as deleted. The row is kept for audit.
    pub fn soft_delete_cluster(&self, cluster_id: &str) -> StateResult<bool> {
        let updated = self.update_cluster_if(cluster_id, &[], |cluster| {
            cluster.deleted_at = Some(epoch_secs());
        })?;
        debug!(%cluster_id, deleted = updated.is_some(), "cluster soft-deleted");
        Ok(updated.is_some())
    }

    // ── Instance requests ──────────────────────────────────────────

    /// Insert a new instance request. Fails if the id is taken.
    pub fn insert_request(&self, request: &InstanceRequest) -> StateResult<()> {
        check_request(request)?;
        let key = request.table_key();
        let value = serde_json::to_vec(request).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INSTANCE_REQUESTS).map_err(map_err!(Table))?;
            if table.get(key).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(key.to_string()));
            }
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(request_id = %key, "instance request stored");
        Ok(())
    }

    /// Insert or replace an instance request.
    pub fn put_request(&self, request: &InstanceRequest) -> StateResult<()> {
        check_request(request)?;
        let key = request.table_key();
        let value = serde_json::to_vec(request).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INSTANCE_REQUESTS).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a request by id, soft-deleted rows included.
    pub fn get_request(&self, request_id: &str) -> StateResult<Option<InstanceRequest>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCE_REQUESTS).map_err(map_err!(Table))?;
        read_json(&table, request_id)
    }

    /// List all requests that have not been soft-deleted.
    pub fn list_requests(&self) -> StateResult<Vec<InstanceRequest>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCE_REQUESTS).map_err(map_err!(Table))?;
        let requests: Vec<InstanceRequest> = scan_json(&table)?;
        Ok(requests.into_iter().filter(|r| !r.is_deleted()).collect())
    }

    /// List live requests whose status is one of `statuses`.
    pub fn list_requests_by_status(
        &self,
        statuses: &[InstanceRequestStatus],
    ) -> StateResult<Vec<InstanceRequest>> {
        Ok(self
            .list_requests()?
            .into_iter()
            .filter(|r| statuses.contains(&r.status))
            .collect())
    }

    /// List live requests assigned to a cluster.
    pub fn list_requests_for_cluster(&self, cluster_id: &str) -> StateResult<Vec<InstanceRequest>> {
        Ok(self
            .list_requests()?
            .into_iter()
            .filter(|r| r.cluster_id.as_deref() == Some(cluster_id))
            .collect())
    }

    /// Apply `f` to a request if its status is in `from` (empty accepts any).
    /// The result must still satisfy the request invariants or nothing is
    /// written and an `Invariant` error is returned.
    pub fn update_request_if<F>(
        &self,
        request_id: &str,
        from: &[InstanceRequestStatus],
        f: F,
    ) -> StateResult<Option<InstanceRequest>>
    where
        F: FnOnce(&mut InstanceRequest),
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(INSTANCE_REQUESTS).map_err(map_err!(Table))?;
            let current: Option<InstanceRequest> = read_json(&table, request_id)?;
            updated = match current {
                Some(mut request)
                    if !request.is_deleted()
                        && (from.is_empty() || from.contains(&request.status)) =>
                {
                    f(&mut request);
                    request.id = request_id.to_string();
                    request.updated_at = epoch_secs();
                    check_request(&request)?;
                    let value = serde_json::to_vec(&request).map_err(map_err!(Serialize))?;
                    table
                        .insert(request_id, value.as_slice())
                        .map_err(map_err!(Write))?;
                    Some(request)
                }
                _ => None,
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    /// Move a request to `to` if it is currently in one of `from`.
    pub fn transition_request(
        &self,
        request_id: &str,
        from: &[InstanceRequestStatus],
        to: InstanceRequestStatus,
    ) -> StateResult<bool> {
        let updated = self.update_request_if(request_id, from, |request| {
            request.status = to;
        })?;
        if updated.is_some() {
            debug!(%request_id, status = %to, "instance request transitioned");
        }
        Ok(updated.is_some())
    }

    /// Mark a request as deleted. It stops counting toward any capacity.
    pub fn soft_delete_request(&self, request_id: &str) -> StateResult<bool> {
        let updated = self.update_request_if(request_id, &[], |request| {
            request.deleted_at = Some(epoch_secs());
        })?;
        debug!(%request_id, deleted = updated.is_some(), "instance request soft-deleted");
        Ok(updated.is_some())
    }

    // ── Capacity ───────────────────────────────────────────────────

    /// Streaming units held on a cluster, optionally for one instance type.
    pub fn consumed_units(&self, cluster_id: &str, instance_type: Option<&str>) -> StateResult<u32> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCE_REQUESTS).map_err(map_err!(Table))?;
        let requests: Vec<InstanceRequest> = scan_json(&table)?;
        Ok(sum_units(&requests, cluster_id, instance_type))
    }

    /// Streaming units held per cluster and instance type.
    pub fn streaming_units_by_cluster(
        &self,
    ) -> StateResult<HashMap<ClusterId, BTreeMap<String, u32>>> {
        let mut usage: HashMap<ClusterId, BTreeMap<String, u32>> = HashMap::new();
        for request in self.list_requests()? {
            if !request.status.consumes_capacity() {
                continue;
            }
            if let Some(cluster_id) = request.cluster_id {
                *usage
                    .entry(cluster_id)
                    .or_default()
                    .entry(request.instance_type)
                    .or_default() += request.streaming_units;
            }
        }
        Ok(usage)
    }

    /// Place a request onto a cluster if the cluster still has room.
    ///
    /// The consumed-units sum, the capacity check, and the assignment all run
    /// in one write transaction, so concurrent claims can never overfill a
    /// cluster.
    pub fn claim_capacity(&self, claim: &CapacityClaim) -> StateResult<ClaimOutcome> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome;
        {
            let clusters = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            let mut requests = txn.open_table(INSTANCE_REQUESTS).map_err(map_err!(Table))?;

            let request: Option<InstanceRequest> = read_json(&requests, &claim.request_id)?;
            let cluster: Option<Cluster> = read_json(&clusters, &claim.cluster_id)?;

            outcome = match (request, cluster) {
                (None, _) => ClaimOutcome::RequestNotFound,
                (Some(request), _) if request.is_deleted() => ClaimOutcome::RequestNotFound,
                (Some(request), _) if request.cluster_id.is_some() => {
                    ClaimOutcome::AlreadyPlaced(request.cluster_id.unwrap_or_default())
                }
                (Some(_), None) => ClaimOutcome::ClusterNotReady,
                (Some(_), Some(cluster))
                    if cluster.is_deleted()
                        || cluster.status != ClusterStatus::Ready
                        || !cluster.schedulable =>
                {
                    ClaimOutcome::ClusterNotReady
                }
                (Some(mut request), Some(_)) => {
                    let all: Vec<InstanceRequest> = scan_json(&requests)?;
                    let consumed =
                        sum_units(&all, &claim.cluster_id, claim.instance_type.as_deref());
                    if consumed.saturating_add(request.streaming_units) > claim.max_units {
                        ClaimOutcome::InsufficientCapacity {
                            consumed,
                            max_units: claim.max_units,
                        }
                    } else {
                        request.cluster_id = Some(claim.cluster_id.clone());
                        request.placement_id = Some(claim.placement_id.clone());
                        if let Some(next) = claim.next_status {
                            request.status = next;
                        }
                        request.updated_at = epoch_secs();
                        check_request(&request)?;
                        let value = serde_json::to_vec(&request).map_err(map_err!(Serialize))?;
                        requests
                            .insert(claim.request_id.as_str(), value.as_slice())
                            .map_err(map_err!(Write))?;
                        ClaimOutcome::Claimed
                    }
                }
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            request_id = %claim.request_id,
            cluster_id = %claim.cluster_id,
            ?outcome,
            "capacity claim"
        );
        Ok(outcome)
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Read and decode one JSON row.
pub(crate) fn read_json<T, R>(table: &R, key: &str) -> StateResult<Option<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => {
            let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Read and decode every JSON row of a table.
pub(crate) fn scan_json<T, R>(table: &R) -> StateResult<Vec<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
    }
    Ok(results)
}

fn sum_units(requests: &[InstanceRequest], cluster_id: &str, instance_type: Option<&str>) -> u32 {
    requests
        .iter()
        .filter(|r| !r.is_deleted() && r.status.consumes_capacity())
        .filter(|r| r.cluster_id.as_deref() == Some(cluster_id))
        .filter(|r| instance_type.is_none_or(|t| r.instance_type == t))
        .map(|r| r.streaming_units)
        .sum()
}

/// A request past `accepted` that is still alive must know its cluster.
fn check_request(request: &InstanceRequest) -> StateResult<()> {
    if request.status.requires_cluster() && request.cluster_id.is_none() {
        return Err(StateError::Invariant(format!(
            "request {} is {} without a cluster",
            request.id, request.status
        )));
    }
    Ok(())
}
