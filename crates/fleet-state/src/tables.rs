//! redb table definitions for the fleet state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Data plane clusters keyed by `{cluster_id}`.
pub const CLUSTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("clusters");

/// Instance requests keyed by `{request_id}`.
pub const INSTANCE_REQUESTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("instance_requests");

/// Leader leases keyed by `{role}`.
pub const LEADER_LEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("leader_leases");

/// Named lock rows keyed by the stable hash of the lock name.
pub const LOCKS: TableDefinition<&str, &[u8]> = TableDefinition::new("locks");
