//! fleet-state: embedded state store for the fleet manager.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for data plane clusters, instance requests, leader leases and
//! named lock rows.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Conditional updates (`update_*_if`, `transition_*`, `claim_capacity`,
//! `acquire_lease`) read and write inside one write transaction; redb
//! serializes write transactions, which makes each of them atomic with
//! respect to every other writer sharing the database.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks and threads.

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| $crate::error::StateError::$variant(e.to_string())
    };
}

pub mod error;
pub mod leases;
pub mod lock;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use lock::{DistributedLock, LockGuard};
pub use store::StateStore;
pub use types::*;
