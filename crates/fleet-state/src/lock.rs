//! Named mutual-exclusion locks shared by every process on the same database.
//!
//! A lock is held while a row keyed by a stable hash of its name exists in
//! the `locks` table. Insertion happens in a write transaction that first
//! checks for the row, so at most one handle can hold a name at a time.
//! Waiters park on a condition variable that is signalled on release, with a
//! short timeout so they also notice releases made through another store
//! handle.

use std::marker::PhantomData;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::store::{StateStore, read_json};
use crate::tables::LOCKS;
use crate::types::{LockRow, epoch_millis, new_id};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Stable key of a lock name: the same name always maps to the same row.
pub fn lock_key(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    hex::encode(&digest[..8])
}

/// A handle on a named lock.
///
/// Dropping the handle while it holds the lock releases it. The handle is
/// neither `Send` nor `Sync`: a lock is released by the thread that took it,
/// and cannot be carried across an `.await` in a spawned task.
pub struct DistributedLock {
    store: StateStore,
    name: String,
    key: String,
    token: Option<String>,
    _not_send: PhantomData<*const ()>,
}

impl DistributedLock {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_held(&self) -> bool {
        self.token.is_some()
    }

    /// Block until the lock is acquired.
    pub fn lock(&mut self) -> StateResult<()> {
        if self.token.is_some() {
            return Err(StateError::LockAlreadyHeld(self.name.clone()));
        }
        let token = new_id();
        loop {
            if self.try_insert(&token)? {
                debug!(lock = %self.name, "lock acquired");
                self.token = Some(token);
                return Ok(());
            }
            let guard = self
                .store
                .lock_signal
                .mutex
                .lock()
                .map_err(|_| StateError::LockPoisoned)?;
            let _ = self
                .store
                .lock_signal
                .released
                .wait_timeout(guard, POLL_INTERVAL)
                .map_err(|_| StateError::LockPoisoned)?;
        }
    }

    /// Acquire the lock only if it is free right now.
    pub fn try_lock(&mut self) -> StateResult<bool> {
        if self.token.is_some() {
            return Err(StateError::LockAlreadyHeld(self.name.clone()));
        }
        let token = new_id();
        if self.try_insert(&token)? {
            self.token = Some(token);
            return Ok(true);
        }
        Ok(false)
    }

    /// Release the lock. Fails if this handle does not hold it.
    pub fn unlock(&mut self) -> StateResult<()> {
        let Some(token) = self.token.take() else {
            return Err(StateError::LockNotHeld(self.name.clone()));
        };
        self.remove_row(&token)?;
        debug!(lock = %self.name, "lock released");
        // Wake waiters on this store; the mutex makes sure none of them is
        // between its failed insert and its wait.
        let _guard = self
            .store
            .lock_signal
            .mutex
            .lock()
            .map_err(|_| StateError::LockPoisoned)?;
        self.store.lock_signal.released.notify_all();
        Ok(())
    }

    fn try_insert(&self, token: &str) -> StateResult<bool> {
        let db = &self.store.db;
        let txn = db.begin_write().map_err(map_err!(Transaction))?;
        let inserted;
        {
            let mut table = txn.open_table(LOCKS).map_err(map_err!(Table))?;
            let held: Option<LockRow> = read_json(&table, &self.key)?;
            inserted = held.is_none();
            if inserted {
                let row = LockRow {
                    name: self.name.clone(),
                    holder: token.to_string(),
                    acquired_at_ms: epoch_millis(),
                };
                let value = serde_json::to_vec(&row).map_err(map_err!(Serialize))?;
                table
                    .insert(self.key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(inserted)
    }

    fn remove_row(&self, token: &str) -> StateResult<()> {
        let txn = self.store.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(LOCKS).map_err(map_err!(Table))?;
            let held: Option<LockRow> = read_json(&table, &self.key)?;
            match held {
                Some(row) if row.holder == token => {
                    table.remove(self.key.as_str()).map_err(map_err!(Write))?;
                }
                _ => return Err(StateError::LockNotHeld(self.name.clone())),
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

impl Drop for DistributedLock {
    fn drop(&mut self) {
        if self.token.is_none() {
            return;
        }
        if let Err(e) = self.unlock() {
            warn!(lock = %self.name, error = %e, "failed to release lock on drop");
        }
    }
}

/// Scoped hold on a named lock, released when dropped (unwinding included).
pub struct LockGuard {
    lock: DistributedLock,
}

impl LockGuard {
    pub fn name(&self) -> &str {
        self.lock.name()
    }

    /// Release now instead of at the end of scope, surfacing release errors.
    pub fn release(mut self) -> StateResult<()> {
        self.lock.unlock()
    }
}

impl StateStore {
    /// A handle on the named lock. Creating the handle does not acquire it.
    pub fn distributed_lock(&self, name: &str) -> DistributedLock {
        DistributedLock {
            store: self.clone(),
            name: name.to_string(),
            key: lock_key(name),
            token: None,
            _not_send: PhantomData,
        }
    }

    /// Block until the named lock is held and return a guard for it.
    pub fn lock_guard(&self, name: &str) -> StateResult<LockGuard> {
        let mut lock = self.distributed_lock(name);
        lock.lock()?;
        Ok(LockGuard { lock })
    }

    /// Run `f` while holding the named lock. The lock is released when `f`
    /// returns or panics.
    pub fn with_lock<R, F>(&self, name: &str, f: F) -> StateResult<R>
    where
        F: FnOnce() -> R,
    {
        let guard = self.lock_guard(name)?;
        let result = f();
        guard.release()?;
        Ok(result)
    }
}
