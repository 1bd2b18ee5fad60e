// src/store/locks.rs

//! Exclusive per-record edit locks, held on behalf of a connection.

use crate::connection::ConnectionId;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

#[derive(Debug, Default)]
pub struct EditLocks {
    held: DashMap<u64, ConnectionId>,
}

impl EditLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the lock on `record` for `conn`. Re-acquiring a lock already
    /// held by `conn` succeeds. On conflict returns the current holder.
    pub fn acquire(&self, record: u64, conn: ConnectionId) -> Result<(), ConnectionId> {
        match self.held.entry(record) {
            Entry::Occupied(e) if *e.get() == conn => Ok(()),
            Entry::Occupied(e) => Err(*e.get()),
            Entry::Vacant(e) => {
                e.insert(conn);
                Ok(())
            }
        }
    }

    /// Releases `record` if `conn` holds it.
    pub fn release(&self, record: u64, conn: ConnectionId) -> bool {
        self.held
            .remove_if(&record, |_, holder| *holder == conn)
            .is_some()
    }

    /// Drops a lock whatever its holder, e.g. when the record is deleted.
    pub fn forget(&self, record: u64) {
        self.held.remove(&record);
    }

    pub fn holder(&self, record: u64) -> Option<ConnectionId> {
        self.held.get(&record).map(|h| *h)
    }

    /// Fails if someone other than `conn` holds `record`.
    pub fn check_free_for(&self, record: u64, conn: ConnectionId) -> Result<(), ConnectionId> {
        match self.holder(record) {
            Some(holder) if holder != conn => Err(holder),
            _ => Ok(()),
        }
    }

    /// Releases every lock held by `conn`. Returns how many were released.
    pub fn release_all(&self, conn: ConnectionId) -> usize {
        let mut released = 0;
        self.held.retain(|_, holder| {
            if *holder == conn {
                released += 1;
                false
            } else {
                true
            }
        });
        released
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}
