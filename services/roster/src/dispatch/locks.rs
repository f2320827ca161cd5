//! Per-member serialization.
//!
//! # Key invariants
//! - At most one unit of work per `(organization, member)` runs at a time.
//! - Entries are removed when the last holder or waiter releases them, so the
//!   map only holds members with work in flight.
use crate::model::{MemberId, OrganizationId};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type MemberKey = (OrganizationId, MemberId);

#[derive(Clone, Default)]
pub struct MemberLocks {
    inner: Arc<DashMap<MemberKey, Arc<Mutex<()>>>>,
}

/// Held for the duration of one unit of work.
pub struct MemberGuard {
    // Field order matters: the mutex guard is released before the entry is
    // checked for removal.
    _guard: OwnedMutexGuard<()>,
    _entry: Entry,
}

/// One holder's or waiter's claim on a map entry. Dropping the last claim
/// removes the entry, including when a waiter is cancelled.
struct Entry {
    key: MemberKey,
    locks: Arc<DashMap<MemberKey, Arc<Mutex<()>>>>,
    mutex: Option<Arc<Mutex<()>>>,
}

impl Drop for Entry {
    fn drop(&mut self) {
        self.mutex.take();
        // Only the map still references the mutex: nobody holds or awaits it.
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl MemberLocks {
    pub async fn lock(&self, organization_id: OrganizationId, member_id: MemberId) -> MemberGuard {
        let key = (organization_id, member_id);
        // Clone out of the shard before awaiting so the shard lock is released.
        let mutex = self
            .inner
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let entry = Entry {
            key,
            locks: Arc::clone(&self.inner),
            mutex: Some(Arc::clone(&mutex)),
        };
        let guard = mutex.lock_owned().await;
        MemberGuard {
            _guard: guard,
            _entry: entry,
        }
    }

    /// Members with a lock currently held or awaited.
    pub fn in_flight(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_member_is_serialized() {
        let locks = MemberLocks::default();
        let guard = locks.lock(OrganizationId(1), MemberId(1)).await;

        let contender = locks.clone();
        let waiter = tokio::spawn(async move {
            let _guard = contender.lock(OrganizationId(1), MemberId(1)).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter finishes")
            .expect("join");
        assert_eq!(locks.in_flight(), 0);
    }

    #[tokio::test]
    async fn different_members_do_not_contend() {
        let locks = MemberLocks::default();
        let _first = locks.lock(OrganizationId(1), MemberId(1)).await;
        let second = tokio::time::timeout(
            Duration::from_millis(100),
            locks.lock(OrganizationId(1), MemberId(2)),
        )
        .await;
        assert!(second.is_ok());
        assert_eq!(locks.in_flight(), 2);
    }

    #[tokio::test]
    async fn cancelled_waiter_leaves_no_entry_behind() {
        let locks = MemberLocks::default();
        let guard = locks.lock(OrganizationId(1), MemberId(1)).await;

        let waited = tokio::time::timeout(
            Duration::from_millis(20),
            locks.lock(OrganizationId(1), MemberId(1)),
        )
        .await;
        assert!(waited.is_err());
        assert_eq!(locks.in_flight(), 1);

        drop(guard);
        assert_eq!(locks.in_flight(), 0);
    }
}
