use std::sync::Arc;

use tracing::debug;

use crate::clock::Clock;
use crate::error::Result;
use crate::store::StatusStore;
use crate::types::{StatusRecord, TaskStatus};

/// Per-task mutual exclusion across overlapping invocations.
///
/// The lock lives on the status row itself, so it survives process exits and
/// is visible to every invocation sharing the database.
pub struct LockManager {
    store: Arc<dyn StatusStore>,
    clock: Arc<dyn Clock>,
}

impl LockManager {
    pub fn new(store: Arc<dyn StatusStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Take the exclusive lock on `record`'s task.
    ///
    /// Returns `Ok(false)` without touching anything when another invocation
    /// already holds it. On success the stored row and `record` both show
    /// `Checking` and locked.
    pub fn lock(&self, record: &mut StatusRecord) -> Result<bool> {
        if record.is_locked {
            return Ok(false);
        }
        let now = self.clock.now();
        if !self.store.try_lock(&record.task_id, now)? {
            debug!(task_id = %record.task_id, "lock held by another invocation");
            return Ok(false);
        }
        record.is_locked = true;
        record.status = TaskStatus::Checking;
        record.locked_at = Some(now);
        Ok(true)
    }

    /// Release the lock and force the record back to `Pending`, whatever
    /// state the owning invocation left it in.
    pub fn unlock(&self, record: &mut StatusRecord) -> Result<()> {
        *record = self
            .store
            .update(&record.task_id, &mut |rec: &mut StatusRecord| {
                rec.is_locked = false;
                rec.locked_at = None;
                rec.status = TaskStatus::Pending;
                Ok(())
            })?;
        debug!(task_id = %record.task_id, "lock released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::store::SqliteStatusStore;
    use crate::types::TaskPolicy;
    use rusqlite::Connection;

    fn pending(id: &str) -> StatusRecord {
        StatusRecord::new(
            id.into(),
            "* * * * *",
            TaskStatus::Pending,
            &TaskPolicy::default(),
        )
    }

    #[test]
    fn second_lock_without_unlock_fails() {
        let store = Arc::new(SqliteStatusStore::open_in_memory().unwrap());
        let locks = LockManager::new(store.clone(), Arc::new(SystemClock));
        let mut first = store.create(&pending("job")).unwrap();
        let mut second = first.clone();

        assert!(locks.lock(&mut first).unwrap());
        assert!(!locks.lock(&mut second).unwrap());
        // The loser's copy is untouched.
        assert_eq!(second.status, TaskStatus::Pending);
        assert!(!second.is_locked);
        // Locking an already-locked copy is refused without a round trip.
        assert!(!locks.lock(&mut first).unwrap());
    }

    #[test]
    fn unlock_always_returns_to_pending() {
        let store = Arc::new(SqliteStatusStore::open_in_memory().unwrap());
        let locks = LockManager::new(store.clone(), Arc::new(SystemClock));
        let mut rec = store.create(&pending("job")).unwrap();

        assert!(locks.lock(&mut rec).unwrap());
        let mut stored = store.find(&rec.task_id).unwrap().unwrap();
        stored.status = TaskStatus::Running;
        store.save(&stored).unwrap();

        locks.unlock(&mut rec).unwrap();
        assert_eq!(rec.status, TaskStatus::Pending);
        assert!(!rec.is_locked);
        assert!(rec.locked_at.is_none());
        assert_eq!(store.find(&rec.task_id).unwrap().unwrap(), rec);

        // The task can be locked again once released.
        assert!(locks.lock(&mut rec).unwrap());
    }

    #[test]
    fn lock_excludes_across_connections_to_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.db");
        let open = || {
            let conn = Connection::open(&path).unwrap();
            crate::db::configure_connection(&conn, 2_000).unwrap();
            Arc::new(SqliteStatusStore::new(conn).unwrap())
        };
        let a = open();
        let b = open();
        let locks_a = LockManager::new(a.clone(), Arc::new(SystemClock));
        let locks_b = LockManager::new(b.clone(), Arc::new(SystemClock));

        let mut rec_a = a.create(&pending("job")).unwrap();
        let mut rec_b = b.get_or_create(&pending("job")).unwrap();

        assert!(locks_a.lock(&mut rec_a).unwrap());
        assert!(!locks_b.lock(&mut rec_b).unwrap());

        locks_a.unlock(&mut rec_a).unwrap();
        let mut fresh_b = b.find(&rec_b.task_id).unwrap().unwrap();
        assert!(locks_b.lock(&mut fresh_b).unwrap());
    }
}
