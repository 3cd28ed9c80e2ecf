use std::sync::Mutex;

use chrono::{DateTime, Utc};
use cronkeep_core::TaskId;
use rusqlite::{types::Type, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, instrument};

use crate::db::init_db;
use crate::error::{Result, SchedulerError};
use crate::types::{StatusRecord, TaskStatus};

/// Repository of status records.
///
/// Every write is a single statement or a single immediate transaction, so a
/// concurrent invocation never observes a half-applied update.
pub trait StatusStore: Send + Sync {
    /// Retrieve a record by task id, returning `None` if it does not exist.
    fn find(&self, task_id: &TaskId) -> Result<Option<StatusRecord>>;

    /// Insert `record` unless a row with the same id already exists, then
    /// return whatever row is stored.
    fn create(&self, record: &StatusRecord) -> Result<StatusRecord>;

    /// Overwrite every field of an existing record.
    fn save(&self, record: &StatusRecord) -> Result<()>;

    /// All records ordered by task id.
    fn list(&self) -> Result<Vec<StatusRecord>>;

    /// Read-modify-write one record atomically. Nothing is written when
    /// `apply` fails.
    fn update(
        &self,
        task_id: &TaskId,
        apply: &mut dyn FnMut(&mut StatusRecord) -> Result<()>,
    ) -> Result<StatusRecord>;

    /// Compare-and-set the exclusive lock: succeeds only when the stored row
    /// is unlocked, and marks it `Checking` in the same statement.
    fn try_lock(&self, task_id: &TaskId, now: DateTime<Utc>) -> Result<bool>;

    /// Return the stored record, creating it from `template` on first sight.
    fn get_or_create(&self, template: &StatusRecord) -> Result<StatusRecord> {
        match self.find(&template.task_id)? {
            Some(existing) => Ok(existing),
            None => self.create(template),
        }
    }
}

const COLUMNS: &str = "task_id, schedule, status, enabled, priority, running_instances,
                       last_checked, last_run, is_locked, locked_at";

/// SQLite-backed store.
///
/// Wraps a single connection in a `Mutex`; separate processes coordinate
/// through SQLite's own write lock.
pub struct SqliteStatusStore {
    db: Mutex<Connection>,
}

impl SqliteStatusStore {
    /// Wrap an open connection, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// A private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    /// Run `sql` against the underlying connection. Used by maintenance tasks.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute_batch(sql)?;
        Ok(())
    }
}

impl StatusStore for SqliteStatusStore {
    #[instrument(skip(self), fields(task_id = %task_id))]
    fn find(&self, task_id: &TaskId) -> Result<Option<StatusRecord>> {
        let db = self.db.lock().unwrap();
        select_one(&db, task_id)
    }

    #[instrument(skip(self, record), fields(task_id = %record.task_id))]
    fn create(&self, record: &StatusRecord) -> Result<StatusRecord> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let inserted = db.execute(
            "INSERT OR IGNORE INTO cron_task_status
             (task_id, schedule, status, enabled, priority, running_instances,
              last_checked, last_run, is_locked, locked_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            rusqlite::params![
                record.task_id.as_str(),
                record.schedule,
                record.status.to_string(),
                record.enabled,
                record.priority.to_string(),
                record.running_instances,
                record.last_checked.map(|t| t.to_rfc3339()),
                record.last_run.map(|t| t.to_rfc3339()),
                record.is_locked,
                record.locked_at.map(|t| t.to_rfc3339()),
                now,
            ],
        )?;
        if inserted == 1 {
            debug!(status = %record.status, "status record created");
        }

        // Read back: another invocation may have inserted first.
        select_one(&db, &record.task_id)?.ok_or_else(|| SchedulerError::TaskNotFound {
            id: record.task_id.to_string(),
        })
    }

    #[instrument(skip(self, record), fields(task_id = %record.task_id, status = %record.status))]
    fn save(&self, record: &StatusRecord) -> Result<()> {
        let db = self.db.lock().unwrap();
        write_row(&db, record)
    }

    fn list(&self) -> Result<Vec<StatusRecord>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {COLUMNS} FROM cron_task_status ORDER BY task_id"
        ))?;
        let rows = stmt.query_map([], row_to_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    #[instrument(skip(self, apply), fields(task_id = %task_id))]
    fn update(
        &self,
        task_id: &TaskId,
        apply: &mut dyn FnMut(&mut StatusRecord) -> Result<()>,
    ) -> Result<StatusRecord> {
        let mut db = self.db.lock().unwrap();
        // IMMEDIATE takes the write lock up front so the read below cannot go stale.
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut record = select_one(&tx, task_id)?.ok_or_else(|| SchedulerError::TaskNotFound {
            id: task_id.to_string(),
        })?;
        apply(&mut record)?;
        write_row(&tx, &record)?;
        tx.commit()?;
        Ok(record)
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    fn try_lock(&self, task_id: &TaskId, now: DateTime<Utc>) -> Result<bool> {
        let now = now.to_rfc3339();
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE cron_task_status
             SET is_locked = 1, status = ?1, locked_at = ?2, updated_at = ?2
             WHERE task_id = ?3 AND is_locked = 0",
            rusqlite::params![TaskStatus::Checking.to_string(), now, task_id.as_str()],
        )?;
        Ok(changed == 1)
    }
}

fn select_one(conn: &Connection, task_id: &TaskId) -> Result<Option<StatusRecord>> {
    let record = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM cron_task_status WHERE task_id = ?1"),
            [task_id.as_str()],
            row_to_record,
        )
        .optional()?;
    Ok(record)
}

fn write_row(conn: &Connection, record: &StatusRecord) -> Result<()> {
    let changed = conn.execute(
        "UPDATE cron_task_status
         SET schedule = ?1, status = ?2, enabled = ?3, priority = ?4,
             running_instances = ?5, last_checked = ?6, last_run = ?7,
             is_locked = ?8, locked_at = ?9, updated_at = ?10
         WHERE task_id = ?11",
        rusqlite::params![
            record.schedule,
            record.status.to_string(),
            record.enabled,
            record.priority.to_string(),
            record.running_instances,
            record.last_checked.map(|t| t.to_rfc3339()),
            record.last_run.map(|t| t.to_rfc3339()),
            record.is_locked,
            record.locked_at.map(|t| t.to_rfc3339()),
            Utc::now().to_rfc3339(),
            record.task_id.as_str(),
        ],
    )?;
    if changed == 0 {
        return Err(SchedulerError::TaskNotFound {
            id: record.task_id.to_string(),
        });
    }
    Ok(())
}

/// Map a SQLite row to a `StatusRecord`.
fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<StatusRecord> {
    Ok(StatusRecord {
        task_id: TaskId(row.get(0)?),
        schedule: row.get(1)?,
        status: parse_text(row, 2)?,
        enabled: row.get(3)?,
        priority: parse_text(row, 4)?,
        running_instances: row.get(5)?,
        last_checked: parse_timestamp(row, 6)?,
        last_run: parse_timestamp(row, 7)?,
        is_locked: row.get(8)?,
        locked_at: parse_timestamp(row, 9)?,
    })
}

fn parse_text<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn parse_timestamp(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}
