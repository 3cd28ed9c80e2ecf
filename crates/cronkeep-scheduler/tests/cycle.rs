use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use cronkeep_core::{TaskId, Verbosity};
use cronkeep_scheduler::{
    BufferSink, Clock, CronTask, FixedClock, Outcome, SqliteStatusStore, StatusAdmin,
    StatusStore, TaskPolicy, TaskRegistry, TaskRunner, TaskStatus,
};

struct Counter {
    schedule: &'static str,
    hits: Arc<AtomicUsize>,
    allow_multiple_instances: bool,
}

#[async_trait]
impl CronTask for Counter {
    fn schedule(&self) -> String {
        self.schedule.to_string()
    }

    fn policy(&self) -> TaskPolicy {
        TaskPolicy {
            max_execution_time: Duration::from_secs(300),
            allow_multiple_instances: self.allow_multiple_instances,
            ..TaskPolicy::default()
        }
    }

    async fn process(&self) -> anyhow::Result<()> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    store: Arc<SqliteStatusStore>,
    clock: Arc<FixedClock>,
    registry: Arc<TaskRegistry>,
    runner: TaskRunner,
    hits: Arc<AtomicUsize>,
}

impl Harness {
    fn new(schedule: &'static str, allow_multiple_instances: bool) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registry = TaskRegistry::new();
        registry
            .register_instance(
                "job",
                Arc::new(Counter {
                    schedule,
                    hits: hits.clone(),
                    allow_multiple_instances,
                }),
            )
            .unwrap();
        let registry = Arc::new(registry);
        let store = Arc::new(SqliteStatusStore::open_in_memory().unwrap());
        let clock = Arc::new(FixedClock::new(at(20, 0, 0, 0)));
        let runner = TaskRunner::new(registry.clone(), store.clone(), clock.clone())
            .with_initial_status(TaskStatus::Pending);
        Self {
            store,
            clock,
            registry,
            runner,
            hits,
        }
    }

    async fn cycle_at(&self, now: DateTime<Utc>) -> Outcome {
        self.clock.set(now);
        let report = self
            .runner
            .run_cycle(&BufferSink::new(), Verbosity::Debug)
            .await
            .unwrap();
        report.outcome_for(&job()).cloned().unwrap()
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn at(d: u32, h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2010, 6, d, h, m, s).unwrap()
}

fn job() -> TaskId {
    TaskId::new("job")
}

#[tokio::test]
async fn hourly_schedule_replay() {
    let h = Harness::new("0 * * * *", false);

    let steps = [
        (at(20, 13, 0, 10), 1), // first sight, matching minute
        (at(20, 13, 0, 40), 1), // second trigger in the same minute
        (at(20, 13, 40, 0), 1), // between occurrences
        (at(20, 14, 10, 0), 2), // 14:00 was missed, recovered
        (at(20, 15, 0, 0), 3),  // on time
        (at(21, 13, 40, 0), 4), // after a long outage, once
    ];
    for (now, expected) in steps {
        h.cycle_at(now).await;
        assert_eq!(h.hits(), expected, "at {now}");
        let rec = h.store.find(&job()).unwrap().unwrap();
        assert_eq!(rec.status, TaskStatus::Pending);
        assert!(!rec.is_locked);
        assert_eq!(rec.last_checked, Some(now));
    }
}

#[tokio::test]
async fn locked_task_is_skipped() {
    let h = Harness::new("* * * * *", false);
    h.cycle_at(at(20, 13, 0, 0)).await;
    assert_eq!(h.hits(), 1);

    // Another invocation takes the lock in the next minute.
    assert!(h.store.try_lock(&job(), at(20, 13, 1, 0)).unwrap());

    let outcome = h.cycle_at(at(20, 13, 1, 5)).await;
    assert_eq!(outcome, Outcome::SkippedLocked);
    assert_eq!(h.hits(), 1);
    let rec = h.store.find(&job()).unwrap().unwrap();
    assert!(rec.is_locked);
    assert_eq!(rec.status, TaskStatus::Checking);
}

#[tokio::test]
async fn stuck_run_is_escalated_then_reset() {
    let h = Harness::new("* * * * *", false);
    h.cycle_at(at(20, 13, 0, 0)).await;

    // An invocation that crashed mid-run at 13:01 left the row behind.
    let mut rec = h.store.find(&job()).unwrap().unwrap();
    rec.status = TaskStatus::Running;
    rec.is_locked = true;
    rec.running_instances = 1;
    rec.last_run = Some(at(20, 13, 1, 0));
    h.store.save(&rec).unwrap();

    // Within the limit the run is left alone.
    assert_eq!(h.cycle_at(at(20, 13, 4, 0)).await, Outcome::SkippedLocked);

    let outcome = h.cycle_at(at(20, 13, 7, 0)).await;
    assert_eq!(
        outcome,
        Outcome::Stuck {
            since: Some(at(20, 13, 1, 0))
        }
    );
    let rec = h.store.find(&job()).unwrap().unwrap();
    assert_eq!(rec.status, TaskStatus::Error);
    assert!(!rec.is_locked);

    assert_eq!(
        h.cycle_at(at(20, 13, 8, 0)).await,
        Outcome::SkippedError { reason: None }
    );
    assert_eq!(h.hits(), 1);

    let admin = StatusAdmin::new(h.store.clone(), h.registry.clone(), h.clock.clone());
    admin.reset(&job()).unwrap();
    assert!(matches!(
        h.cycle_at(at(20, 13, 9, 0)).await,
        Outcome::Ran { .. }
    ));
    assert_eq!(h.hits(), 2);
}

#[tokio::test]
async fn lingering_check_is_measured_from_lock_time() {
    let h = Harness::new("* * * * *", false);
    h.cycle_at(at(20, 13, 0, 0)).await;

    // A check locked at 13:01 never finished; last_run is much older.
    let mut rec = h.store.find(&job()).unwrap().unwrap();
    rec.status = TaskStatus::Checking;
    rec.is_locked = true;
    rec.locked_at = Some(at(20, 13, 1, 0));
    rec.last_run = Some(at(20, 12, 0, 0));
    h.store.save(&rec).unwrap();

    assert_eq!(h.cycle_at(at(20, 13, 4, 0)).await, Outcome::SkippedLocked);

    assert_eq!(
        h.cycle_at(at(20, 13, 7, 0)).await,
        Outcome::Stuck {
            since: Some(at(20, 13, 1, 0))
        }
    );
    let rec = h.store.find(&job()).unwrap().unwrap();
    assert_eq!(rec.status, TaskStatus::Error);
    assert!(!rec.is_locked);
    assert_eq!(h.hits(), 1);
}

#[tokio::test]
async fn unusable_stored_schedule_is_skipped_and_unlocked() {
    let h = Harness::new("* * * * *", false);
    h.cycle_at(at(20, 13, 0, 0)).await;

    for (minute, expression) in [(1, "not a schedule"), (2, "0 0 30 2 *")] {
        let mut rec = h.store.find(&job()).unwrap().unwrap();
        rec.schedule = expression.to_string();
        h.store.save(&rec).unwrap();

        let outcome = h.cycle_at(at(20, 13, minute, 0)).await;
        assert!(
            matches!(outcome, Outcome::SkippedError { reason: Some(_) }),
            "{expression}: {outcome:?}"
        );
        let rec = h.store.find(&job()).unwrap().unwrap();
        assert!(!rec.is_locked, "{expression}");
        assert_eq!(rec.status, TaskStatus::Pending, "{expression}");
    }
    assert_eq!(h.hits(), 1);
}

#[tokio::test]
async fn disabled_and_off_records_never_run() {
    let h = Harness::new("* * * * *", false);
    h.cycle_at(at(20, 13, 0, 0)).await;

    let admin = StatusAdmin::new(h.store.clone(), h.registry.clone(), h.clock.clone());
    admin.disable(&job()).unwrap();
    for minute in 1..5 {
        assert_eq!(
            h.cycle_at(at(20, 13, minute, 0)).await,
            Outcome::SkippedDisabled
        );
    }
    assert_eq!(h.hits(), 1);

    // Enabled but still parked in Off by hand.
    let mut rec = h.store.find(&job()).unwrap().unwrap();
    rec.enabled = true;
    h.store.save(&rec).unwrap();
    assert_eq!(h.cycle_at(at(20, 13, 6, 0)).await, Outcome::SkippedDisabled);

    admin.enable(&job()).unwrap();
    assert!(matches!(
        h.cycle_at(at(20, 13, 7, 0)).await,
        Outcome::Ran { .. }
    ));
    assert_eq!(h.hits(), 2);
}

#[tokio::test]
async fn reentrant_task_runs_alongside_a_live_instance() {
    let h = Harness::new("* * * * *", true);
    h.cycle_at(at(20, 13, 0, 0)).await;

    // Another invocation is still inside the body.
    let mut rec = h.store.find(&job()).unwrap().unwrap();
    rec.status = TaskStatus::Running;
    rec.running_instances = 1;
    rec.last_run = Some(at(20, 13, 1, 0));
    h.store.save(&rec).unwrap();

    assert!(matches!(
        h.cycle_at(at(20, 13, 2, 0)).await,
        Outcome::Ran { .. }
    ));
    assert_eq!(h.hits(), 2);
    let rec = h.store.find(&job()).unwrap().unwrap();
    assert_eq!(rec.status, TaskStatus::Running);
    assert_eq!(rec.running_instances, 1);
    assert!(!rec.is_locked);
    assert_eq!(h.clock.now(), at(20, 13, 2, 0));
}

#[tokio::test]
async fn two_runners_share_one_database_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("status.db");
    let hits = Arc::new(AtomicUsize::new(0));
    let clock = Arc::new(FixedClock::new(at(20, 13, 0, 5)));

    let open_runner = || {
        let conn = rusqlite::Connection::open(&path).unwrap();
        cronkeep_scheduler::db::configure_connection(&conn, 2_000).unwrap();
        let store = Arc::new(SqliteStatusStore::new(conn).unwrap());
        let mut registry = TaskRegistry::new();
        registry
            .register_instance(
                "job",
                Arc::new(Counter {
                    schedule: "* * * * *",
                    hits: hits.clone(),
                    allow_multiple_instances: false,
                }),
            )
            .unwrap();
        TaskRunner::new(Arc::new(registry), store, clock.clone())
            .with_initial_status(TaskStatus::Pending)
    };
    let a = open_runner();
    let b = open_runner();

    let sink = BufferSink::new();
    a.run_cycle(&sink, Verbosity::Silent).await.unwrap();
    let report = b.run_cycle(&sink, Verbosity::Silent).await.unwrap();

    // Same minute: the second invocation sees the first one's run.
    assert!(matches!(
        report.outcome_for(&job()),
        Some(Outcome::WillRunAt { .. })
    ));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
