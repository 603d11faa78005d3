use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cadence_core::{DateFormat, JobDefinition, Zone};
use cadence_scheduler::{
    ConfigJobStore, Job, JobContext, JobRegistry, JobStatus, JobStore, Schedule, Scheduler,
    SchedulerError, SqliteJobStore, TokioWorkerPool,
};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::mpsc;

/// Fires a fixed number of milliseconds after "now".
#[derive(Debug)]
struct Soon {
    config: String,
    delay: chrono::Duration,
}

impl Soon {
    fn parse(config: &str) -> cadence_scheduler::Result<Self> {
        let ms: i64 = config
            .trim()
            .parse()
            .map_err(|_| SchedulerError::InvalidSchedule(format!("bad delay '{config}'")))?;
        Ok(Self {
            config: config.to_string(),
            delay: chrono::Duration::milliseconds(ms),
        })
    }
}

impl Schedule for Soon {
    fn schedule_type(&self) -> &'static str {
        "soon"
    }

    fn config(&self) -> &str {
        &self.config
    }

    fn set_config(&mut self, config: &str) -> cadence_scheduler::Result<()> {
        *self = Self::parse(config)?;
        Ok(())
    }

    fn at_startup(&self) -> bool {
        false
    }

    fn next_run_time(
        &self,
        now: DateTime<Utc>,
        _last_run: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        Some(now + self.delay)
    }
}

/// Reports each run, then optionally waits for cancellation.
struct Reporter {
    runs: mpsc::UnboundedSender<(String, i64)>,
    wait_for_cancel: bool,
    cancelled: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Job for Reporter {
    async fn run(&self, ctx: JobContext) -> anyhow::Result<()> {
        let _ = self.runs.send((ctx.name.clone(), ctx.run_count));
        if self.wait_for_cancel {
            ctx.cancelled().await;
            let _ = self.cancelled.send(ctx.name.clone());
        }
        Ok(())
    }
}

struct Harness {
    scheduler: Scheduler,
    store: Arc<dyn JobStore>,
    runs: mpsc::UnboundedReceiver<(String, i64)>,
    cancelled: mpsc::UnboundedReceiver<String>,
}

fn harness(store: Arc<dyn JobStore>) -> Harness {
    let (runs_tx, runs) = mpsc::unbounded_channel();
    let (cancel_tx, cancelled) = mpsc::unbounded_channel();
    let mut registry = JobRegistry::new();
    registry
        .register(
            "report",
            Reporter {
                runs: runs_tx.clone(),
                wait_for_cancel: false,
                cancelled: cancel_tx.clone(),
            },
        )
        .register(
            "block",
            Reporter {
                runs: runs_tx,
                wait_for_cancel: true,
                cancelled: cancel_tx,
            },
        );
    let scheduler = Scheduler::builder(store.clone())
        .worker_pool(Arc::new(TokioWorkerPool::new(4).unwrap()))
        .job_registry(registry)
        .date_format(DateFormat::new("yyyy-MM-dd HH:mm", Zone::Utc).unwrap())
        .schedule_type("soon", |config| {
            Ok(Box::new(Soon::parse(config)?) as Box<dyn Schedule>)
        })
        .build()
        .unwrap();
    Harness {
        scheduler,
        store,
        runs,
        cancelled,
    }
}

fn sqlite() -> Arc<dyn JobStore> {
    Arc::new(SqliteJobStore::new(Connection::open_in_memory().unwrap()).unwrap())
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for job")
        .expect("channel closed")
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn job_runs_until_run_count_limit() {
    let mut h = harness(sqlite());
    h.scheduler.start().unwrap();

    let schedule = h.scheduler.create_schedule("soon", "30").unwrap();
    let job = h
        .scheduler
        .create_job_descriptor("ticker", schedule, "report", None)
        .unwrap();
    job.set_run_count_limit(3).unwrap();
    h.scheduler.enable(&job).unwrap();

    for expected in 1..=3 {
        assert_eq!(recv(&mut h.runs).await, ("ticker".to_string(), expected));
    }
    let scheduler = h.scheduler.clone();
    let ticker = job.clone();
    eventually(move || scheduler.status(&ticker) == JobStatus::Idle).await;

    assert_eq!(job.run_count(), 3);
    assert!(job.last_run_time().is_some());
    assert_eq!(h.store.load().unwrap()[0].run_count, 3);
    h.scheduler.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn auto_clean_removes_exhausted_job() {
    let mut h = harness(sqlite());
    h.scheduler.start().unwrap();

    let schedule = h.scheduler.create_schedule("soon", "20").unwrap();
    let job = h
        .scheduler
        .create_job_descriptor("once", schedule, "report", Some("payload".into()))
        .unwrap();
    job.set_run_count_limit(1).unwrap();
    job.set_auto_clean(true).unwrap();
    h.scheduler.enable(&job).unwrap();

    assert_eq!(recv(&mut h.runs).await, ("once".to_string(), 1));
    let scheduler = h.scheduler.clone();
    eventually(move || scheduler.job_descriptor("once").is_none()).await;
    assert!(h.store.load().unwrap().is_empty());
    h.scheduler.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disable_cancels_running_job() {
    let mut h = harness(sqlite());
    let schedule = h.scheduler.create_schedule("interval", "1 h").unwrap();
    let job = h
        .scheduler
        .create_job_descriptor("blocker", schedule, "block", None)
        .unwrap();
    h.scheduler.enable(&job).unwrap();

    assert!(h.scheduler.run(&job));
    assert_eq!(recv(&mut h.runs).await.0, "blocker");
    assert_eq!(h.scheduler.status(&job), JobStatus::Running);
    assert!(!h.scheduler.run(&job));

    h.scheduler.disable(&job).unwrap();
    assert_eq!(recv(&mut h.cancelled).await, "blocker");

    let scheduler = h.scheduler.clone();
    let blocker = job.clone();
    eventually(move || scheduler.running_instances(&blocker) == 0).await;
    assert!(!job.is_running());
    assert_eq!(h.scheduler.status(&job), JobStatus::Disabled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn config_jobs_run_and_stay_read_only() {
    let format = DateFormat::new("yyyy-MM-dd HH:mm", Zone::Utc).unwrap();
    let defs = vec![JobDefinition {
        name: "from-config".into(),
        schedule_type: "soon".into(),
        schedule_config: "20".into(),
        job_type: "report".into(),
        argument: Some("hello".into()),
        run_count_limit: Some(2),
        run_time_limit: Some("::2999-01-01 00:00".into()),
        reentrant: None,
    }];
    let store: Arc<dyn JobStore> = Arc::new(ConfigJobStore::new(&defs, &format).unwrap());
    let mut h = harness(store);
    h.scheduler.start().unwrap();

    assert_eq!(recv(&mut h.runs).await, ("from-config".to_string(), 1));
    assert_eq!(recv(&mut h.runs).await, ("from-config".to_string(), 2));

    let job = h.scheduler.job_descriptor("from-config").unwrap();
    assert!(matches!(
        job.set_argument(None),
        Err(SchedulerError::Modification(_))
    ));
    assert_eq!(job.argument().as_deref(), Some("hello"));
    h.scheduler.shutdown();
}

#[tokio::test]
async fn jobs_survive_a_restart_with_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cadence.db");
    {
        let store: Arc<dyn JobStore> =
            Arc::new(SqliteJobStore::new(Connection::open(&path).unwrap()).unwrap());
        let h = harness(store);
        let schedule = h.scheduler.create_schedule("cron", "0 4 * * *").unwrap();
        let job = h
            .scheduler
            .create_job_descriptor("nightly", schedule, "report", None)
            .unwrap();
        h.scheduler.enable(&job).unwrap();
    }
    let store: Arc<dyn JobStore> =
        Arc::new(SqliteJobStore::new(Connection::open(&path).unwrap()).unwrap());
    let h = harness(store);
    let job = h.scheduler.job_descriptor("nightly").unwrap();
    assert!(job.is_enabled());
    assert_eq!(job.schedule_type(), "cron");
    assert_eq!(job.schedule_config(), "0 4 * * *");

    h.scheduler.start().unwrap();
    let next = h.scheduler.next_fire_time(&job).unwrap();
    assert_eq!(h.scheduler.date_format().format(next).len(), 16);
    assert_eq!(next.format("%H:%M").to_string(), "04:00");
    h.scheduler.shutdown();
}
