use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use cadence_core::config::DEFAULT_MAX_WORKERS;
use cadence_core::DateFormat;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::descriptor::{JobDescriptor, NextRun};
use crate::error::{Result, SchedulerError};
use crate::job::JobRegistry;
use crate::pool::{Task, TokioWorkerPool, WorkerPool};
use crate::queue::WaitQueue;
use crate::runner::RunnerTask;
use crate::schedule::{Schedule, ScheduleFactories};
use crate::store::JobStore;
use crate::types::{JobRecord, JobStatus};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Time-based job scheduler.
///
/// Cheap to clone; clones share the same jobs, wait queue and runners.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn JobStore>,
    pool: Arc<dyn WorkerPool>,
    schedules: ScheduleFactories,
    registry: Arc<JobRegistry>,
    format: DateFormat,
    jobs: RwLock<BTreeMap<String, Arc<JobDescriptor>>>,
    queue: Mutex<WaitQueue<Arc<JobDescriptor>>>,
    /// Wakes the timekeeping loop when the queue head may have changed.
    wake: Notify,
    /// job name -> runner id -> cancellation token.
    runners: Mutex<HashMap<String, HashMap<u64, CancellationToken>>>,
    next_runner_id: AtomicU64,
    shutdown: CancellationToken,
    started: AtomicBool,
}

/// Configures and builds a [`Scheduler`].
pub struct SchedulerBuilder {
    store: Arc<dyn JobStore>,
    pool: Option<Arc<dyn WorkerPool>>,
    registry: JobRegistry,
    format: DateFormat,
    extra_schedules: Vec<(&'static str, crate::schedule::ScheduleFactory)>,
}

impl SchedulerBuilder {
    /// Defaults to a [`TokioWorkerPool`] on the current runtime.
    pub fn worker_pool(mut self, pool: Arc<dyn WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn job_registry(mut self, registry: JobRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Date format for `at` schedules and display. Defaults to
    /// `yyyy-MM-dd HH:mm` in local time.
    pub fn date_format(mut self, format: DateFormat) -> Self {
        self.format = format;
        self
    }

    /// Register an additional schedule type.
    pub fn schedule_type<F>(mut self, name: &'static str, factory: F) -> Self
    where
        F: Fn(&str) -> Result<Box<dyn Schedule>> + Send + Sync + 'static,
    {
        self.extra_schedules.push((name, Box::new(factory)));
        self
    }

    /// Load every stored job. Unknown schedule or job types fail the build.
    pub fn build(self) -> Result<Scheduler> {
        let pool = match self.pool {
            Some(pool) => pool,
            None => Arc::new(TokioWorkerPool::new(DEFAULT_MAX_WORKERS)?),
        };
        let mut schedules = ScheduleFactories::with_defaults(&self.format);
        for (name, factory) in self.extra_schedules {
            schedules.register(name, factory);
        }
        let registry = Arc::new(self.registry);

        let mut jobs = BTreeMap::new();
        for record in self.store.load()? {
            let name = record.name.clone();
            let job = JobDescriptor::from_record(
                record,
                &schedules,
                registry.clone(),
                self.store.clone(),
            )?;
            jobs.insert(name, Arc::new(job));
        }
        info!(jobs = jobs.len(), "scheduler loaded jobs");

        Ok(Scheduler {
            inner: Arc::new(Inner {
                store: self.store,
                pool,
                schedules,
                registry,
                format: self.format,
                jobs: RwLock::new(jobs),
                queue: Mutex::new(WaitQueue::new()),
                wake: Notify::new(),
                runners: Mutex::new(HashMap::new()),
                next_runner_id: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
                started: AtomicBool::new(false),
            }),
        })
    }
}

impl Scheduler {
    pub fn builder(store: Arc<dyn JobStore>) -> SchedulerBuilder {
        SchedulerBuilder {
            store,
            pool: None,
            registry: JobRegistry::new(),
            format: DateFormat::default(),
            extra_schedules: Vec::new(),
        }
    }

    /// Whether jobs may be created, deleted or reconfigured at runtime.
    pub fn allows_modifications(&self) -> bool {
        self.inner.store.allows_modifications()
    }

    pub fn date_format(&self) -> &DateFormat {
        &self.inner.format
    }

    /// Registered schedule type names, sorted.
    pub fn schedule_types(&self) -> Vec<&'static str> {
        self.inner.schedules.types()
    }

    /// Parse a schedule of a registered type.
    pub fn create_schedule(&self, schedule_type: &str, config: &str) -> Result<Box<dyn Schedule>> {
        self.inner.schedules.create(schedule_type, config)
    }

    /// All jobs, ordered by name.
    pub fn job_descriptors(&self) -> Vec<Arc<JobDescriptor>> {
        self.jobs().values().cloned().collect()
    }

    pub fn job_descriptor(&self, name: &str) -> Option<Arc<JobDescriptor>> {
        self.jobs().get(name).cloned()
    }

    fn jobs(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Arc<JobDescriptor>>> {
        self.inner.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn jobs_mut(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Arc<JobDescriptor>>> {
        self.inner.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_registered(&self, job: &Arc<JobDescriptor>) -> bool {
        self.jobs()
            .get(job.name())
            .is_some_and(|current| Arc::ptr_eq(current, job))
    }

    /// Create and store a new job. It starts disabled.
    #[instrument(skip(self, schedule, argument))]
    pub fn create_job_descriptor(
        &self,
        name: &str,
        schedule: Box<dyn Schedule>,
        job_type: &str,
        argument: Option<String>,
    ) -> Result<Arc<JobDescriptor>> {
        if !self.allows_modifications() {
            return Err(SchedulerError::Unsupported(
                "scheduler does not support job creation at runtime".into(),
            ));
        }
        let mut jobs = self.jobs_mut();
        if jobs.contains_key(name) {
            return Err(SchedulerError::AlreadyExists {
                name: name.to_string(),
            });
        }
        let mut record = JobRecord::new(name, schedule.schedule_type(), schedule.config(), job_type);
        record.argument = argument;
        let job = JobDescriptor::with_schedule(
            record.clone(),
            schedule,
            self.inner.registry.clone(),
            self.inner.store.clone(),
        )?;
        self.inner.store.insert(&record)?;
        let job = Arc::new(job);
        jobs.insert(name.to_string(), job.clone());
        info!("job created");
        Ok(job)
    }

    /// Remove a job, signal its runners and delete it from the store.
    #[instrument(skip(self, job), fields(job = %job.name()))]
    pub fn delete_job_descriptor(&self, job: &Arc<JobDescriptor>) -> Result<()> {
        if !self.allows_modifications() {
            return Err(SchedulerError::Unsupported(
                "scheduler does not support job deletion at runtime".into(),
            ));
        }
        self.remove_job(job)?;
        self.terminate(job);
        self.inner
            .store
            .delete(job.name())
            .map_err(|e| SchedulerError::Modification(format!("job '{}': {e}", job.name())))?;
        info!("job deleted");
        Ok(())
    }

    fn remove_job(&self, job: &Arc<JobDescriptor>) -> Result<()> {
        {
            let mut jobs = self.jobs_mut();
            match jobs.get(job.name()) {
                Some(current) if Arc::ptr_eq(current, job) => {
                    jobs.remove(job.name());
                }
                _ => {
                    return Err(SchedulerError::NotRegistered {
                        name: job.name().to_string(),
                    })
                }
            }
        }
        lock(&self.inner.queue).remove(job.name());
        Ok(())
    }

    /// Enable a job and schedule its next run.
    ///
    /// A persistence failure is returned after the job has been scheduled.
    #[instrument(skip(self, job), fields(job = %job.name()))]
    pub fn enable(&self, job: &Arc<JobDescriptor>) -> Result<()> {
        let saved = job.set_enabled(true);
        self.schedule(job, None);
        info!("job enabled");
        saved
    }

    /// Disable a job, drop it from the queue and signal its running
    /// instances to stop.
    #[instrument(skip(self, job), fields(job = %job.name()))]
    pub fn disable(&self, job: &Arc<JobDescriptor>) -> Result<()> {
        let saved = job.set_enabled(false);
        lock(&self.inner.queue).remove(job.name());
        self.terminate(job);
        info!("job disabled");
        saved
    }

    /// Submit `job` for execution now, unless it is already running and not
    /// reentrant. Returns whether a runner was submitted.
    pub fn run(&self, job: &Arc<JobDescriptor>) -> bool {
        self.submit(job, false)
    }

    /// Register a runner for `job` and hand it to the worker pool. Queue
    /// dispatch passes `require_enabled` so a concurrent `disable` either
    /// stops the start or finds the runner to cancel.
    fn submit(&self, job: &Arc<JobDescriptor>, require_enabled: bool) -> bool {
        let id = self.inner.next_runner_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        {
            let mut runners = lock(&self.inner.runners);
            let started = if require_enabled {
                job.try_start_enabled()
            } else {
                job.try_start()
            };
            if !started {
                debug!(job = %job.name(), "job disabled or already running, not started");
                return false;
            }
            runners
                .entry(job.name().to_string())
                .or_default()
                .insert(id, cancel.clone());
        }
        debug!(job = %job.name(), runner = id, "job submitted");
        self.inner.pool.run_worker(Box::new(RunnerTask {
            id,
            job: job.clone(),
            cancel,
            scheduler: self.clone(),
        }));
        true
    }

    /// Run `at_startup` jobs, schedule every enabled job and start the
    /// timekeeping loop. Calling it again has no effect.
    pub fn start(&self) -> Result<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let jobs = self.job_descriptors();
        for job in jobs.iter().filter(|job| job.is_enabled()) {
            if job.at_startup() {
                info!(job = %job.name(), "running job at startup");
                self.run(job);
            }
            self.schedule(job, None);
        }
        self.inner.pool.run_daemon(Box::new(TimekeepingTask {
            scheduler: self.clone(),
        }));
        info!(jobs = jobs.len(), queued = lock(&self.inner.queue).len(), "scheduler started");
        Ok(())
    }

    /// Stop the timekeeping loop. Running jobs are left to finish.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            self.inner.shutdown.cancel();
            info!("scheduler shutting down");
        }
    }

    /// When the job is next due, if it is queued.
    pub fn next_fire_time(&self, job: &JobDescriptor) -> Option<DateTime<Utc>> {
        lock(&self.inner.queue).fire_time(job.name())
    }

    /// Number of in-flight runners for the job.
    pub fn running_instances(&self, job: &JobDescriptor) -> usize {
        lock(&self.inner.runners)
            .get(job.name())
            .map_or(0, HashMap::len)
    }

    pub fn status(&self, job: &JobDescriptor) -> JobStatus {
        if !job.is_enabled() {
            JobStatus::Disabled
        } else if self.running_instances(job) > 0 {
            JobStatus::Running
        } else if self.next_fire_time(job).is_some() {
            JobStatus::Scheduled
        } else {
            JobStatus::Idle
        }
    }

    /// Compute the job's next fire time and queue it, or auto-clean it when
    /// it has no further runs.
    pub(crate) fn schedule(&self, job: &Arc<JobDescriptor>, dispatched_at: Option<DateTime<Utc>>) {
        if !self.is_registered(job) {
            return;
        }
        match job.next_run(Utc::now(), dispatched_at) {
            NextRun::At(fire_at) => {
                lock(&self.inner.queue).insert(job.name(), fire_at, job.clone());
                self.inner.wake.notify_one();
                debug!(job = %job.name(), fire_at = %self.inner.format.format(fire_at), "job scheduled");
            }
            NextRun::Disabled => {
                lock(&self.inner.queue).remove(job.name());
            }
            NextRun::Exhausted => {
                lock(&self.inner.queue).remove(job.name());
                if job.is_auto_clean() {
                    self.auto_clean(job);
                } else {
                    debug!(job = %job.name(), "job has no further runs");
                }
            }
        }
    }

    fn auto_clean(&self, job: &Arc<JobDescriptor>) {
        if self.remove_job(job).is_err() {
            return;
        }
        match self.inner.store.delete(job.name()) {
            Ok(()) => info!(job = %job.name(), "exhausted job removed"),
            Err(e) => error!(job = %job.name(), error = %e, "failed to auto-clean job"),
        }
    }

    /// Dispatch every queued job due at or before `now`.
    pub(crate) fn dispatch_due(&self, now: DateTime<Utc>) -> usize {
        let due = lock(&self.inner.queue).drain_due(now);
        let mut dispatched = 0;
        for job in due {
            if !job.is_enabled() {
                continue;
            }
            if job.run_limit_reached() {
                self.schedule(&job, None);
                continue;
            }
            if self.submit(&job, true) {
                dispatched += 1;
            }
            if job.is_reentrant() && job.is_enabled() {
                self.schedule(&job, Some(now));
            }
        }
        dispatched
    }

    /// Called once per runner when it completes.
    pub(crate) fn runner_finished(&self, job: &Arc<JobDescriptor>, id: u64) {
        {
            let mut runners = lock(&self.inner.runners);
            let idle = match runners.get_mut(job.name()) {
                Some(ids) => {
                    ids.remove(&id);
                    ids.is_empty()
                }
                None => true,
            };
            if idle {
                runners.remove(job.name());
                job.set_running(false);
            }
        }
        debug!(job = %job.name(), runner = id, "runner finished");
        if !job.is_reentrant() {
            self.schedule(job, None);
        }
    }

    /// Signal every running instance of the job to stop.
    fn terminate(&self, job: &JobDescriptor) {
        let tokens: Vec<CancellationToken> = lock(&self.inner.runners)
            .get(job.name())
            .map(|ids| ids.values().cloned().collect())
            .unwrap_or_default();
        if tokens.is_empty() {
            return;
        }
        let implementation = job.job();
        for token in tokens {
            token.cancel();
            implementation.terminate(job.name());
        }
        warn!(job = %job.name(), "termination requested for running job");
    }
}

/// Sleeps until the earliest fire time and dispatches due jobs, until the
/// scheduler shuts down.
struct TimekeepingTask {
    scheduler: Scheduler,
}

impl Task for TimekeepingTask {
    fn name(&self) -> String {
        "scheduler timekeeping".into()
    }

    fn process(self: Box<Self>) -> BoxFuture<'static, ()> {
        self.run_loop().boxed()
    }
}

impl TimekeepingTask {
    async fn run_loop(self: Box<Self>) {
        let inner = &self.scheduler.inner;
        debug!("timekeeping loop started");
        loop {
            let dispatched = self.scheduler.dispatch_due(Utc::now());
            if dispatched > 0 {
                debug!(dispatched, "due jobs dispatched");
            }
            let next = lock(&inner.queue).next_fire_time();
            match next {
                None => {
                    tokio::select! {
                        _ = inner.shutdown.cancelled() => break,
                        _ = inner.wake.notified() => {}
                    }
                }
                Some(fire_at) => {
                    let wait = (fire_at - Utc::now()).to_std().unwrap_or_default();
                    tokio::select! {
                        _ = inner.shutdown.cancelled() => break,
                        _ = inner.wake.notified() => {}
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }
        info!("timekeeping loop stopped");
    }
}
