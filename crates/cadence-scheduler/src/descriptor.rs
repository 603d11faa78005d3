use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};

use crate::error::{Result, SchedulerError};
use crate::job::{Job, JobRegistry};
use crate::schedule::{Schedule, ScheduleFactories};
use crate::store::JobStore;
use crate::types::JobRecord;

/// Outcome of asking a descriptor for its next fire time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NextRun {
    Disabled,
    At(DateTime<Utc>),
    /// No further run: schedule exhausted, run count limit reached or the
    /// time window has closed.
    Exhausted,
}

struct DescriptorState {
    schedule: Box<dyn Schedule>,
    job_type: String,
    job: Arc<dyn Job>,
    argument: Option<String>,
    run_count: i64,
    run_count_limit: i64,
    last_run_time: Option<DateTime<Utc>>,
    run_time_limit_start: Option<DateTime<Utc>>,
    run_time_limit_end: Option<DateTime<Utc>>,
    auto_clean: bool,
    reentrant: bool,
    enabled: bool,
    running: bool,
}

impl DescriptorState {
    fn run_limit_reached(&self) -> bool {
        self.run_count_limit >= 0 && self.run_count >= self.run_count_limit
    }

    fn try_start(&mut self) -> bool {
        if self.running && !self.reentrant {
            return false;
        }
        self.running = true;
        true
    }
}

/// A scheduled unit of work: identity, schedule, run accounting and
/// constraints.
///
/// Setters apply the change in memory and then persist it through the
/// scheduler's [`JobStore`]. A persistence failure is returned as
/// [`SchedulerError::Modification`] but the in-memory change is kept.
pub struct JobDescriptor {
    name: String,
    state: Mutex<DescriptorState>,
    store: Arc<dyn JobStore>,
    registry: Arc<JobRegistry>,
}

impl JobDescriptor {
    /// Build a descriptor from a stored record, resolving its schedule and
    /// job implementation.
    pub(crate) fn from_record(
        record: JobRecord,
        schedules: &ScheduleFactories,
        registry: Arc<JobRegistry>,
        store: Arc<dyn JobStore>,
    ) -> Result<Self> {
        let schedule = schedules
            .create(&record.schedule_type, &record.schedule_config)
            .map_err(|e| SchedulerError::Config(format!("job '{}': {e}", record.name)))?;
        Self::with_schedule(record, schedule, registry, store)
    }

    pub(crate) fn with_schedule(
        record: JobRecord,
        schedule: Box<dyn Schedule>,
        registry: Arc<JobRegistry>,
        store: Arc<dyn JobStore>,
    ) -> Result<Self> {
        let job = registry.resolve(&record.job_type)?;
        Ok(Self {
            name: record.name,
            state: Mutex::new(DescriptorState {
                schedule,
                job_type: record.job_type,
                job,
                argument: record.argument,
                run_count: record.run_count,
                run_count_limit: record.run_count_limit,
                last_run_time: record.last_run_time,
                run_time_limit_start: record.run_time_limit_start,
                run_time_limit_end: record.run_time_limit_end,
                auto_clean: record.auto_clean,
                reentrant: record.reentrant,
                enabled: record.enabled,
                running: false,
            }),
            store,
            registry,
        })
    }

    fn state(&self) -> MutexGuard<'_, DescriptorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schedule_type(&self) -> &'static str {
        self.state().schedule.schedule_type()
    }

    pub fn schedule_config(&self) -> String {
        self.state().schedule.config().to_string()
    }

    pub fn job_type(&self) -> String {
        self.state().job_type.clone()
    }

    pub fn argument(&self) -> Option<String> {
        self.state().argument.clone()
    }

    pub fn run_count(&self) -> i64 {
        self.state().run_count
    }

    pub fn run_count_limit(&self) -> i64 {
        self.state().run_count_limit
    }

    pub fn last_run_time(&self) -> Option<DateTime<Utc>> {
        self.state().last_run_time
    }

    /// `(start, end)`: start inclusive, end exclusive, `None` is unbounded.
    pub fn run_time_limit(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let state = self.state();
        (state.run_time_limit_start, state.run_time_limit_end)
    }

    pub fn is_auto_clean(&self) -> bool {
        self.state().auto_clean
    }

    pub fn is_reentrant(&self) -> bool {
        self.state().reentrant
    }

    pub fn is_enabled(&self) -> bool {
        self.state().enabled
    }

    /// True while at least one instance is executing.
    pub fn is_running(&self) -> bool {
        self.state().running
    }

    pub fn at_startup(&self) -> bool {
        self.state().schedule.at_startup()
    }

    /// The job implementation this descriptor runs.
    pub fn job(&self) -> Arc<dyn Job> {
        self.state().job.clone()
    }

    /// Snapshot of the persistent fields.
    pub fn record(&self) -> JobRecord {
        self.snapshot(&self.state())
    }

    fn snapshot(&self, state: &DescriptorState) -> JobRecord {
        JobRecord {
            name: self.name.clone(),
            schedule_type: state.schedule.schedule_type().to_string(),
            schedule_config: state.schedule.config().to_string(),
            job_type: state.job_type.clone(),
            argument: state.argument.clone(),
            run_count: state.run_count,
            run_count_limit: state.run_count_limit,
            last_run_time: state.last_run_time,
            run_time_limit_start: state.run_time_limit_start,
            run_time_limit_end: state.run_time_limit_end,
            auto_clean: state.auto_clean,
            reentrant: state.reentrant,
            enabled: state.enabled,
        }
    }

    pub fn set_schedule(&self, schedule: Box<dyn Schedule>) -> Result<()> {
        self.modify(|state| state.schedule = schedule)
    }

    /// Switch to another registered job implementation. Unknown types are
    /// rejected before anything changes.
    pub fn set_job_type(&self, job_type: &str) -> Result<()> {
        self.ensure_modifiable()?;
        let job = self.registry.resolve(job_type)?;
        self.modify(|state| {
            state.job_type = job_type.to_string();
            state.job = job;
        })
    }

    pub fn set_argument(&self, argument: Option<String>) -> Result<()> {
        self.modify(|state| state.argument = argument)
    }

    /// `-1` removes the limit.
    pub fn set_run_count_limit(&self, limit: i64) -> Result<()> {
        self.modify(|state| state.run_count_limit = limit.max(-1))
    }

    pub fn set_run_time_limit(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.modify(|state| {
            state.run_time_limit_start = start;
            state.run_time_limit_end = end;
        })
    }

    pub fn set_auto_clean(&self, auto_clean: bool) -> Result<()> {
        self.modify(|state| state.auto_clean = auto_clean)
    }

    pub fn set_reentrant(&self, reentrant: bool) -> Result<()> {
        self.modify(|state| state.reentrant = reentrant)
    }

    fn ensure_modifiable(&self) -> Result<()> {
        if self.store.allows_modifications() {
            Ok(())
        } else {
            Err(SchedulerError::Modification(format!(
                "job '{}': transient scheduled jobs cannot be modified",
                self.name
            )))
        }
    }

    fn modify(&self, change: impl FnOnce(&mut DescriptorState)) -> Result<()> {
        self.ensure_modifiable()?;
        let mut state = self.state();
        change(&mut *state);
        self.persist(&state)
    }

    fn persist(&self, state: &DescriptorState) -> Result<()> {
        self.store
            .save(&self.snapshot(state))
            .map_err(|e| SchedulerError::Modification(format!("job '{}': {e}", self.name)))
    }

    /// Persist the current state.
    pub(crate) fn save_changes(&self) -> Result<()> {
        let state = self.state();
        self.persist(&state)
    }

    /// Flip the enabled flag. Allowed on read-only descriptors.
    pub(crate) fn set_enabled(&self, enabled: bool) -> Result<()> {
        let mut state = self.state();
        state.enabled = enabled;
        self.persist(&state)
    }

    /// Count one run starting at `now`; returns the new run number. The
    /// change is not persisted.
    pub(crate) fn record_run(&self, now: DateTime<Utc>) -> i64 {
        let mut state = self.state();
        state.run_count += 1;
        state.last_run_time = Some(now);
        state.run_count
    }

    /// Check-and-set of the running flag: refuses a second instance of a
    /// non-reentrant job.
    pub(crate) fn try_start(&self) -> bool {
        self.state().try_start()
    }

    /// Like [`try_start`](Self::try_start) but also refuses a disabled job,
    /// checked under the same lock as the running flag.
    pub(crate) fn try_start_enabled(&self) -> bool {
        let mut state = self.state();
        state.enabled && state.try_start()
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.state().running = running;
    }

    pub(crate) fn run_limit_reached(&self) -> bool {
        self.state().run_limit_reached()
    }

    /// When the job would next fire if scheduled at `now`. `None` for
    /// disabled or exhausted jobs.
    pub fn upcoming_run(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.next_run(now, None) {
            NextRun::At(fire_at) => Some(fire_at),
            NextRun::Disabled | NextRun::Exhausted => None,
        }
    }

    /// Next fire time after `now`, honouring the enabled flag, run count
    /// limit and time window.
    ///
    /// `dispatched_at` stands in for the last run time when it is later, so a
    /// reentrant job rescheduled at dispatch does not fire again for the same
    /// slot.
    pub(crate) fn next_run(
        &self,
        now: DateTime<Utc>,
        dispatched_at: Option<DateTime<Utc>>,
    ) -> NextRun {
        let state = self.state();
        if !state.enabled {
            return NextRun::Disabled;
        }
        if state.run_limit_reached() {
            return NextRun::Exhausted;
        }
        let last_run = match (state.last_run_time, dispatched_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let Some(mut next) = state.schedule.next_run_time(now, last_run) else {
            return NextRun::Exhausted;
        };
        if let Some(start) = state.run_time_limit_start {
            if next < start {
                // Window not open yet: take the first slot at or after it.
                let Some(first) = state
                    .schedule
                    .next_run_time(start - Duration::milliseconds(1), last_run)
                else {
                    return NextRun::Exhausted;
                };
                next = first.max(start);
            }
        }
        match state.run_time_limit_end {
            Some(end) if next >= end => NextRun::Exhausted,
            _ => NextRun::At(next),
        }
    }
}

impl fmt::Debug for JobDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("JobDescriptor")
            .field("name", &self.name)
            .field("schedule", &state.schedule)
            .field("job_type", &state.job_type)
            .field("run_count", &state.run_count)
            .field("enabled", &state.enabled)
            .field("running", &state.running)
            .finish()
    }
}
