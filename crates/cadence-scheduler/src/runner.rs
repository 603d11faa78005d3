use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::descriptor::JobDescriptor;
use crate::job::JobContext;
use crate::pool::Task;
use crate::scheduler::Scheduler;

/// One execution of one job instance.
///
/// The runner is registered with the scheduler before it is submitted;
/// completion deregisters it even when the job fails, panics or the task is
/// dropped.
pub(crate) struct RunnerTask {
    pub(crate) id: u64,
    pub(crate) job: Arc<JobDescriptor>,
    pub(crate) cancel: CancellationToken,
    pub(crate) scheduler: Scheduler,
}

struct Completion {
    id: u64,
    job: Arc<JobDescriptor>,
    scheduler: Scheduler,
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.scheduler.runner_finished(&self.job, self.id);
    }
}

impl Task for RunnerTask {
    fn name(&self) -> String {
        format!("job runner: {}", self.job.name())
    }

    fn process(self: Box<Self>) -> BoxFuture<'static, ()> {
        self.execute().boxed()
    }
}

impl RunnerTask {
    async fn execute(self: Box<Self>) {
        let RunnerTask {
            id,
            job,
            cancel,
            scheduler,
        } = *self;
        let _completion = Completion {
            id,
            job: job.clone(),
            scheduler,
        };
        let name = job.name().to_string();

        if cancel.is_cancelled() {
            debug!(job = %name, runner = id, "runner cancelled before start");
            return;
        }

        let run_count = job.record_run(Utc::now());
        if let Err(e) = job.save_changes() {
            warn!(job = %name, error = %e, "failed to save job accounting information");
        }

        let ctx = JobContext::new(name.clone(), job.argument(), run_count, cancel);
        let implementation = job.job();
        info!(job = %name, run = run_count, "job started");
        match AssertUnwindSafe(implementation.run(ctx)).catch_unwind().await {
            Ok(Ok(())) => info!(job = %name, run = run_count, "job finished"),
            Ok(Err(e)) => error!(job = %name, run = run_count, error = %format!("{e:#}"), "job failed"),
            Err(panic) => error!(
                job = %name,
                run = run_count,
                panic = %panic_message(panic.as_ref()),
                "job panicked"
            ),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
