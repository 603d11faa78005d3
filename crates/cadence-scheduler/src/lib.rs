//! `cadence-scheduler`: Tokio-based time-driven job scheduler.
//!
//! # Overview
//!
//! A [`Scheduler`] loads its jobs from a [`JobStore`], keeps every enabled
//! job in a wait queue ordered by fire time and runs a timekeeping task that
//! sleeps until the earliest fire time, then hands each due job to a
//! [`WorkerPool`]. Non-reentrant jobs are rescheduled when their run
//! completes; reentrant jobs are rescheduled as soon as they are dispatched.
//!
//! # Stores
//!
//! | Store              | Runtime create/delete | Persistence                 |
//! |--------------------|-----------------------|-----------------------------|
//! | [`ConfigJobStore`] | no                    | none, jobs come from config |
//! | [`SqliteJobStore`] | yes                   | `scheduler_jobs` table      |

pub mod db;
pub mod descriptor;
pub mod error;
pub mod job;
pub mod pool;
mod queue;
mod runner;
pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod types;

pub use descriptor::JobDescriptor;
pub use error::{Result, SchedulerError};
pub use job::{Job, JobContext, JobRegistry};
pub use pool::{Task, TokioWorkerPool, WorkerPool};
pub use schedule::{Schedule, ScheduleFactories};
pub use scheduler::{Scheduler, SchedulerBuilder};
pub use store::{ConfigJobStore, JobStore, SqliteJobStore};
pub use types::{JobRecord, JobStatus, UNLIMITED_RUNS};
