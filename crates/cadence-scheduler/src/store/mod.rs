//! Persistence collaborators for job descriptors.

use crate::error::Result;
use crate::types::JobRecord;

mod sqlite;
mod transient;

pub use sqlite::SqliteJobStore;
pub use transient::{parse_run_time_limit, ConfigJobStore};

/// Storage backing a scheduler's job descriptors.
///
/// Every descriptor mutation calls [`JobStore::save`] with the new snapshot.
pub trait JobStore: Send + Sync {
    /// Whether jobs may be created, deleted or reconfigured at runtime.
    fn allows_modifications(&self) -> bool;

    /// All stored jobs, in a stable order.
    fn load(&self) -> Result<Vec<JobRecord>>;

    /// Store a new job. Fails if a job with the same name exists.
    fn insert(&self, record: &JobRecord) -> Result<()>;

    /// Persist the current state of an existing job.
    fn save(&self, record: &JobRecord) -> Result<()>;

    fn delete(&self, name: &str) -> Result<()>;
}
