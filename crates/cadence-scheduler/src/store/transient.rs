use std::collections::HashSet;

use cadence_core::{DateFormat, JobDefinition};
use chrono::{DateTime, Utc};
use tracing::debug;

use super::JobStore;
use crate::error::{Result, SchedulerError};
use crate::types::{JobRecord, UNLIMITED_RUNS};

/// Read-only store fed from `[[jobs]]` configuration entries.
///
/// Jobs are loaded enabled. Accounting changes live in memory only and
/// runtime creation or deletion is refused.
#[derive(Debug, Clone)]
pub struct ConfigJobStore {
    records: Vec<JobRecord>,
}

impl ConfigJobStore {
    /// Validate `definitions` and build the store. Any malformed entry fails
    /// the whole load.
    pub fn new(definitions: &[JobDefinition], format: &DateFormat) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(definitions.len());
        for def in definitions {
            if !seen.insert(def.name.as_str()) {
                return Err(SchedulerError::Config(format!(
                    "job '{}' is defined more than once",
                    def.name
                )));
            }
            records.push(record_from_definition(def, format)?);
        }
        debug!(jobs = records.len(), "config job store loaded");
        Ok(Self { records })
    }
}

fn record_from_definition(def: &JobDefinition, format: &DateFormat) -> Result<JobRecord> {
    let mut record = JobRecord::new(
        def.name.clone(),
        def.schedule_type.clone(),
        def.schedule_config.clone(),
        def.job_type.clone(),
    );
    record.argument = def.argument.clone().filter(|a| !a.is_empty());
    record.run_count_limit = def.run_count_limit.unwrap_or(UNLIMITED_RUNS);
    if let Some(range) = def.run_time_limit.as_deref().filter(|r| !r.is_empty()) {
        let (start, end) = parse_run_time_limit(range, format).map_err(|e| {
            SchedulerError::Config(format!("job '{}': {e}", def.name))
        })?;
        record.run_time_limit_start = start;
        record.run_time_limit_end = end;
    }
    record.reentrant = def.reentrant.unwrap_or(false);
    record.enabled = true;
    Ok(record)
}

/// Parse a `"[start]::[end]"` validity window. Either side may be blank for
/// an unbounded window; a missing separator, or a separator that ends the
/// string, is rejected.
pub fn parse_run_time_limit(
    range: &str,
    format: &DateFormat,
) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
    let malformed = || {
        SchedulerError::Config(format!(
            "malformed run time limit '{range}', '[start]::[end]' expected"
        ))
    };
    let pos = range.find("::").ok_or_else(malformed)?;
    if pos + 2 == range.len() {
        return Err(malformed());
    }
    let parse_side = |text: &str| -> Result<Option<DateTime<Utc>>> {
        let text = text.trim();
        if text.is_empty() {
            Ok(None)
        } else {
            Ok(Some(format.parse(text)?))
        }
    };
    Ok((parse_side(&range[..pos])?, parse_side(&range[pos + 2..])?))
}

impl JobStore for ConfigJobStore {
    fn allows_modifications(&self) -> bool {
        false
    }

    fn load(&self) -> Result<Vec<JobRecord>> {
        Ok(self.records.clone())
    }

    fn insert(&self, _record: &JobRecord) -> Result<()> {
        Err(SchedulerError::Unsupported(
            "transient scheduler does not support job creation at runtime".into(),
        ))
    }

    fn save(&self, _record: &JobRecord) -> Result<()> {
        Ok(())
    }

    fn delete(&self, _name: &str) -> Result<()> {
        Err(SchedulerError::Unsupported(
            "transient scheduler does not support job deletion at runtime".into(),
        ))
    }
}
