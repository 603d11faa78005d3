use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use tracing::{debug, info};

use super::JobStore;
use crate::db::init_db;
use crate::error::{Result, SchedulerError};
use crate::types::JobRecord;

/// Job store persisting descriptors to the `scheduler_jobs` table.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Wrap `conn`, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn to_text(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(|t| t.to_rfc3339())
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let Some(text) = row.get::<_, Option<String>>(idx)? else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| Some(dt.with_timezone(&Utc)))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    Ok(JobRecord {
        name: row.get(0)?,
        schedule_type: row.get(1)?,
        schedule_config: row.get(2)?,
        job_type: row.get(3)?,
        argument: row.get(4)?,
        run_count: row.get(5)?,
        run_count_limit: row.get(6)?,
        last_run_time: timestamp(row, 7)?,
        run_time_limit_start: timestamp(row, 8)?,
        run_time_limit_end: timestamp(row, 9)?,
        auto_clean: row.get(10)?,
        reentrant: row.get(11)?,
        enabled: row.get(12)?,
    })
}

impl JobStore for SqliteJobStore {
    fn allows_modifications(&self) -> bool {
        true
    }

    fn load(&self) -> Result<Vec<JobRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT job_name, schedule_type, schedule_config, job_type, argument,
                    run_count, run_count_limit, last_run_time,
                    run_time_limit_start, run_time_limit_end,
                    auto_clean, reentrant, enabled
             FROM scheduler_jobs ORDER BY job_name",
        )?;
        let records = stmt
            .query_map([], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        debug!(jobs = records.len(), "jobs loaded from database");
        Ok(records)
    }

    fn insert(&self, record: &JobRecord) -> Result<()> {
        let n = self.conn().execute(
            "INSERT OR IGNORE INTO scheduler_jobs
             (job_name, schedule_type, schedule_config, job_type, argument,
              run_count, run_count_limit, last_run_time,
              run_time_limit_start, run_time_limit_end,
              auto_clean, reentrant, enabled, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            params![
                record.name,
                record.schedule_type,
                record.schedule_config,
                record.job_type,
                record.argument,
                record.run_count,
                record.run_count_limit,
                to_text(record.last_run_time),
                to_text(record.run_time_limit_start),
                to_text(record.run_time_limit_end),
                record.auto_clean,
                record.reentrant,
                record.enabled,
                Utc::now().to_rfc3339(),
            ],
        )?;
        if n == 0 {
            return Err(SchedulerError::AlreadyExists {
                name: record.name.clone(),
            });
        }
        info!(job = %record.name, "job stored");
        Ok(())
    }

    fn save(&self, record: &JobRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO scheduler_jobs
             (job_name, schedule_type, schedule_config, job_type, argument,
              run_count, run_count_limit, last_run_time,
              run_time_limit_start, run_time_limit_end,
              auto_clean, reentrant, enabled, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)
             ON CONFLICT(job_name) DO UPDATE SET
               schedule_type=excluded.schedule_type,
               schedule_config=excluded.schedule_config,
               job_type=excluded.job_type,
               argument=excluded.argument,
               run_count=excluded.run_count,
               run_count_limit=excluded.run_count_limit,
               last_run_time=excluded.last_run_time,
               run_time_limit_start=excluded.run_time_limit_start,
               run_time_limit_end=excluded.run_time_limit_end,
               auto_clean=excluded.auto_clean,
               reentrant=excluded.reentrant,
               enabled=excluded.enabled,
               updated_at=excluded.updated_at",
            params![
                record.name,
                record.schedule_type,
                record.schedule_config,
                record.job_type,
                record.argument,
                record.run_count,
                record.run_count_limit,
                to_text(record.last_run_time),
                to_text(record.run_time_limit_start),
                to_text(record.run_time_limit_end),
                record.auto_clean,
                record.reentrant,
                record.enabled,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        let n = self
            .conn()
            .execute("DELETE FROM scheduler_jobs WHERE job_name = ?1", [name])?;
        if n == 0 {
            return Err(SchedulerError::NotRegistered {
                name: name.to_string(),
            });
        }
        info!(job = %name, "job removed from database");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store() -> SqliteJobStore {
        SqliteJobStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn insert_then_load() {
        let store = store();
        let mut record = JobRecord::new("foo", "interval", "5 m", "log");
        record.argument = Some("hello".into());
        record.run_time_limit_start = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        store.insert(&record).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, vec![record]);
    }

    #[test]
    fn duplicate_insert_fails() {
        let store = store();
        let record = JobRecord::new("foo", "interval", "5 m", "log");
        store.insert(&record).unwrap();
        let err = store.insert(&record).unwrap_err();
        assert!(matches!(err, SchedulerError::AlreadyExists { ref name } if name == "foo"));
    }

    #[test]
    fn save_updates_existing_row() {
        let store = store();
        let mut record = JobRecord::new("foo", "interval", "5 m", "log");
        store.insert(&record).unwrap();

        record.run_count = 4;
        record.enabled = true;
        record.last_run_time = Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap());
        store.save(&record).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], record);
    }

    #[test]
    fn delete_missing_job_fails() {
        let store = store();
        store
            .insert(&JobRecord::new("foo", "interval", "5 m", "log"))
            .unwrap();
        store.delete("foo").unwrap();
        assert!(store.load().unwrap().is_empty());
        assert!(matches!(
            store.delete("foo"),
            Err(SchedulerError::NotRegistered { .. })
        ));
    }

    #[test]
    fn load_is_ordered_by_name() {
        let store = store();
        for name in ["charlie", "alpha", "bravo"] {
            store
                .insert(&JobRecord::new(name, "interval", "1 h", "log"))
                .unwrap();
        }
        let names: Vec<_> = store.load().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, ["alpha", "bravo", "charlie"]);
    }
}
