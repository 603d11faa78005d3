use std::sync::Arc;

use anyhow::Context;
use cadence_core::{CadenceConfig, DateFormat, StoreKind};
use cadence_scheduler::{
    ConfigJobStore, JobRegistry, JobStore, Scheduler, SqliteJobStore, TokioWorkerPool,
};
use rusqlite::Connection;
use tracing::info;

/// Build the job store selected by `scheduler.store`.
pub fn build_store(config: &CadenceConfig, format: &DateFormat) -> anyhow::Result<Arc<dyn JobStore>> {
    match config.scheduler.store {
        StoreKind::Config => {
            let store = ConfigJobStore::new(&config.jobs, format)
                .context("invalid job definitions")?;
            Ok(Arc::new(store))
        }
        StoreKind::Sqlite => {
            let db_path = &config.database.path;
            ensure_parent_dir(db_path);
            info!(path = %db_path, "opening SQLite database");
            let conn = Connection::open(db_path)
                .with_context(|| format!("failed to open database {db_path}"))?;
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
            let store = SqliteJobStore::new(conn)?;
            seed_jobs(&store, config, format)?;
            Ok(Arc::new(store))
        }
    }
}

/// Insert configured jobs the database does not know yet. Existing rows keep
/// their accounting and any runtime changes.
pub fn seed_jobs(
    store: &dyn JobStore,
    config: &CadenceConfig,
    format: &DateFormat,
) -> anyhow::Result<usize> {
    let existing: Vec<String> = store.load()?.into_iter().map(|r| r.name).collect();
    let configured = ConfigJobStore::new(&config.jobs, format)
        .context("invalid job definitions")?
        .load()?;
    let mut seeded = 0;
    for record in configured {
        if existing.contains(&record.name) {
            continue;
        }
        store.insert(&record)?;
        info!(job = %record.name, "seeded job from configuration");
        seeded += 1;
    }
    Ok(seeded)
}

pub fn build_scheduler(
    config: &CadenceConfig,
    registry: JobRegistry,
) -> anyhow::Result<Scheduler> {
    let format = config
        .scheduler
        .date_format()
        .context("invalid scheduler.date_format")?;
    let store = build_store(config, &format)?;
    let pool = TokioWorkerPool::new(config.scheduler.max_workers)?;
    info!(workers = pool.available_workers(), "worker pool ready");
    let scheduler = Scheduler::builder(store)
        .worker_pool(Arc::new(pool))
        .job_registry(registry)
        .date_format(format)
        .build()?;
    Ok(scheduler)
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::builtin_registry;
    use cadence_core::{JobDefinition, Zone};

    fn definition(name: &str, schedule_config: &str) -> JobDefinition {
        JobDefinition {
            name: name.into(),
            schedule_type: "cron".into(),
            schedule_config: schedule_config.into(),
            job_type: "log".into(),
            argument: Some("hi".into()),
            run_count_limit: None,
            run_time_limit: None,
            reentrant: None,
        }
    }

    fn config_with(jobs: Vec<JobDefinition>) -> CadenceConfig {
        let mut config = CadenceConfig::default();
        config.scheduler.timezone = Zone::Utc;
        config.jobs = jobs;
        config
    }

    #[test]
    fn seeding_skips_existing_jobs() {
        let format = DateFormat::new("yyyy-MM-dd HH:mm", Zone::Utc).unwrap();
        let store = SqliteJobStore::new(Connection::open_in_memory().unwrap()).unwrap();
        let config = config_with(vec![definition("a", "0 * * * *"), definition("b", "@daily")]);
        assert_eq!(seed_jobs(&store, &config, &format).unwrap(), 2);

        let mut changed = store.load().unwrap().remove(0);
        changed.run_count = 9;
        store.save(&changed).unwrap();

        assert_eq!(seed_jobs(&store, &config, &format).unwrap(), 0);
        let records = store.load().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].run_count, 9);
        assert!(records.iter().all(|r| r.enabled));
    }

    #[tokio::test]
    async fn sqlite_scheduler_loads_seeded_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_with(vec![definition("hourly", "0 * * * *")]);
        config.scheduler.store = StoreKind::Sqlite;
        config.database.path = dir.path().join("nested/cadence.db").display().to_string();

        let scheduler = build_scheduler(&config, builtin_registry()).unwrap();
        assert!(scheduler.allows_modifications());
        assert!(scheduler.job_descriptor("hourly").unwrap().is_enabled());
    }

    #[tokio::test]
    async fn config_scheduler_rejects_unknown_job_type() {
        let mut def = definition("bad", "0 * * * *");
        def.job_type = "missing".into();
        let err = build_scheduler(&config_with(vec![def]), builtin_registry())
            .err()
            .unwrap();
        assert!(err.to_string().contains("missing"), "{err}");
    }
}
