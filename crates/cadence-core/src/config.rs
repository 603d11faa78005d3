use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::time::{DateFormat, Zone};

pub const DEFAULT_MAX_WORKERS: usize = 8;

/// Top-level config (cadence.toml + CADENCE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Job definitions. Read-only for the `config` store, seeded into the
    /// database for the `sqlite` store.
    #[serde(default)]
    pub jobs: Vec<JobDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Pattern used by at-schedules, run time limits and job listings.
    #[serde(default = "default_date_format")]
    pub date_format: String,
    #[serde(default)]
    pub timezone: Zone,
    /// Upper bound on concurrently executing jobs.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default)]
    pub store: StoreKind,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            date_format: default_date_format(),
            timezone: Zone::default(),
            max_workers: DEFAULT_MAX_WORKERS,
            store: StoreKind::default(),
        }
    }
}

impl SchedulerSettings {
    pub fn date_format(&self) -> crate::Result<DateFormat> {
        DateFormat::new(&self.date_format, self.timezone)
    }
}

/// Where job descriptors live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreKind {
    /// Jobs come from `[[jobs]]` and cannot be created or deleted at runtime.
    #[default]
    Config,
    /// Jobs are persisted in the SQLite database and fully modifiable.
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// A single `[[jobs]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    /// Registered schedule type: `at`, `interval` or `cron`.
    pub schedule_type: String,
    pub schedule_config: String,
    /// Registered job type identifier, e.g. `log` or `command`.
    pub job_type: String,
    #[serde(default)]
    pub argument: Option<String>,
    #[serde(default)]
    pub run_count_limit: Option<i64>,
    /// `"[start]::[end]"`, each side formatted with the scheduler date format.
    #[serde(default)]
    pub run_time_limit: Option<String>,
    #[serde(default)]
    pub reentrant: Option<bool>,
}

fn default_date_format() -> String {
    DateFormat::DEFAULT_PATTERN.to_string()
}
fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.db", home)
}

impl CadenceConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `CADENCE_SCHEDULER__MAX_WORKERS=4`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CadenceConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CADENCE_").split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        tracing::debug!(path = %path, jobs = config.jobs.len(), "configuration loaded");
        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("tempfile");
        file.write_all(body.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = CadenceConfig::load(Some("/nonexistent/cadence.toml")).unwrap();
        assert_eq!(config.scheduler.date_format, "yyyy-MM-dd HH:mm");
        assert_eq!(config.scheduler.store, StoreKind::Config);
        assert_eq!(config.scheduler.max_workers, DEFAULT_MAX_WORKERS);
        assert!(config.jobs.is_empty());
    }

    #[test]
    fn jobs_are_parsed() {
        let file = write_config(
            r#"
            [scheduler]
            timezone = "utc"
            store = "sqlite"

            [[jobs]]
            name = "cleanup"
            schedule_type = "cron"
            schedule_config = "0 3 * * *"
            job_type = "log"
            argument = "cleaning up"
            run_count_limit = 10
            run_time_limit = "2024-01-01 00:00::2030-01-01 00:00"

            [[jobs]]
            name = "heartbeat"
            schedule_type = "interval"
            schedule_config = "30 s"
            job_type = "log"
            reentrant = true
            "#,
        );
        let path = file.path().to_str().unwrap().to_string();
        let config = CadenceConfig::load(Some(&path)).unwrap();

        assert_eq!(config.scheduler.timezone, Zone::Utc);
        assert_eq!(config.scheduler.store, StoreKind::Sqlite);
        assert_eq!(config.jobs.len(), 2);
        let cleanup = &config.jobs[0];
        assert_eq!(cleanup.name, "cleanup");
        assert_eq!(cleanup.run_count_limit, Some(10));
        assert_eq!(cleanup.argument.as_deref(), Some("cleaning up"));
        assert_eq!(config.jobs[1].reentrant, Some(true));
        assert_eq!(config.jobs[1].run_time_limit, None);
    }

    #[test]
    fn malformed_job_is_config_error() {
        let file = write_config(
            r#"
            [[jobs]]
            name = "broken"
            "#,
        );
        let path = file.path().to_str().unwrap().to_string();
        let err = CadenceConfig::load(Some(&path)).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn settings_build_date_format() {
        let settings = SchedulerSettings {
            timezone: Zone::Utc,
            ..SchedulerSettings::default()
        };
        let fmt = settings.date_format().unwrap();
        assert_eq!(fmt.pattern(), "yyyy-MM-dd HH:mm");
        assert_eq!(fmt.zone(), Zone::Utc);
    }
}
