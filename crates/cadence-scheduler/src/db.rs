use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `scheduler_jobs` table (idempotent). Timestamps are stored as
/// RFC 3339 text, booleans as integers.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS scheduler_jobs (
            job_name             TEXT    NOT NULL PRIMARY KEY,
            schedule_type        TEXT    NOT NULL,
            schedule_config      TEXT    NOT NULL,
            job_type             TEXT    NOT NULL,
            argument             TEXT,
            run_count            INTEGER NOT NULL DEFAULT 0,
            run_count_limit      INTEGER NOT NULL DEFAULT -1,  -- -1 means unlimited
            last_run_time        TEXT,
            run_time_limit_start TEXT,
            run_time_limit_end   TEXT,
            auto_clean           INTEGER NOT NULL DEFAULT 0,
            reentrant            INTEGER NOT NULL DEFAULT 0,
            enabled              INTEGER NOT NULL DEFAULT 0,
            updated_at           TEXT    NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}
