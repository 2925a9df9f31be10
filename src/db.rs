use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::job::{ExtractionJob, Record};
use crate::walker::RunReport;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS runs (
            id            INTEGER PRIMARY KEY,
            target_url    TEXT NOT NULL,
            job_json      TEXT NOT NULL,
            status        TEXT NOT NULL CHECK(status IN ('ok','failed')),
            pages_visited INTEGER NOT NULL DEFAULT 0,
            record_count  INTEGER NOT NULL DEFAULT 0,
            warnings      INTEGER NOT NULL DEFAULT 0,
            stop_reason   TEXT,
            error         TEXT,
            started_at    TEXT NOT NULL,
            finished_at   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_runs_url ON runs(target_url);

        CREATE TABLE IF NOT EXISTS records (
            id          INTEGER PRIMARY KEY,
            run_id      INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            position    INTEGER NOT NULL,
            record_json TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_records_run ON records(run_id, position);
        ",
    )?;
    Ok(())
}

// ── Saving ──

/// A finished run, successful or not.
pub struct RunEntry<'a> {
    pub job: &'a ExtractionJob,
    pub outcome: Result<&'a RunReport, String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub fn save_run(conn: &Connection, entry: &RunEntry<'_>) -> Result<i64> {
    let job_json = serde_json::to_string(entry.job)?;
    let tx = conn.unchecked_transaction()?;

    let (status, pages, count, warnings, stop, error) = match &entry.outcome {
        Ok(report) => (
            "ok",
            report.pages_visited,
            report.records.len(),
            report.warnings,
            Some(report.stop.as_str()),
            None,
        ),
        Err(e) => ("failed", 0, 0, 0, None, Some(e.clone())),
    };

    tx.execute(
        "INSERT INTO runs (target_url, job_json, status, pages_visited, record_count,
                           warnings, stop_reason, error, started_at, finished_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            entry.job.target_url,
            job_json,
            status,
            pages as i64,
            count as i64,
            warnings as i64,
            stop,
            error,
            entry.started_at.to_rfc3339(),
            entry.finished_at.to_rfc3339(),
        ],
    )?;
    let run_id = tx.last_insert_rowid();

    if let Ok(report) = &entry.outcome {
        let mut stmt = tx.prepare(
            "INSERT INTO records (run_id, position, record_json) VALUES (?1, ?2, ?3)",
        )?;
        for (i, record) in report.records.iter().enumerate() {
            stmt.execute(params![run_id, i as i64, serialize_record(record)?])?;
        }
    }

    tx.commit()?;
    Ok(run_id)
}

fn serialize_record(record: &Record) -> Result<String> {
    Ok(serde_json::to_string(record)?)
}

// ── Reading ──

pub struct RunRow {
    pub id: i64,
    pub target_url: String,
    pub status: String,
    pub pages_visited: i64,
    pub record_count: i64,
    pub warnings: i64,
    pub stop_reason: Option<String>,
    pub error: Option<String>,
    pub started_at: String,
    pub finished_at: String,
}

pub fn fetch_runs(conn: &Connection, limit: usize) -> Result<Vec<RunRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, target_url, status, pages_visited, record_count, warnings,
                stop_reason, error, started_at, finished_at
         FROM runs
         ORDER BY id DESC
         LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit as i64], |row| {
            Ok(RunRow {
                id: row.get(0)?,
                target_url: row.get(1)?,
                status: row.get(2)?,
                pages_visited: row.get(3)?,
                record_count: row.get(4)?,
                warnings: row.get(5)?,
                stop_reason: row.get(6)?,
                error: row.get(7)?,
                started_at: row.get(8)?,
                finished_at: row.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Stored records of a run as JSON values, in extraction order. `None` if
/// the run does not exist.
pub fn fetch_records(conn: &Connection, run_id: i64) -> Result<Option<Vec<serde_json::Value>>> {
    let exists = conn
        .query_row("SELECT 1 FROM runs WHERE id = ?1", params![run_id], |_| Ok(()))
        .optional()?;
    if exists.is_none() {
        return Ok(None);
    }

    let mut stmt =
        conn.prepare("SELECT record_json FROM records WHERE run_id = ?1 ORDER BY position")?;
    let raw = stmt
        .query_map(params![run_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let values = raw
        .iter()
        .map(|json| serde_json::from_str(json))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(values))
}

// ── Stats ──

pub struct Stats {
    pub runs: usize,
    pub ok: usize,
    pub failed: usize,
    pub records: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let runs: usize = conn.query_row("SELECT COUNT(*) FROM runs", [], |r| r.get(0))?;
    let failed: usize =
        conn.query_row("SELECT COUNT(*) FROM runs WHERE status = 'failed'", [], |r| r.get(0))?;
    let records: usize = conn.query_row("SELECT COUNT(*) FROM records", [], |r| r.get(0))?;
    Ok(Stats {
        runs,
        ok: runs - failed,
        failed,
        records,
    })
}
