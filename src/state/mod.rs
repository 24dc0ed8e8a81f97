use crate::EntryId;
use rusqlite::{Connection, Row, params};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during journal operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("invalid run status: {0}")]
    InvalidStatus(String),
}

pub type Result<T> = std::result::Result<T, StateError>;

/// Where a recorded run ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Started and not finished. After the process is gone this means it
    /// died without cleaning up.
    Running,
    Done,
    RolledBack,
    Halted,
    Recovered,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Done => "done",
            RunStatus::RolledBack => "rolled_back",
            RunStatus::Halted => "halted",
            RunStatus::Recovered => "recovered",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(RunStatus::Running),
            "done" => Ok(RunStatus::Done),
            "rolled_back" => Ok(RunStatus::RolledBack),
            "halted" => Ok(RunStatus::Halted),
            "recovered" => Ok(RunStatus::Recovered),
            other => Err(StateError::InvalidStatus(other.to_owned())),
        }
    }
}

/// What is known about a run before its first mutation.
#[derive(Debug, Clone, Default)]
pub struct NewRun<'a> {
    pub source: &'a str,
    pub target: Option<&'a str>,
    pub mode: &'a str,
    pub restore_point: Option<&'a str>,
    pub original_branch: Option<&'a str>,
    pub ephemeral_branch: Option<&'a str>,
    pub entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub source: String,
    pub target: Option<String>,
    pub mode: String,
    pub restore_point: Option<String>,
    pub original_branch: Option<String>,
    pub ephemeral_branch: Option<String>,
    pub entries: usize,
    pub commits: usize,
    pub status: RunStatus,
    pub failed_entry: Option<EntryId>,
    pub detail: Option<String>,
}

const COLUMNS: &str = "id, started_at, source, target, mode, restore_point, original_branch,
     ephemeral_branch, entries, commits, status, failed_entry, detail";

/// SQLite-backed run journal.
///
/// A row is written before a run's first repository mutation and finished on
/// every exit path, so a row still `running` marks a run to recover.
pub struct Journal {
    conn: Connection,
}

impl Journal {
    /// Open or create the journal at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                started_at TEXT NOT NULL DEFAULT (datetime('now')),
                finished_at TEXT,
                source TEXT NOT NULL,
                target TEXT,
                mode TEXT NOT NULL,
                restore_point TEXT,
                original_branch TEXT,
                ephemeral_branch TEXT,
                entries INTEGER NOT NULL DEFAULT 0,
                commits INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'running',
                failed_entry INTEGER,
                detail TEXT
            )",
            [],
        )?;
        Ok(Self { conn })
    }

    /// Record a run as started and return its id.
    pub fn begin_run(&mut self, run: &NewRun<'_>) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO runs (source, target, mode, restore_point, original_branch,
                               ephemeral_branch, entries, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'running')",
            params![
                run.source,
                run.target,
                run.mode,
                run.restore_point,
                run.original_branch,
                run.ephemeral_branch,
                run.entries as i64,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn finish_run(
        &mut self,
        id: i64,
        status: RunStatus,
        commits: usize,
        failed_entry: Option<EntryId>,
        detail: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE runs SET status = ?2, commits = ?3, failed_entry = ?4, detail = ?5,
                             finished_at = datetime('now')
             WHERE id = ?1",
            params![
                id,
                status.as_str(),
                commits as i64,
                failed_entry.map(|e| e.0 as i64),
                detail
            ],
        )?;
        Ok(())
    }

    /// Runs that never finished, oldest first.
    pub fn unfinished_runs(&self) -> Result<Vec<RunRecord>> {
        let sql = format!("SELECT {} FROM runs WHERE status = 'running' ORDER BY id", COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], read_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(finish_record).collect()
    }

    /// Most recent runs first.
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let sql = format!("SELECT {} FROM runs ORDER BY id DESC LIMIT ?1", COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![limit as i64], read_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(finish_record).collect()
    }

    pub fn mark_recovered(&mut self, id: i64, detail: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE runs SET status = 'recovered', detail = ?2, finished_at = datetime('now')
             WHERE id = ?1",
            params![id, detail],
        )?;
        Ok(())
    }
}

/// A row with its status still as text.
type RawRecord = (RunRecord, String);

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
    let entries: i64 = row.get(8)?;
    let commits: i64 = row.get(9)?;
    let failed: Option<i64> = row.get(11)?;
    Ok((
        RunRecord {
            id: row.get(0)?,
            started_at: row.get(1)?,
            source: row.get(2)?,
            target: row.get(3)?,
            mode: row.get(4)?,
            restore_point: row.get(5)?,
            original_branch: row.get(6)?,
            ephemeral_branch: row.get(7)?,
            entries: entries.max(0) as usize,
            commits: commits.max(0) as usize,
            status: RunStatus::Running,
            failed_entry: failed.map(|n| EntryId(n.max(0) as usize)),
            detail: row.get(12)?,
        },
        row.get(10)?,
    ))
}

fn finish_record((mut record, status): RawRecord) -> Result<RunRecord> {
    record.status = RunStatus::parse(&status)?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample<'a>() -> NewRun<'a> {
        NewRun {
            source: "git-branch",
            target: Some("main"),
            mode: "normal",
            restore_point: Some("abc123"),
            original_branch: Some("main"),
            ephemeral_branch: Some("git-split-draft-1-00000000"),
            entries: 3,
        }
    }

    #[test]
    fn open_creates_db() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("journal.db");
        let journal = Journal::open(&db_path).unwrap();
        assert!(db_path.exists());

        let count: i64 = journal
            .conn
            .query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn started_run_is_unfinished_until_finished() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::open(&dir.path().join("journal.db")).unwrap();

        let id = journal.begin_run(&sample()).unwrap();
        let open = journal.unfinished_runs().unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, id);
        assert_eq!(open[0].restore_point.as_deref(), Some("abc123"));
        assert_eq!(open[0].status, RunStatus::Running);

        journal
            .finish_run(id, RunStatus::RolledBack, 0, Some(EntryId(2)), Some("apply failed"))
            .unwrap();
        assert!(journal.unfinished_runs().unwrap().is_empty());

        let recent = journal.recent_runs(5).unwrap();
        assert_eq!(recent[0].status, RunStatus::RolledBack);
        assert_eq!(recent[0].failed_entry, Some(EntryId(2)));
        assert_eq!(recent[0].detail.as_deref(), Some("apply failed"));
    }

    #[test]
    fn recent_runs_are_newest_first_and_limited() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::open(&dir.path().join("journal.db")).unwrap();
        let first = journal.begin_run(&sample()).unwrap();
        let second = journal.begin_run(&NewRun { mode: "step", ..sample() }).unwrap();
        journal.finish_run(first, RunStatus::Done, 3, None, None).unwrap();

        let recent = journal.recent_runs(1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, second);
        assert_eq!(recent[0].mode, "step");
    }

    #[test]
    fn recovered_runs_leave_the_unfinished_list() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::open(&dir.path().join("journal.db")).unwrap();
        let id = journal.begin_run(&sample()).unwrap();
        journal.mark_recovered(id, "rolled back to abc123").unwrap();
        assert!(journal.unfinished_runs().unwrap().is_empty());
        assert_eq!(journal.recent_runs(1).unwrap()[0].status, RunStatus::Recovered);
    }

    #[test]
    fn unknown_status_is_an_error() {
        assert!(RunStatus::parse("exploded").is_err());
        assert_eq!(RunStatus::parse("rolled_back").unwrap(), RunStatus::RolledBack);
    }
}
