//! Append-only audit log of workflow transitions. An in-memory vector is
//! the fast path for `get_transitions`; every append is also written
//! through to a `workflow_transitions` table so the log survives a restart.

use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};

use crate::workflow::models::{TriggeredBy, WorkflowTransition};

pub struct TransitionLog {
    conn: Mutex<Connection>,
    cache: Mutex<Vec<WorkflowTransition>>,
}

impl TransitionLog {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open transition log database")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory transition log")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS workflow_transitions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                issue_id INTEGER NOT NULL,
                project_id TEXT NOT NULL,
                from_status TEXT,
                to_status TEXT NOT NULL,
                triggered_by TEXT NOT NULL,
                success INTEGER NOT NULL,
                error TEXT,
                assigned_user TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )
        .context("failed to create workflow_transitions table")?;

        let mut cache = Vec::new();
        {
            let mut stmt = conn
                .prepare(
                    "SELECT issue_id, project_id, from_status, to_status, triggered_by, success, error, assigned_user, created_at
                     FROM workflow_transitions ORDER BY id",
                )
                .context("failed to prepare transition load")?;
            let rows = stmt
                .query_map([], |row| {
                    let triggered_by: String = row.get(4)?;
                    Ok(WorkflowTransition {
                        issue_id: row.get(0)?,
                        project_id: row.get(1)?,
                        from_status: row.get(2)?,
                        to_status: row.get(3)?,
                        triggered_by: parse_triggered_by(&triggered_by),
                        success: row.get::<_, i64>(5)? != 0,
                        error: row.get(6)?,
                        assigned_user: row.get(7)?,
                        created_at: row.get(8)?,
                    })
                })
                .context("failed to query workflow_transitions")?;
            for row in rows {
                cache.push(row.context("failed to read workflow_transitions row")?);
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
            cache: Mutex::new(cache),
        })
    }

    pub fn append(&self, transition: WorkflowTransition) -> Result<()> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO workflow_transitions
                    (issue_id, project_id, from_status, to_status, triggered_by, success, error, assigned_user)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    transition.issue_id,
                    transition.project_id,
                    transition.from_status,
                    transition.to_status,
                    triggered_by_str(transition.triggered_by),
                    transition.success as i64,
                    transition.error,
                    transition.assigned_user,
                ],
            )
            .context("failed to insert workflow_transitions row")?;
        }
        self.cache.lock().unwrap().push(transition);
        Ok(())
    }

    /// Returns the most recent `limit` transitions, optionally filtered to
    /// one issue, oldest-first within the returned slice.
    pub fn get_transitions(&self, issue_id: Option<i64>, limit: usize) -> Vec<WorkflowTransition> {
        let cache = self.cache.lock().unwrap();
        let filtered: Vec<&WorkflowTransition> = cache
            .iter()
            .filter(|t| issue_id.map(|id| t.issue_id == id).unwrap_or(true))
            .collect();
        let start = filtered.len().saturating_sub(limit);
        filtered[start..].iter().map(|t| (*t).clone()).collect()
    }
}

fn triggered_by_str(triggered_by: TriggeredBy) -> &'static str {
    match triggered_by {
        TriggeredBy::Automatic => "automatic",
        TriggeredBy::Detection => "detection",
        TriggeredBy::Manual => "manual",
    }
}

fn parse_triggered_by(s: &str) -> TriggeredBy {
    match s {
        "detection" => TriggeredBy::Detection,
        "manual" => TriggeredBy::Manual,
        _ => TriggeredBy::Automatic,
    }
}
