//! Two-tier configuration store: an in-memory cache in front of a SQLite
//! `project_settings` table. Writes go through and invalidate the cache;
//! reads are served from the cache when present. `workflow_config` is the
//! preferred JSON column; `agent_pipeline_mappings` is a legacy column kept
//! for backfill when only agent mappings were ever persisted.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use crate::workflow::models::WorkflowConfiguration;

/// Canonical synthetic user id for project-scoped (non-user) configuration,
/// so the `(user, project)` key stays deterministic.
pub const WORKFLOW_USER_ID: &str = "__workflow__";

pub struct ConfigStore {
    conn: Mutex<Connection>,
    cache: Mutex<HashMap<String, WorkflowConfiguration>>,
}

impl ConfigStore {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open config store database")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory config store")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            PRAGMA busy_timeout = 5000;
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS project_settings (
                github_user_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                workflow_config TEXT,
                agent_pipeline_mappings TEXT,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (github_user_id, project_id)
            );
            ",
        )
        .context("failed to create project_settings table")?;
        Ok(Self {
            conn: Mutex::new(conn),
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn load(&self, project_id: &str) -> Result<Option<WorkflowConfiguration>> {
        if let Some(cached) = self.cache.lock().unwrap().get(project_id) {
            return Ok(Some(cached.clone()));
        }

        let conn = self.conn.lock().unwrap();
        let row: Option<(Option<String>, Option<String>)> = conn
            .query_row(
                "SELECT workflow_config, agent_pipeline_mappings FROM project_settings
                 WHERE github_user_id = ?1 AND project_id = ?2",
                params![WORKFLOW_USER_ID, project_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("failed to query project_settings")?;

        let Some((workflow_config_json, legacy_mappings_json)) = row else {
            return Ok(None);
        };

        let config = if let Some(json) = workflow_config_json {
            serde_json::from_str(&json).context("failed to parse workflow_config JSON")?
        } else if let Some(json) = legacy_mappings_json {
            let mappings: HashMap<String, Vec<String>> =
                serde_json::from_str(&json).context("failed to parse legacy agent_pipeline_mappings JSON")?;
            let config = WorkflowConfiguration {
                project_id: project_id.to_string(),
                repo_owner: String::new(),
                repo_name: String::new(),
                copilot_assignee: None,
                review_assignee: None,
                status_backlog: "Backlog".to_string(),
                status_ready: "Ready".to_string(),
                status_in_progress: "In Progress".to_string(),
                status_in_review: "In Review".to_string(),
                agent_mappings: mappings,
            };
            // Backfill the preferred column so future loads skip the legacy path.
            drop(conn);
            self.persist(&config)?;
            config
        } else {
            return Ok(None);
        };

        self.cache
            .lock()
            .unwrap()
            .insert(project_id.to_string(), config.clone());
        Ok(Some(config))
    }

    pub fn save(&self, config: &WorkflowConfiguration) -> Result<()> {
        self.persist(config)?;
        self.cache
            .lock()
            .unwrap()
            .insert(config.project_id.clone(), config.clone());
        Ok(())
    }

    fn persist(&self, config: &WorkflowConfiguration) -> Result<()> {
        let workflow_json = serde_json::to_string(config).context("failed to serialize WorkflowConfiguration")?;
        let legacy_json =
            serde_json::to_string(&config.agent_mappings).context("failed to serialize agent_mappings")?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO project_settings (github_user_id, project_id, workflow_config, agent_pipeline_mappings, updated_at)
             VALUES (?1, ?2, ?3, ?4, datetime('now'))
             ON CONFLICT(github_user_id, project_id) DO UPDATE SET
                workflow_config = ?3,
                agent_pipeline_mappings = ?4,
                updated_at = datetime('now')",
            params![WORKFLOW_USER_ID, config.project_id, workflow_json, legacy_json],
        )
        .context("failed to upsert project_settings")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample(project_id: &str) -> WorkflowConfiguration {
        let mut agent_mappings = HashMap::new();
        agent_mappings.insert("Ready".to_string(), vec!["speckit.plan".to_string()]);
        WorkflowConfiguration {
            project_id: project_id.to_string(),
            repo_owner: "o".to_string(),
            repo_name: "r".to_string(),
            copilot_assignee: Some("octocat".to_string()),
            review_assignee: None,
            status_backlog: "Backlog".to_string(),
            status_ready: "Ready".to_string(),
            status_in_progress: "In Progress".to_string(),
            status_in_review: "In Review".to_string(),
            agent_mappings,
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let store = ConfigStore::open_in_memory().unwrap();
        store.save(&sample("proj-1")).unwrap();
        let loaded = store.load("proj-1").unwrap().unwrap();
        assert_eq!(loaded.repo_owner, "o");
        assert_eq!(loaded.agents_for_status("ready"), vec!["speckit.plan".to_string()]);
    }

    #[test]
    fn load_missing_project_returns_none() {
        let store = ConfigStore::open_in_memory().unwrap();
        assert!(store.load("missing").unwrap().is_none());
    }

    #[test]
    fn legacy_agent_pipeline_mappings_column_backfills_workflow_config() {
        let store = ConfigStore::open_in_memory().unwrap();
        let mut mappings = HashMap::new();
        mappings.insert("Ready".to_string(), vec!["speckit.tasks".to_string()]);
        let json = serde_json::to_string(&mappings).unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO project_settings (github_user_id, project_id, agent_pipeline_mappings)
                 VALUES (?1, ?2, ?3)",
                params![WORKFLOW_USER_ID, "legacy-proj", json],
            )
            .unwrap();
        }
        let loaded = store.load("legacy-proj").unwrap().unwrap();
        assert_eq!(loaded.agents_for_status("Ready"), vec!["speckit.tasks".to_string()]);

        // Backfill persisted the preferred column.
        let conn = store.conn.lock().unwrap();
        let workflow_config: Option<String> = conn
            .query_row(
                "SELECT workflow_config FROM project_settings WHERE project_id = ?1",
                params!["legacy-proj"],
                |row| row.get(0),
            )
            .unwrap();
        assert!(workflow_config.is_some());
    }

    #[test]
    fn save_overwrites_cache_on_next_load() {
        let store = ConfigStore::open_in_memory().unwrap();
        store.save(&sample("proj-1")).unwrap();
        let mut updated = sample("proj-1");
        updated.repo_owner = "new-owner".to_string();
        store.save(&updated).unwrap();
        assert_eq!(store.load("proj-1").unwrap().unwrap().repo_owner, "new-owner");
    }
}
