//! Runtime configuration for the pipeline orchestrator.
//!
//! `Config` holds process-wide knobs read from the environment (with
//! `.env` loaded via `dotenvy` in dev). Per-project pipeline configuration
//! (status names, agent mappings, assignees) lives in `WorkflowConfiguration`
//! (see `workflow::models`) and is loaded through the configuration store.

use std::path::PathBuf;

use anyhow::{Context, Result};

/// Process-wide configuration, independent of any single project.
#[derive(Debug, Clone)]
pub struct Config {
    pub github_token: String,
    pub db_path: PathBuf,
    pub polling_interval_seconds: u64,
    pub assignment_grace_period_seconds: u64,
    pub max_assignment_retries: u32,
    pub assignment_retry_base_delay_seconds: u64,
    pub copilot_bot_login: String,
}

impl Config {
    /// Load configuration from the environment, applying defaults for
    /// anything unset. Loads a `.env` file first if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let github_token = std::env::var("GITHUB_TOKEN")
            .context("GITHUB_TOKEN must be set to a valid forge access token")?;

        let db_path = std::env::var("FORGE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("forge-pipeline.db"));

        let polling_interval_seconds = env_u64("FORGE_POLL_INTERVAL_SECONDS", 15)?;
        let assignment_grace_period_seconds = env_u64("FORGE_ASSIGNMENT_GRACE_SECONDS", 60)?;
        let max_assignment_retries = env_u64("FORGE_MAX_ASSIGNMENT_RETRIES", 3)? as u32;
        let assignment_retry_base_delay_seconds = env_u64("FORGE_ASSIGNMENT_RETRY_BASE_SECONDS", 3)?;
        let copilot_bot_login =
            std::env::var("FORGE_COPILOT_LOGIN").unwrap_or_else(|_| "Copilot".to_string());

        Ok(Self {
            github_token,
            db_path,
            polling_interval_seconds,
            assignment_grace_period_seconds,
            max_assignment_retries,
            assignment_retry_base_delay_seconds,
            copilot_bot_login,
        })
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match std::env::var(key) {
        Ok(v) => v
            .parse::<u64>()
            .with_context(|| format!("{key} must be a non-negative integer, got {v:?}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize the tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "GITHUB_TOKEN",
            "FORGE_DB_PATH",
            "FORGE_POLL_INTERVAL_SECONDS",
            "FORGE_ASSIGNMENT_GRACE_SECONDS",
            "FORGE_MAX_ASSIGNMENT_RETRIES",
            "FORGE_ASSIGNMENT_RETRY_BASE_SECONDS",
            "FORGE_COPILOT_LOGIN",
        ] {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn from_env_requires_github_token() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let result = Config::from_env();
        assert!(result.is_err());
    }

    #[test]
    fn from_env_applies_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        unsafe { std::env::set_var("GITHUB_TOKEN", "ghp_test") };
        let config = Config::from_env().unwrap();
        assert_eq!(config.polling_interval_seconds, 15);
        assert_eq!(config.assignment_grace_period_seconds, 60);
        assert_eq!(config.max_assignment_retries, 3);
        assert_eq!(config.copilot_bot_login, "Copilot");
        clear_env();
    }

    #[test]
    fn from_env_overrides_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        unsafe {
            std::env::set_var("GITHUB_TOKEN", "ghp_test");
            std::env::set_var("FORGE_POLL_INTERVAL_SECONDS", "30");
        }
        let config = Config::from_env().unwrap();
        assert_eq!(config.polling_interval_seconds, 30);
        clear_env();
    }
}
