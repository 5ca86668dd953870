//! Integration tests for the forge-pipeline CLI binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn forge_pipeline() -> Command {
    Command::cargo_bin("forge-pipeline").unwrap()
}

fn temp_db() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("forge-pipeline.db");
    (dir, db_path)
}

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        forge_pipeline().arg("--help").assert().success();
    }

    #[test]
    fn test_confirm_requires_github_token() {
        let (_dir, db_path) = temp_db();

        forge_pipeline()
            .env_remove("GITHUB_TOKEN")
            .env("FORGE_DB_PATH", &db_path)
            .arg("confirm")
            .arg("--project-id")
            .arg("1")
            .arg("--project-node-id")
            .arg("PVT_1")
            .arg("--title")
            .arg("Example")
            .arg("--user-story")
            .arg("As a user I want X")
            .assert()
            .failure()
            .stderr(predicate::str::contains("GITHUB_TOKEN"));
    }

    #[test]
    fn test_confirm_rejects_unknown_priority() {
        let (_dir, db_path) = temp_db();

        forge_pipeline()
            .env("GITHUB_TOKEN", "ghp_test")
            .env("FORGE_DB_PATH", &db_path)
            .arg("confirm")
            .arg("--project-id")
            .arg("1")
            .arg("--project-node-id")
            .arg("PVT_1")
            .arg("--title")
            .arg("Example")
            .arg("--user-story")
            .arg("As a user I want X")
            .arg("--priority")
            .arg("urgent")
            .assert()
            .failure()
            .stderr(predicate::str::contains("unknown priority"));
    }
}

mod poll {
    use super::*;

    #[test]
    fn test_poll_status_reports_no_running_process() {
        let (_dir, db_path) = temp_db();

        forge_pipeline()
            .env("GITHUB_TOKEN", "ghp_test")
            .env("FORGE_DB_PATH", &db_path)
            .arg("poll")
            .arg("status")
            .arg("--project-id")
            .arg("1")
            .assert()
            .success()
            .stdout(predicate::str::contains("no reconciliation loop is running"));
    }

    #[test]
    fn test_poll_stop_reports_no_running_process() {
        let (_dir, db_path) = temp_db();

        forge_pipeline()
            .env("GITHUB_TOKEN", "ghp_test")
            .env("FORGE_DB_PATH", &db_path)
            .arg("poll")
            .arg("stop")
            .arg("--project-id")
            .arg("1")
            .assert()
            .success()
            .stdout(predicate::str::contains("no reconciliation loop is running"));
    }
}

mod state_and_config {
    use super::*;

    #[test]
    fn test_state_list_empty() {
        let (_dir, db_path) = temp_db();

        forge_pipeline()
            .env("GITHUB_TOKEN", "ghp_test")
            .env("FORGE_DB_PATH", &db_path)
            .arg("state")
            .arg("list")
            .assert()
            .success()
            .stdout(predicate::str::contains("[]"));
    }

    #[test]
    fn test_state_show_missing_issue() {
        let (_dir, db_path) = temp_db();

        forge_pipeline()
            .env("GITHUB_TOKEN", "ghp_test")
            .env("FORGE_DB_PATH", &db_path)
            .arg("state")
            .arg("show")
            .arg("--issue-number")
            .arg("42")
            .assert()
            .success()
            .stdout(predicate::str::contains("no pipeline state recorded"));
    }

    #[test]
    fn test_config_show_missing_project() {
        let (_dir, db_path) = temp_db();

        forge_pipeline()
            .env("GITHUB_TOKEN", "ghp_test")
            .env("FORGE_DB_PATH", &db_path)
            .arg("config")
            .arg("--project-id")
            .arg("does-not-exist")
            .assert()
            .success()
            .stdout(predicate::str::contains("no configuration stored"));
    }

    #[test]
    fn test_transitions_empty() {
        let (_dir, db_path) = temp_db();

        forge_pipeline()
            .env("GITHUB_TOKEN", "ghp_test")
            .env("FORGE_DB_PATH", &db_path)
            .arg("transitions")
            .assert()
            .success()
            .stdout(predicate::str::contains("[]"));
    }
}
