//! Integration tests for the atelier CLI
//!
//! These exercise the compiled binary: flag parsing, `atelier.toml` loading,
//! and database/data-directory initialization.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create an atelier Command
fn atelier() -> Command {
    cargo_bin_cmd!("atelier")
}

/// Helper to create a temporary working directory
fn create_temp_dir() -> TempDir {
    TempDir::new().unwrap()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_atelier_help() {
        atelier().arg("--help").assert().success();
    }

    #[test]
    fn test_atelier_version() {
        atelier().arg("--version").assert().success();
    }

    #[test]
    fn test_help_lists_subcommands() {
        atelier()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("init-db"));
    }

    #[test]
    fn test_serve_rejects_non_numeric_port() {
        atelier()
            .arg("serve")
            .arg("--port")
            .arg("not-a-port")
            .assert()
            .failure();
    }

    #[test]
    fn test_unknown_subcommand_fails() {
        atelier().arg("frobnicate").assert().failure();
    }
}

// =============================================================================
// Database Initialization Tests
// =============================================================================

mod init_db {
    use super::*;

    #[test]
    fn test_init_db_creates_default_layout() {
        let dir = create_temp_dir();

        atelier()
            .current_dir(dir.path())
            .arg("init-db")
            .assert()
            .success()
            .stdout(predicate::str::contains("Database initialized at"));

        assert!(dir.path().join(".atelier/atelier.db").exists());
        assert!(dir.path().join(".atelier/artifacts").exists());
    }

    #[test]
    fn test_init_db_explicit_path() {
        let dir = create_temp_dir();
        let db_path = dir.path().join("nested/preview.db");

        atelier()
            .current_dir(dir.path())
            .arg("init-db")
            .arg("--db-path")
            .arg(&db_path)
            .assert()
            .success()
            .stdout(predicate::str::contains("preview.db"));

        assert!(db_path.exists());
    }

    #[test]
    fn test_init_db_idempotent() {
        let dir = create_temp_dir();

        atelier()
            .current_dir(dir.path())
            .arg("init-db")
            .assert()
            .success();

        // Second run against the same database should also succeed
        atelier()
            .current_dir(dir.path())
            .arg("init-db")
            .assert()
            .success();
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_init_db_respects_config_data_dir() {
        let dir = create_temp_dir();
        fs::write(
            dir.path().join("atelier.toml"),
            "[server]\ndata_dir = \"preview-data\"\n",
        )
        .unwrap();

        atelier()
            .current_dir(dir.path())
            .arg("init-db")
            .assert()
            .success()
            .stdout(predicate::str::contains("preview-data"));

        assert!(dir.path().join("preview-data/atelier.db").exists());
        assert!(dir.path().join("preview-data/artifacts").exists());
    }

    #[test]
    fn test_init_db_rejects_malformed_config() {
        let dir = create_temp_dir();
        fs::write(dir.path().join("atelier.toml"), "[server\nport =").unwrap();

        atelier()
            .current_dir(dir.path())
            .arg("init-db")
            .assert()
            .failure()
            .stderr(predicate::str::contains("atelier.toml"));
    }

    #[test]
    fn test_db_path_flag_overrides_config() {
        let dir = create_temp_dir();
        fs::write(
            dir.path().join("atelier.toml"),
            "[server]\ndata_dir = \"ignored-data\"\n",
        )
        .unwrap();
        let db_path = dir.path().join("explicit.db");

        atelier()
            .current_dir(dir.path())
            .arg("init-db")
            .arg("--db-path")
            .arg(&db_path)
            .assert()
            .success();

        assert!(db_path.exists());
        assert!(!dir.path().join("ignored-data/atelier.db").exists());
    }
}
