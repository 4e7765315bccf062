//! Integration tests for the prepdesk CLI
//!
//! These drive the real binary against a temporary data directory.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a prepdesk Command isolated from the caller's environment
fn prepdesk(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("prepdesk");
    cmd.current_dir(dir.path())
        .env_remove("PREPDESK_UPSTREAM_URL")
        .env_remove("PREPDESK_UPSTREAM_TOKEN")
        .env_remove("PREPDESK_DB_PATH")
        .env_remove("RUST_LOG");
    cmd
}

fn init_project(dir: &TempDir) {
    prepdesk(dir).arg("init").assert().success();
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        let dir = TempDir::new().unwrap();
        prepdesk(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("worker"))
            .stdout(predicate::str::contains("serve"));
    }

    #[test]
    fn test_version() {
        let dir = TempDir::new().unwrap();
        prepdesk(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_structure() {
        let dir = TempDir::new().unwrap();

        prepdesk(&dir)
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized prepdesk"));

        assert!(dir.path().join(".prepdesk/prepdesk.toml").exists());
        assert!(dir.path().join(".prepdesk/prepdesk.db").exists());
    }

    #[test]
    fn test_init_idempotent() {
        let dir = TempDir::new().unwrap();
        init_project(&dir);

        prepdesk(&dir)
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already initialized"));
    }

    #[test]
    fn test_unknown_subcommand_fails() {
        let dir = TempDir::new().unwrap();
        prepdesk(&dir).arg("teleport").assert().failure();
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = TempDir::new().unwrap();

        prepdesk(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("using defaults"))
            .stdout(predicate::str::contains("port = 3150"));
    }

    #[test]
    fn test_config_init_creates_toml() {
        let dir = TempDir::new().unwrap();

        prepdesk(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created prepdesk.toml"));

        let content = fs::read_to_string(dir.path().join(".prepdesk/prepdesk.toml")).unwrap();
        assert!(content.contains("[upstream]"));
        assert!(content.contains("[lifecycle.mirror.shipped]"));

        prepdesk(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_config_validate_no_config() {
        let dir = TempDir::new().unwrap();

        prepdesk(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Using defaults (valid)"));
    }

    #[test]
    fn test_config_validate_with_warnings() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".prepdesk")).unwrap();
        fs::write(
            dir.path().join(".prepdesk/prepdesk.toml"),
            r#"
[upstream]
base_url = "store.example"

[queue]
statuses = ["under_review", "shipped"]
"#,
        )
        .unwrap();

        prepdesk(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration warnings"))
            .stdout(predicate::str::contains("base_url"))
            .stdout(predicate::str::contains("'shipped'"));
    }

    #[test]
    fn test_config_show_applies_env_and_masks_token() {
        let dir = TempDir::new().unwrap();
        init_project(&dir);

        prepdesk(&dir)
            .env("PREPDESK_UPSTREAM_URL", "https://store.example/api")
            .env("PREPDESK_UPSTREAM_TOKEN", "very-secret")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("https://store.example/api"))
            .stdout(predicate::str::contains("very-secret").not());
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".prepdesk")).unwrap();
        fs::write(dir.path().join(".prepdesk/prepdesk.toml"), "[server\nport = ").unwrap();

        prepdesk(&dir)
            .args(["config", "validate"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to parse prepdesk.toml"));
    }
}

// =============================================================================
// Worker Administration Tests
// =============================================================================

mod workers {
    use super::*;

    #[test]
    fn test_worker_add_list_deactivate() {
        let dir = TempDir::new().unwrap();
        init_project(&dir);

        prepdesk(&dir)
            .args(["worker", "add", "--name", "amal", "--merchant", "7"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created worker 1 (amal)"));

        prepdesk(&dir)
            .args(["worker", "add", "--name", "badr", "--merchant", "7", "--payment-methods", "cod"])
            .assert()
            .success();

        prepdesk(&dir)
            .args(["worker", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("amal"))
            .stdout(predicate::str::contains("filtered-by-payment-method [cod]"));

        prepdesk(&dir)
            .args(["worker", "deactivate", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("deactivated"));

        prepdesk(&dir)
            .args(["worker", "list", "--merchant", "7"])
            .assert()
            .success()
            .stdout(predicate::str::contains("inactive"));
    }

    #[test]
    fn test_worker_list_empty() {
        let dir = TempDir::new().unwrap();

        prepdesk(&dir)
            .args(["worker", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No workers registered"));
    }

    #[test]
    fn test_worker_add_rejects_zero_capacity() {
        let dir = TempDir::new().unwrap();

        prepdesk(&dir)
            .args(["worker", "add", "--name", "amal", "--merchant", "7", "--capacity", "0"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("capacity"));
    }

    #[test]
    fn test_deactivate_unknown_worker_fails() {
        let dir = TempDir::new().unwrap();

        prepdesk(&dir)
            .args(["worker", "deactivate", "42"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("42"));
    }

    #[test]
    fn test_db_path_flag_overrides_config() {
        let dir = TempDir::new().unwrap();

        prepdesk(&dir)
            .args(["--db-path", "elsewhere/desk.db", "worker", "add", "--name", "amal", "--merchant", "7"])
            .assert()
            .success();

        assert!(dir.path().join("elsewhere/desk.db").exists());
        assert!(!dir.path().join(".prepdesk/prepdesk.db").exists());
    }
}
