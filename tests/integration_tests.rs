//! End-to-end integration tests driving the `geoffrussy` binary through
//! its CLI surface: init, status, phases, stats, checkpoints, blockers,
//! quota, detours, and config.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn geoffrussy() -> Command {
    cargo_bin_cmd!("geoffrussy")
}

fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

/// Checkpoints require the project directory to be a git repository;
/// `GitTagger::open` errors otherwise.
fn init_git_repo(dir: &TempDir) {
    std::process::Command::new("git")
        .args(["init", "--quiet"])
        .current_dir(dir.path())
        .status()
        .unwrap();
    std::process::Command::new("git")
        .args(["config", "user.email", "test@example.com"])
        .current_dir(dir.path())
        .status()
        .unwrap();
    std::process::Command::new("git")
        .args(["config", "user.name", "test"])
        .current_dir(dir.path())
        .status()
        .unwrap();
}

fn init_project(dir: &TempDir) {
    geoffrussy()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
}

mod cli_basics {
    use super::*;

    #[test]
    fn help_succeeds() {
        geoffrussy().arg("--help").assert().success();
    }

    #[test]
    fn version_succeeds() {
        geoffrussy().arg("--version").assert().success();
    }

    #[test]
    fn init_creates_state_directory() {
        let dir = create_temp_project();

        geoffrussy()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized geoffrussy project"));

        assert!(dir.path().join(".geoffrussy").exists());
        assert!(dir.path().join(".geoffrussy/state.db").exists());
    }

    #[test]
    fn init_is_idempotent() {
        let dir = create_temp_project();
        init_project(&dir);

        geoffrussy()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success();
    }

    #[test]
    fn status_on_fresh_project_reports_zero_progress() {
        let dir = create_temp_project();
        init_project(&dir);

        geoffrussy()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("0/0 completed"));
    }

    #[test]
    fn phases_on_fresh_project_reports_none() {
        let dir = create_temp_project();
        init_project(&dir);

        geoffrussy()
            .current_dir(dir.path())
            .arg("phases")
            .assert()
            .success()
            .stdout(predicate::str::contains("No phases yet"));
    }

    #[test]
    fn project_dir_flag_targets_another_directory() {
        let dir = create_temp_project();
        let other_dir = create_temp_project();
        init_project(&dir);

        geoffrussy()
            .current_dir(other_dir.path())
            .arg("--project-dir")
            .arg(dir.path())
            .arg("status")
            .assert()
            .success();
    }

    #[test]
    fn verbose_flag_is_accepted() {
        let dir = create_temp_project();
        init_project(&dir);

        geoffrussy()
            .current_dir(dir.path())
            .arg("--verbose")
            .arg("status")
            .assert()
            .success();
    }
}

mod configuration {
    use super::*;

    #[test]
    fn config_show_reports_defaults() {
        let dir = create_temp_project();
        init_project(&dir);

        geoffrussy()
            .current_dir(dir.path())
            .arg("config")
            .arg("show")
            .assert()
            .success()
            .stdout(predicate::str::contains("warning_threshold = 0.8"))
            .stdout(predicate::str::contains("failure_threshold = 3"));
    }

    #[test]
    fn config_init_writes_toml() {
        let dir = create_temp_project();
        init_project(&dir);

        geoffrussy()
            .current_dir(dir.path())
            .arg("config")
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Created"));

        assert!(dir.path().join(".geoffrussy/geoffrussy.toml").exists());
    }

    #[test]
    fn config_init_does_not_clobber_existing_file() {
        let dir = create_temp_project();
        init_project(&dir);

        geoffrussy()
            .current_dir(dir.path())
            .arg("config")
            .arg("init")
            .assert()
            .success();

        geoffrussy()
            .current_dir(dir.path())
            .arg("config")
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn config_show_reflects_custom_budget_limit() {
        let dir = create_temp_project();
        init_project(&dir);

        fs::write(
            dir.path().join(".geoffrussy/geoffrussy.toml"),
            "[budget]\nlimit = 50.0\n",
        )
        .unwrap();

        geoffrussy()
            .current_dir(dir.path())
            .arg("config")
            .arg("show")
            .assert()
            .success()
            .stdout(predicate::str::contains("50.0"));
    }

    #[test]
    fn env_override_changes_budget_limit() {
        let dir = create_temp_project();
        init_project(&dir);

        geoffrussy()
            .current_dir(dir.path())
            .env("GEOFFRUSSY_BUDGET_LIMIT", "250")
            .arg("config")
            .arg("show")
            .assert()
            .success()
            .stdout(predicate::str::contains("250"));
    }
}

mod stats_and_blockers {
    use super::*;

    #[test]
    fn stats_on_fresh_project_reports_zero_tokens() {
        let dir = create_temp_project();
        init_project(&dir);

        geoffrussy()
            .current_dir(dir.path())
            .arg("stats")
            .assert()
            .success()
            .stdout(predicate::str::contains("0 in / 0 out"))
            .stdout(predicate::str::contains("within limits"));
    }

    #[test]
    fn blockers_list_on_fresh_project_reports_none() {
        let dir = create_temp_project();
        init_project(&dir);

        geoffrussy()
            .current_dir(dir.path())
            .arg("blockers")
            .arg("list")
            .assert()
            .success()
            .stdout(predicate::str::contains("Active blockers: 0"));
    }
}

mod quota {
    use super::*;

    #[test]
    fn quota_check_on_fresh_project_reports_no_warning() {
        let dir = create_temp_project();
        init_project(&dir);

        geoffrussy()
            .current_dir(dir.path())
            .arg("quota")
            .arg("check")
            .arg("anthropic")
            .assert()
            .success()
            .stdout(predicate::str::contains("Rate-limit warning:"))
            .stdout(predicate::str::contains("Quota warning:"));
    }
}

mod checkpoints {
    use super::*;

    #[test]
    fn checkpoint_requires_a_git_repository() {
        let dir = create_temp_project();
        init_project(&dir);

        geoffrussy()
            .current_dir(dir.path())
            .arg("checkpoint")
            .arg("create")
            .arg("initial")
            .assert()
            .failure();
    }

    #[test]
    fn checkpoint_create_and_list_round_trip() {
        let dir = create_temp_project();
        init_git_repo(&dir);
        fs::write(dir.path().join("README.md"), "hello").unwrap();
        std::process::Command::new("git")
            .args(["add", "."])
            .current_dir(dir.path())
            .status()
            .unwrap();
        std::process::Command::new("git")
            .args(["commit", "--quiet", "-m", "initial"])
            .current_dir(dir.path())
            .status()
            .unwrap();
        init_project(&dir);

        geoffrussy()
            .current_dir(dir.path())
            .arg("checkpoint")
            .arg("create")
            .arg("milestone-1")
            .assert()
            .success()
            .stdout(predicate::str::contains("Created checkpoint"));

        geoffrussy()
            .current_dir(dir.path())
            .arg("checkpoint")
            .arg("list")
            .assert()
            .success()
            .stdout(predicate::str::contains("milestone-1"));
    }
}

mod detours {
    use super::*;

    #[test]
    fn detour_list_on_fresh_project_is_empty() {
        let dir = create_temp_project();
        init_project(&dir);

        geoffrussy()
            .current_dir(dir.path())
            .arg("detour")
            .arg("list")
            .assert()
            .success();
    }

    #[test]
    fn detour_complete_on_unknown_id_fails() {
        let dir = create_temp_project();
        init_project(&dir);

        geoffrussy()
            .current_dir(dir.path())
            .arg("detour")
            .arg("complete")
            .arg("no-such-detour")
            .assert()
            .failure();
    }
}
