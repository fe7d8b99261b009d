//! Integration tests for the SiteCare CLI
//!
//! These tests exercise the CLI commands end-to-end using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Helper to get a sitecare command with a fixed actor
fn sitecare() -> Command {
    let mut cmd = Command::cargo_bin("sitecare").unwrap();
    cmd.env("SITECARE_ACTOR", "inspector-1");
    cmd.env_remove("RUST_LOG");
    cmd
}

/// Helper to create a test project in a temp directory
fn setup_test_project() -> TempDir {
    let tmp = TempDir::new().unwrap();
    sitecare().current_dir(tmp.path()).arg("init").assert().success();
    tmp
}

/// Run a creating command with `--format id` and return the printed id
fn create(tmp: &TempDir, args: &[&str]) -> String {
    let output = sitecare()
        .current_dir(tmp.path())
        .args(args)
        .args(["--format", "id"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "command {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn show_json(tmp: &TempDir, args: &[&str]) -> serde_json::Value {
    let output = sitecare()
        .current_dir(tmp.path())
        .args(args)
        .args(["--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    serde_json::from_slice(&output.stdout).unwrap()
}

fn active_warranty(tmp: &TempDir, start: &str, months: &str) -> String {
    let id = create(
        tmp,
        &[
            "warranty", "new", "-b", "BP-1", "--start", start, "--months", months, "-w", "Acme Build",
        ],
    );
    sitecare()
        .current_dir(tmp.path())
        .args(["warranty", "transition", &id, "active"])
        .assert()
        .success();
    id
}

// ============================================================================
// CLI Basic Tests
// ============================================================================

#[test]
fn test_help_displays() {
    sitecare()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("warranty"))
        .stdout(predicate::str::contains("sweep"));
}

#[test]
fn test_version_displays() {
    sitecare()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sitecare"));
}

#[test]
fn test_init_creates_project() {
    let tmp = TempDir::new().unwrap();
    sitecare()
        .current_dir(tmp.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized SiteCare project"));

    assert!(tmp.path().join(".sitecare/config.yaml").exists());
    assert!(tmp.path().join(".sitecare/store.db").exists());
}

#[test]
fn test_init_twice_reports_existing_project() {
    let tmp = setup_test_project();
    sitecare()
        .current_dir(tmp.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
}

#[test]
fn test_commands_outside_project_fail() {
    let tmp = TempDir::new().unwrap();
    sitecare()
        .current_dir(tmp.path())
        .args(["issue", "list", "-b", "BP-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a SiteCare project"));
}

#[test]
fn test_completions_bash() {
    sitecare()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sitecare"));
}

// ============================================================================
// Issues
// ============================================================================

#[test]
fn test_issue_new_list_show() {
    let tmp = setup_test_project();
    let id = create(
        &tmp,
        &["issue", "new", "-b", "BP-1", "-t", "Cracked tile in lobby", "-S", "major"],
    );
    assert!(id.starts_with("ISS-"));

    sitecare()
        .current_dir(tmp.path())
        .args(["issue", "list", "-b", "BP-1", "--format", "tsv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cracked tile in lobby"))
        .stdout(predicate::str::contains("ISS-0001"));

    sitecare()
        .current_dir(tmp.path())
        .args(["issue", "show", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("status: open"))
        .stdout(predicate::str::contains("inspector-1"));
}

#[test]
fn test_issue_list_is_scoped_to_blueprint() {
    let tmp = setup_test_project();
    create(&tmp, &["issue", "new", "-b", "BP-1", "-t", "First"]);
    create(&tmp, &["issue", "new", "-b", "BP-2", "-t", "Second"]);

    sitecare()
        .current_dir(tmp.path())
        .args(["issue", "list", "-b", "BP-2", "--format", "tsv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Second"))
        .stdout(predicate::str::contains("First").not());
}

#[test]
fn test_issue_illegal_transition_rejected() {
    let tmp = setup_test_project();
    let id = create(&tmp, &["issue", "new", "-b", "BP-1", "-t", "Leak"]);

    sitecare()
        .current_dir(tmp.path())
        .args(["issue", "transition", &id, "verified"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid issue status transition"));

    let issue = show_json(&tmp, &["issue", "show", &id]);
    assert_eq!(issue["status"], "open");
}

#[test]
fn test_issue_resolve_and_verify() {
    let tmp = setup_test_project();
    let id = create(&tmp, &["issue", "new", "-b", "BP-1", "-t", "Leak"]);

    sitecare()
        .current_dir(tmp.path())
        .args(["issue", "transition", &id, "in_progress"])
        .assert()
        .success();
    sitecare()
        .current_dir(tmp.path())
        .args(["issue", "resolve", &id, "-m", "resealed joint", "--cost", "120"])
        .assert()
        .success()
        .stdout(predicate::str::contains("resolved"));
    sitecare()
        .current_dir(tmp.path())
        .args(["issue", "verify", &id, "-r", "pass"])
        .assert()
        .success();

    let issue = show_json(&tmp, &["issue", "show", &id]);
    assert_eq!(issue["status"], "verified");
    assert_eq!(issue["resolution"]["method"], "resealed joint");
}

#[test]
fn test_invalid_id_prefix_rejected() {
    let tmp = setup_test_project();
    let id = create(&tmp, &["issue", "new", "-b", "BP-1", "-t", "Leak"]);

    sitecare()
        .current_dir(tmp.path())
        .args(["defect", "show", &id])
        .assert()
        .failure();
}

// ============================================================================
// QA defects
// ============================================================================

#[test]
fn test_critical_defect_escalates_to_issue() {
    let tmp = setup_test_project();
    let defect_id = create(
        &tmp,
        &["defect", "new", "-b", "BP-1", "-t", "Exposed rebar", "-S", "critical"],
    );

    let defect = show_json(&tmp, &["defect", "show", &defect_id]);
    let issue_id = defect["linked_issue_id"].as_str().unwrap().to_string();
    assert!(issue_id.starts_with("ISS-"));

    let issue = show_json(&tmp, &["issue", "show", &issue_id]);
    assert_eq!(issue["source"], "qc");
    assert_eq!(issue["source_id"], defect_id.as_str());

    sitecare()
        .current_dir(tmp.path())
        .args(["defect", "escalate", &defect_id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already linked"));
}

#[test]
fn test_defect_progress_syncs_linked_issue() {
    let tmp = setup_test_project();
    let defect_id = create(&tmp, &["defect", "new", "-b", "BP-1", "-t", "Uneven slab"]);
    let issue_id = create(&tmp, &["defect", "escalate", &defect_id]);

    sitecare()
        .current_dir(tmp.path())
        .args(["defect", "assign", &defect_id, "crew-7"])
        .assert()
        .success();
    sitecare()
        .current_dir(tmp.path())
        .args(["defect", "transition", &defect_id, "in_progress"])
        .assert()
        .success();

    let issue = show_json(&tmp, &["issue", "show", &issue_id]);
    assert_eq!(issue["status"], "in_progress");
}

#[test]
fn test_defect_edit_to_critical_escalates() {
    let tmp = setup_test_project();
    let defect_id = create(&tmp, &["defect", "new", "-b", "BP-1", "-t", "Hairline crack"]);
    let before = show_json(&tmp, &["defect", "show", &defect_id]);
    assert!(before["linked_issue_id"].is_null());

    sitecare()
        .current_dir(tmp.path())
        .args(["defect", "edit", &defect_id, "--severity", "critical"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Updated QA defect"));

    let after = show_json(&tmp, &["defect", "show", &defect_id]);
    assert_eq!(after["severity"], "critical");
    assert_eq!(after["status"], "open");
    assert!(after["linked_issue_id"].as_str().unwrap().starts_with("ISS-"));
    assert_ne!(after["deadline"], before["deadline"]);
}

#[test]
fn test_issue_edit_keeps_status() {
    let tmp = setup_test_project();
    let issue_id = create(&tmp, &["issue", "new", "-b", "BP-1", "-t", "Loose rail"]);

    sitecare()
        .current_dir(tmp.path())
        .args(["issue", "edit", &issue_id, "-t", "Loose handrail, stair 2", "-S", "major"])
        .assert()
        .success();

    let issue = show_json(&tmp, &["issue", "show", &issue_id]);
    assert_eq!(issue["title"], "Loose handrail, stair 2");
    assert_eq!(issue["severity"], "major");
    assert_eq!(issue["status"], "open");
}

#[test]
fn test_invalid_config_is_reported() {
    let tmp = setup_test_project();
    std::fs::write(
        tmp.path().join(".sitecare").join("config.yaml"),
        "sla:\n  critical: 0\n",
    )
    .unwrap();

    sitecare()
        .current_dir(tmp.path())
        .args(["issue", "list", "-b", "BP-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("out of range"));
}

#[test]
fn test_defect_overdue_empty_for_fresh_defects() {
    let tmp = setup_test_project();
    create(&tmp, &["defect", "new", "-b", "BP-1", "-t", "Scratch", "-S", "low"]);

    sitecare()
        .current_dir(tmp.path())
        .args(["defect", "overdue", "-b", "BP-1", "--format", "id"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

// ============================================================================
// Warranties, claims and repairs
// ============================================================================

#[test]
fn test_warranty_new_starts_pending() {
    let tmp = setup_test_project();
    let id = create(
        &tmp,
        &[
            "warranty", "new", "-b", "BP-1", "--start", "2025-01-31", "--months", "1", "-w", "Acme",
        ],
    );
    let warranty = show_json(&tmp, &["warranty", "show", &id]);
    assert_eq!(warranty["status"], "pending");
    assert_eq!(warranty["end_date"], "2025-02-28");
}

#[test]
fn test_claim_rejected_on_pending_warranty() {
    let tmp = setup_test_project();
    let id = create(
        &tmp,
        &[
            "warranty", "new", "-b", "BP-1", "--start", "2025-01-01", "--months", "24", "-w", "Acme",
        ],
    );

    sitecare()
        .current_dir(tmp.path())
        .args(["claim", "report", "-w", &id, "-t", "Door sticks"])
        .assert()
        .failure();
}

#[test]
fn test_repair_flow_moves_claim_and_counters() {
    let tmp = setup_test_project();
    let warranty_id = active_warranty(&tmp, "2025-01-01", "600");

    let claim_id = create(&tmp, &["claim", "report", "-w", &warranty_id, "-t", "Roof leak"]);
    sitecare()
        .current_dir(tmp.path())
        .args(["claim", "transition", &claim_id, "confirmed"])
        .assert()
        .success();

    let repair_id = create(
        &tmp,
        &[
            "repair", "new", "--claim", &claim_id, "-d", "Replace flashing", "--contractor", "Roofers Ltd",
        ],
    );
    for args in [
        vec!["repair", "start", repair_id.as_str()],
        vec!["repair", "complete", repair_id.as_str(), "--cost", "800"],
        vec!["repair", "verify", repair_id.as_str()],
    ] {
        sitecare().current_dir(tmp.path()).args(&args).assert().success();
    }

    let claim = show_json(&tmp, &["claim", "show", &claim_id]);
    assert_eq!(claim["status"], "verified");

    let warranty = show_json(&tmp, &["warranty", "show", &warranty_id]);
    assert_eq!(warranty["defect_count"], 1);
    assert_eq!(warranty["repair_count"], 1);

    sitecare()
        .current_dir(tmp.path())
        .args(["reconcile", "-w", &warranty_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("consistent"));
}

#[test]
fn test_sweep_expires_lapsed_warranty() {
    let tmp = setup_test_project();
    let id = active_warranty(&tmp, "2000-01-01", "12");

    sitecare()
        .current_dir(tmp.path())
        .args(["sweep", "-b", "BP-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 expired"));

    let warranty = show_json(&tmp, &["warranty", "show", &id]);
    assert_eq!(warranty["status"], "expired");

    // A second sweep has nothing left to move
    sitecare()
        .current_dir(tmp.path())
        .args(["sweep", "-b", "BP-1", "--format", "id"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_status_dashboard() {
    let tmp = setup_test_project();
    create(&tmp, &["issue", "new", "-b", "BP-1", "-t", "Leak"]);
    create(&tmp, &["defect", "new", "-b", "BP-1", "-t", "Crack"]);

    sitecare()
        .current_dir(tmp.path())
        .args(["status", "-b", "BP-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Issues"))
        .stdout(predicate::str::contains("QA defects"));

    let status = show_json(&tmp, &["status", "-b", "BP-1"]);
    assert_eq!(status["issues"]["total"], 1);
    assert_eq!(status["qa_defects"]["total"], 1);
}
