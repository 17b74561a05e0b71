// End-to-end tests driving the built `tolldata` binary against the pipeline
// fixtures.
//
// Run with: cargo test -p tolldata-cli --test cli_tests -- --nocapture

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

fn tolldata() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_tolldata"));
    cmd.env_remove("RUST_LOG");
    cmd
}

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../pipeline/tests/fixtures")
}

fn layout() -> String {
    fixtures_dir().join("tolldata.toml").to_string_lossy().into_owned()
}

fn path_str(p: &Path) -> &str {
    p.to_str().unwrap()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn count_rows(db: &Path) -> i64 {
    let conn = rusqlite::Connection::open(db).unwrap();
    conn.query_row("SELECT COUNT(*) FROM tolldata_fact", [], |r| r.get(0))
        .unwrap()
}

// ===========================================================================
// validate
// ===========================================================================

#[test]
fn validate_accepts_fixture_layout() {
    let output = tolldata().args(["validate", layout().as_str()]).output().unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let err = stderr(&output);
    assert!(err.contains("layout_version 1 ok"), "{err}");
    assert!(err.contains("payment"), "{err}");
}

#[test]
fn validate_rejects_unknown_layout_version() {
    let dir = TempDir::new().unwrap();
    let text = std::fs::read_to_string(layout())
        .unwrap()
        .replace("layout_version = 1", "layout_version = 2");
    let path = dir.path().join("tolldata.toml");
    std::fs::write(&path, text).unwrap();

    let output = tolldata().args(["validate", path_str(&path)]).output().unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(stderr(&output).contains("hint:"));
}

// ===========================================================================
// run
// ===========================================================================

#[test]
fn run_loads_sqlite_and_reports_json() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("tolldata.db");
    let sink = format!("sqlite:{}", path_str(&db));

    let output = tolldata()
        .args(["run", layout().as_str(), "--sink", sink.as_str(), "--json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["summary"]["loaded"], 6);
    assert_eq!(report["summary"]["issues"]["malformed_record"], 1);
    assert_eq!(report["gaps"][0]["row_id"], "6");
    assert_eq!(count_rows(&db), 6);
}

#[test]
fn run_writes_csv_and_reports() {
    let dir = TempDir::new().unwrap();
    let csv = dir.path().join("transformed_data.csv");
    let report = dir.path().join("report.json");
    let gaps = dir.path().join("gaps.json");

    let output = tolldata()
        .args([
            "run",
            layout().as_str(),
            "--sink",
            format!("csv:{}", path_str(&csv)).as_str(),
            "--output",
            path_str(&report),
            "--gaps",
            path_str(&gaps),
        ])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(output.stdout.is_empty(), "stdout stays empty without --json");

    let text = std::fs::read_to_string(&csv).unwrap();
    assert_eq!(text.lines().count(), 7);
    assert!(text.contains("7,2021-08-19 22:36:38,132871,TRUCK,6,4154,PC2C2EF9E,PTP,VC412"));

    let gaps: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&gaps).unwrap()).unwrap();
    assert_eq!(gaps.as_array().unwrap().len(), 1);
    let report: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(report["meta"]["config_name"], "tolldata");
}

#[test]
fn failed_run_keeps_existing_csv_output() {
    let dir = TempDir::new().unwrap();
    let csv = dir.path().join("transformed_data.csv");
    std::fs::write(&csv, "rowid,event_ts\n1,earlier run\n").unwrap();
    let sink = format!("csv:{}", path_str(&csv));

    let output = tolldata()
        .args(["run", layout().as_str(), "--staging", path_str(dir.path()), "--sink", sink.as_str()])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4), "stderr: {}", stderr(&output));
    assert_eq!(std::fs::read_to_string(&csv).unwrap(), "rowid,event_ts\n1,earlier run\n");
}

#[test]
fn run_fail_on_issues_exits_8() {
    let dir = TempDir::new().unwrap();
    let sink = format!("csv:{}", path_str(&dir.path().join("out.csv")));
    let output = tolldata()
        .args(["run", layout().as_str(), "--sink", sink.as_str(), "--fail-on-issues"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(8));
    assert!(stderr(&output).contains("3 issue(s) recorded"), "{}", stderr(&output));
}

#[test]
fn run_without_sink_is_a_usage_error() {
    let output = tolldata().args(["run", layout().as_str()]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("no sink configured"));
}

#[test]
fn run_aborts_on_bad_value_unless_skipping() {
    let staging = TempDir::new().unwrap();
    for name in ["tollplaza-data.tsv", "payment-data.txt"] {
        std::fs::copy(fixtures_dir().join(name), staging.path().join(name)).unwrap();
    }
    let vehicle = std::fs::read_to_string(fixtures_dir().join("vehicle-data.csv"))
        .unwrap()
        .replace("129538,Van,2,", "129538,Van,two,");
    std::fs::write(staging.path().join("vehicle-data.csv"), vehicle).unwrap();

    let db = staging.path().join("out.db");
    let sink = format!("sqlite:{}", path_str(&db));
    let layout = layout();
    let base = ["run", layout.as_str(), "--staging", path_str(staging.path()), "--sink", sink.as_str()];

    let output = tolldata().args(base).output().unwrap();
    assert_eq!(output.status.code(), Some(6));
    assert!(stderr(&output).contains("number_of_axles"), "{}", stderr(&output));

    let output = tolldata().args(base).args(["--on-error", "skip"]).output().unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(count_rows(&db), 5);
}

// ===========================================================================
// extract → consolidate → load
// ===========================================================================

#[test]
fn stages_run_through_explicit_artifacts() {
    let dir = TempDir::new().unwrap();
    let mut inputs = Vec::new();
    for source in ["vehicle", "tollplaza", "payment"] {
        let out = dir.path().join(format!("{source}.projected.csv"));
        let output = tolldata()
            .args(["extract", layout().as_str(), "--source", source, "--output", path_str(&out)])
            .output()
            .unwrap();
        assert!(output.status.success(), "{source}: {}", stderr(&output));
        inputs.push(format!("{source}={}", path_str(&out)));
    }

    let unified = dir.path().join("unified.csv");
    let gaps = dir.path().join("gaps.json");
    let report = dir.path().join("consolidate.report.json");
    let mut cmd = tolldata();
    cmd.args(["consolidate", layout().as_str()]);
    for input in &inputs {
        cmd.args(["--input", input.as_str()]);
    }
    let output = cmd
        .args(["--output", path_str(&unified), "--gaps", path_str(&gaps), "--report", path_str(&report)])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("6 unified, 1 gaps, 1 duplicates"), "{}", stderr(&output));

    let report: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(report["summary"]["unified"], 6);
    assert_eq!(report["summary"]["issues"]["join_gap"], 1);
    assert_eq!(report["duplicates"][0]["row_id"], "3");

    let db = dir.path().join("tolldata.db");
    let output = tolldata()
        .args([
            "load",
            layout().as_str(),
            "--input",
            path_str(&unified),
            "--sink",
            format!("sqlite:{}", path_str(&db)).as_str(),
        ])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(count_rows(&db), 6);

    // Loading the same unified file again leaves the table as it was
    let load_report = dir.path().join("load.report.json");
    let output = tolldata()
        .args([
            "load",
            layout().as_str(),
            "--input",
            path_str(&unified),
            "--sink",
            format!("sqlite:{}", path_str(&db)).as_str(),
            "--report",
            path_str(&load_report),
        ])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(count_rows(&db), 6);
    let report: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&load_report).unwrap()).unwrap();
    assert_eq!(report["summary"]["normalized"], 6);
}

#[test]
fn extract_unknown_source_lists_known_ones() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("x.csv");
    let output = tolldata()
        .args(["extract", layout().as_str(), "--source", "bridge", "--output", path_str(&out)])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("vehicle, tollplaza, payment"), "{}", stderr(&output));
}

#[test]
fn consolidate_requires_every_source() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("unified.csv");
    let output = tolldata()
        .args(["consolidate", layout().as_str(), "--input", "vehicle=v.csv", "--output", path_str(&out)])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("missing --input"), "{}", stderr(&output));
}
