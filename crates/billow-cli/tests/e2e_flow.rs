//! End-to-end tests driving the `billow` binary against a temp database.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use tempfile::{NamedTempFile, TempDir};

const NOTIFICATIONS: &str = r#"{"type":"focus","exe":"chrome.exe","title":"Inbox","ts":"2025-03-03T09:00:00Z"}
{"type":"tab","url":"https://acme.atlassian.net/browse/PRJ-7","title":"PRJ-7","ts":"2025-03-03T09:00:31Z"}
{"type":"focus","exe":"chrome.exe","title":"PRJ-7 - Jira","ts":"2025-03-03T09:00:31Z"}
{"type":"focus","exe":"EXCEL.EXE","title":"ACME Q3.xlsx","ts":"2025-03-03T09:02:31Z"}
{"type":"focus","exe":"explorer.exe","title":"","ts":"2025-03-03T09:03:31Z"}
{"type":"focus","exe":"EXCEL.EXE","title":"ACME Q3.xlsx","ts":"2025-03-03T09:03:35Z"}
not json at all
{"type":"idle","idle":true,"ts":"2025-03-03T09:05:00Z"}
"#;

struct Workspace {
    _dir: TempDir,
    config: NamedTempFile,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("data").join("billow.db");
        Self::with_database(dir, &db_path)
    }

    fn with_database(dir: TempDir, db_path: &Path) -> Self {
        let mut config = NamedTempFile::new().unwrap();
        writeln!(
            config,
            r#"database_path = "{}"

[relay]
enabled = false

[idle]
enabled = false

[calendar]
endpoint = "http://127.0.0.1:1/calendarView"
"#,
            db_path.display()
        )
        .unwrap();
        config.flush().unwrap();
        Self { _dir: dir, config }
    }

    fn billow(&self, args: &[&str], stdin: Option<&str>) -> Output {
        let mut child = Command::new(env!("CARGO_BIN_EXE_billow"))
            .arg("--config")
            .arg(self.config.path())
            .args(args)
            .env_remove("BILLOW_CALENDAR__ACCESS_TOKEN")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to spawn billow");
        {
            let mut pipe = child.stdin.take().unwrap();
            if let Some(input) = stdin {
                pipe.write_all(input.as_bytes()).unwrap();
            }
        }
        child.wait_with_output().expect("failed to wait for billow")
    }
}

fn stdout_of(output: &Output) -> String {
    assert!(
        output.status.success(),
        "billow failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout.clone()).unwrap()
}

#[test]
fn init_creates_database_with_seeded_rules() {
    let workspace = Workspace::new();
    let stdout = stdout_of(&workspace.billow(&["init"], None));
    assert!(stdout.contains("billow.db"));
    assert!(stdout.contains("Rules:    11"));

    let rules = stdout_of(&workspace.billow(&["rules", "list"], None));
    assert_eq!(rules.lines().count(), 12);
    assert!(rules.contains(" 4. exe             EXCEL.EXE       Spreadsheet billable=yes"));
}

#[test]
fn run_turns_notifications_into_sessions() {
    let workspace = Workspace::new();
    let output = workspace.billow(&["run"], Some(NOTIFICATIONS));
    stdout_of(&output);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("dropping malformed notification"),
        "expected malformed line warning: {stderr}"
    );

    let json = stdout_of(&workspace.billow(&["sessions", "--date", "2025-03-03", "--json"], None));
    let sessions: Vec<serde_json::Value> = json
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    // Inbox 31s, Jira 2m, then EXCEL merged across the explorer flicker
    assert_eq!(sessions.len(), 3, "sessions: {json}");
    assert_eq!(sessions[0]["category"], "Other");
    assert_eq!(sessions[1]["primary_resource"], "acme.atlassian.net");
    assert_eq!(sessions[1]["category"], "Jira/Confluence");
    assert_eq!(sessions[2]["exe"], "EXCEL.EXE");
    assert_eq!(sessions[2]["billable"], "yes");
    assert_eq!(sessions[2]["ts_start"], "2025-03-03T09:02:31Z");
    assert_eq!(sessions[2]["ts_end"], "2025-03-03T09:05:00Z");

    let status = stdout_of(&workspace.billow(&["status"], None));
    assert!(status.contains("Raw events:      6"), "status: {status}");
    assert!(status.contains("Browser events:  1"), "status: {status}");
    assert!(status.contains("Sessions:        3"), "status: {status}");
}

#[test]
fn added_rules_apply_to_classify() {
    let workspace = Workspace::new();
    stdout_of(&workspace.billow(
        &[
            "rules",
            "add",
            "--match-type",
            "domain",
            "--pattern",
            "github.com",
            "--category",
            "Code Review",
            "--billable",
            "yes",
        ],
        None,
    ));

    let stdout = stdout_of(&workspace.billow(
        &["classify", "--exe", "msedge.exe", "--domain", "github.com"],
        None,
    ));
    assert!(stdout.contains("Category:   Code Review"), "classify: {stdout}");
    assert!(stdout.contains("Matched:    rule 12 (domain)"), "classify: {stdout}");
}

#[test]
fn sync_calendar_without_token_still_succeeds() {
    let workspace = Workspace::new();
    let stdout = stdout_of(&workspace.billow(&["sync-calendar"], None));
    assert!(stdout.starts_with("Calendar sync skipped"));
}

#[test]
fn unopenable_database_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    // a directory cannot be opened as a database file
    let db_path = dir.path().to_path_buf();
    let workspace = Workspace::with_database(dir, &db_path);
    let output = workspace.billow(&["status"], None);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to open database"));
}
