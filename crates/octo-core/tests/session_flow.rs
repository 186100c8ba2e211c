#![cfg(unix)]

use octo_core::{
    BufferSnapshot, ChannelNotifier, Config, DashboardController, Interpreters, LaunchOutcome,
    OutputBuffer, ScriptEntry, SegmentKind, SessionState, StatusKind, GENERAL_CATEGORY,
};
use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(10);

fn script(dir: &Path, name: &str, body: &str) -> ScriptEntry {
    let path = dir.join(name);
    fs::write(&path, body).expect("write script");
    ScriptEntry {
        category: GENERAL_CATEGORY.to_string(),
        display_name: name.to_string(),
        full_path: path,
    }
}

fn controller_with(dir: &Path, interpreters: Interpreters) -> DashboardController<ChannelNotifier> {
    let (notifier, _rx) = ChannelNotifier::channel();
    let config = Config {
        scripts_dir: dir.to_path_buf(),
        kill_grace_ms: 500,
        interpreters,
        ..Config::default()
    };
    DashboardController::new(config, notifier)
}

fn controller(dir: &Path) -> DashboardController<ChannelNotifier> {
    controller_with(dir, Interpreters::default())
}

fn wait_until(buffer: &OutputBuffer, what: &str, pred: impl Fn(&BufferSnapshot) -> bool) -> BufferSnapshot {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let snapshot = buffer.snapshot();
        if pred(&snapshot) {
            return snapshot;
        }
        if Instant::now() >= deadline {
            panic!("timed out waiting for {what}; buffer:\n{}", snapshot.text());
        }
        thread::sleep(Duration::from_millis(10));
    }
}

fn wait_idle(ctl: &DashboardController<ChannelNotifier>) {
    let deadline = Instant::now() + TIMEOUT;
    while ctl.is_running() {
        assert!(Instant::now() < deadline, "script did not finish");
        thread::sleep(Duration::from_millis(10));
    }
}

fn status_texts(snapshot: &BufferSnapshot) -> Vec<String> {
    snapshot
        .status_lines()
        .map(|segment| segment.text.trim().to_string())
        .collect()
}

fn has_status(snapshot: &BufferSnapshot) -> bool {
    snapshot.status_lines().next().is_some()
}

#[test]
fn successful_script_reports_one_success_line() {
    let dir = TempDir::new().expect("tempdir");
    let entry = script(dir.path(), "hello.sh", "echo hello\necho world\n");
    let mut ctl = controller(dir.path());

    assert_eq!(ctl.on_script_selected(&entry), LaunchOutcome::Started);
    let snapshot = wait_until(ctl.buffer(), "status line", has_status);
    wait_idle(&ctl);

    let text = snapshot.text();
    assert!(text.starts_with("Running: hello.sh...\n"));
    assert!(text.contains("hello\nworld\n"));
    assert_eq!(status_texts(&snapshot), vec!["STATUS: SUCCESS"]);

    let session = ctl.active_session().expect("session");
    assert_eq!(session.state(), SessionState::ExitedOk);
    assert_eq!(session.exit_code(), Some(0));
}

#[test]
fn failing_script_reports_exit_code_and_stderr() {
    let dir = TempDir::new().expect("tempdir");
    let entry = script(dir.path(), "broken.sh", "echo oops >&2\nexit 3\n");
    let mut ctl = controller(dir.path());

    ctl.on_script_selected(&entry);
    let snapshot = wait_until(ctl.buffer(), "status line", has_status);
    wait_idle(&ctl);

    assert!(snapshot.text().contains("oops"));
    assert_eq!(status_texts(&snapshot), vec!["STATUS: FAILED (3)"]);
    assert_eq!(
        ctl.active_session().expect("session").state(),
        SessionState::ExitedError(3)
    );
}

#[test]
fn partial_prompt_is_visible_before_input() {
    let dir = TempDir::new().expect("tempdir");
    let entry = script(
        dir.path(),
        "ask.sh",
        "printf 'ready> '\nread name\necho \"hi $name\"\n",
    );
    let mut ctl = controller(dir.path());

    ctl.on_script_selected(&entry);
    wait_until(ctl.buffer(), "prompt", |s| s.text().contains("ready> "));
    assert!(ctl.is_running());

    assert!(ctl.on_operator_input("bob"));
    let snapshot = wait_until(ctl.buffer(), "status line", has_status);

    let text = snapshot.text();
    assert!(text.contains("> bob\n"));
    assert!(text.contains("hi bob"));
    assert!(snapshot
        .segments
        .iter()
        .any(|s| s.kind == SegmentKind::Echo && s.text.contains("> bob")));
    assert_eq!(status_texts(&snapshot), vec!["STATUS: SUCCESS"]);
}

#[test]
fn user_kill_never_reports_failure() {
    let dir = TempDir::new().expect("tempdir");
    let entry = script(dir.path(), "slow.sh", "echo started\nsleep 30\necho never\n");
    let mut ctl = controller(dir.path());

    ctl.on_script_selected(&entry);
    wait_until(ctl.buffer(), "start", |s| s.text().contains("started"));

    assert!(ctl.on_kill_requested());
    wait_idle(&ctl);
    assert!(!ctl.on_kill_requested());

    let snapshot = ctl.buffer().snapshot();
    assert_eq!(status_texts(&snapshot), vec!["PROCESS TERMINATED BY USER"]);
    assert!(!snapshot.text().contains("FAILED"));
    assert!(!snapshot.text().contains("never"));
    assert_eq!(
        ctl.active_session().expect("session").state(),
        SessionState::Killed
    );
}

#[test]
fn kill_reaches_background_child_after_leader_exits() {
    let dir = TempDir::new().expect("tempdir");
    let entry = script(
        dir.path(),
        "bg.sh",
        "echo started\nsleep 30 &\necho parent-done\n",
    );
    let other = script(dir.path(), "other.sh", "echo other\n");
    let mut ctl = controller(dir.path());

    ctl.on_script_selected(&entry);
    wait_until(ctl.buffer(), "leader output", |s| s.text().contains("parent-done"));
    // The leader is gone but `sleep` still holds the output pipe.
    thread::sleep(Duration::from_millis(300));
    assert!(ctl.is_running());

    assert!(ctl.on_kill_requested());
    wait_idle(&ctl);

    let snapshot = ctl.buffer().snapshot();
    assert_eq!(status_texts(&snapshot), vec!["PROCESS TERMINATED BY USER"]);
    assert_eq!(
        ctl.active_session().expect("session").state(),
        SessionState::Killed
    );
    assert_eq!(ctl.on_script_selected(&other), LaunchOutcome::Started);
}

#[test]
fn external_sigterm_is_reported_as_terminated() {
    let dir = TempDir::new().expect("tempdir");
    let entry = script(dir.path(), "selfterm.sh", "echo bye\nkill -TERM $$\nsleep 5\n");
    let mut ctl = controller(dir.path());

    ctl.on_script_selected(&entry);
    let snapshot = wait_until(ctl.buffer(), "status line", has_status);
    wait_idle(&ctl);

    assert_eq!(status_texts(&snapshot), vec!["PROCESS TERMINATED BY SIGNAL"]);
    let session = ctl.active_session().expect("session");
    assert_eq!(session.state(), SessionState::Killed);
    assert_eq!(session.exit_code(), Some(-15));
    assert!(!session.kill_requested());
}

#[test]
fn missing_interpreter_fails_once_and_controller_stays_usable() {
    let dir = TempDir::new().expect("tempdir");
    let missing = script(dir.path(), "tool.py", "print('hi')\n");
    let ok = script(dir.path(), "ok.sh", "echo fine\n");
    let mut ctl = controller_with(
        dir.path(),
        Interpreters {
            python: Some("/nonexistent/octo-python".to_string()),
            shell: None,
        },
    );

    assert_eq!(ctl.on_script_selected(&missing), LaunchOutcome::Failed);
    let snapshot = ctl.buffer().snapshot();
    let statuses: Vec<_> = snapshot.status_lines().collect();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].kind, SegmentKind::Status(StatusKind::Error));
    assert!(statuses[0].text.starts_with("LAUNCH ERROR:"));
    assert!(statuses[0].text.contains("/nonexistent/octo-python"));
    assert!(!ctl.is_running());

    assert_eq!(ctl.on_script_selected(&ok), LaunchOutcome::Started);
    let snapshot = wait_until(ctl.buffer(), "status line", has_status);
    assert!(snapshot.text().starts_with("Running: ok.sh..."));
    assert_eq!(status_texts(&snapshot), vec!["STATUS: SUCCESS"]);
}

#[test]
fn second_launch_is_rejected_while_running() {
    let dir = TempDir::new().expect("tempdir");
    let slow = script(dir.path(), "slow.sh", "echo busy\nsleep 30\n");
    let other = script(dir.path(), "other.sh", "echo other\n");
    let mut ctl = controller(dir.path());

    ctl.on_script_selected(&slow);
    wait_until(ctl.buffer(), "start", |s| s.text().contains("busy"));

    assert_eq!(ctl.on_script_selected(&other), LaunchOutcome::Rejected);
    let snapshot = ctl.buffer().snapshot();
    assert!(snapshot.text().starts_with("Running: slow.sh..."));
    assert!(snapshot
        .segments
        .iter()
        .any(|s| s.kind == SegmentKind::Notice && s.text.contains("slow.sh is still running")));
    assert_eq!(
        ctl.active_session().expect("session").entry().display_name,
        "slow.sh"
    );

    ctl.on_kill_requested();
    wait_idle(&ctl);
    assert_eq!(ctl.on_script_selected(&other), LaunchOutcome::Started);
}

#[test]
fn input_after_exit_is_ignored() {
    let dir = TempDir::new().expect("tempdir");
    let entry = script(dir.path(), "quick.sh", "echo done\n");
    let mut ctl = controller(dir.path());

    ctl.on_script_selected(&entry);
    wait_until(ctl.buffer(), "status line", has_status);
    wait_idle(&ctl);
    thread::sleep(Duration::from_millis(50));
    let before = ctl.buffer().snapshot();

    assert!(!ctl.on_operator_input("late"));
    assert_eq!(ctl.buffer().snapshot(), before);
}

#[test]
fn multibyte_output_survives_streaming() {
    let dir = TempDir::new().expect("tempdir");
    let entry = script(dir.path(), "utf8.sh", "printf 'caf\\303\\251 \\342\\234\\223\\n'\n");
    let mut ctl = controller(dir.path());

    ctl.on_script_selected(&entry);
    let snapshot = wait_until(ctl.buffer(), "status line", has_status);

    assert!(snapshot.text().contains("café ✓\n"));
}

#[test]
fn shutdown_terminates_running_script() {
    let dir = TempDir::new().expect("tempdir");
    let entry = script(dir.path(), "forever.sh", "echo up\nwhile true; do sleep 1; done\n");
    let mut ctl = controller(dir.path());

    ctl.on_script_selected(&entry);
    wait_until(ctl.buffer(), "start", |s| s.text().contains("up"));
    let session = ctl.active_session().cloned().expect("session");

    ctl.shutdown();

    assert!(session.state().is_terminal());
    assert!(ctl.active_session().is_none());
}
