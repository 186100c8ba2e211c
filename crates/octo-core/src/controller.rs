use crate::buffer::{OutputBuffer, SegmentKind, StatusKind};
use crate::catalog::{self, CatalogSnapshot, ScriptEntry};
use crate::config::Config;
use crate::error::SessionError;
use crate::relay::{Notifier, OutputRelay};
use crate::session::{LaunchConfig, ProcessSession};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const SHUTDOWN_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    Started,
    /// Another script is still running; nothing was launched.
    Rejected,
    Failed,
}

struct Active {
    session: Arc<ProcessSession>,
    relay: Option<JoinHandle<()>>,
}

/// Owns the single active-session slot, the output buffer and the last catalog
/// snapshot. All methods run on the rendering thread.
pub struct DashboardController<N: Notifier> {
    config: Config,
    launch: LaunchConfig,
    buffer: OutputBuffer,
    notifier: N,
    active: Option<Active>,
    snapshot: Option<CatalogSnapshot>,
}

impl<N: Notifier + Clone> DashboardController<N> {
    pub fn new(config: Config, notifier: N) -> Self {
        let launch = config.launch_config();
        let buffer = OutputBuffer::new(config.max_output_bytes);
        Self {
            config,
            launch,
            buffer,
            notifier,
            active: None,
            snapshot: None,
        }
    }

    pub fn buffer(&self) -> &OutputBuffer {
        &self.buffer
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.config.scripts_dir
    }

    pub fn snapshot(&self) -> Option<&CatalogSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn active_session(&self) -> Option<&Arc<ProcessSession>> {
        self.active.as_ref().map(|active| &active.session)
    }

    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.session.is_running())
    }

    pub fn on_script_selected(&mut self, entry: &ScriptEntry) -> LaunchOutcome {
        if let Some(active) = self.active.as_ref().filter(|a| a.session.is_running()) {
            let running = active.session.entry().display_name.clone();
            info!(running = %running, requested = %entry.display_name, "launch rejected");
            self.buffer.push_line(
                SegmentKind::Notice,
                &format!("{running} is still running. Press Ctrl+C to stop it first."),
            );
            self.notifier.notify();
            return LaunchOutcome::Rejected;
        }

        // The previous relay may still be writing its status line.
        self.reap_finished();
        self.buffer
            .reset(&format!("Running: {}...", entry.display_name));

        let outcome = match ProcessSession::launch(entry, &self.launch) {
            Ok((session, output)) => match OutputRelay::spawn(
                Arc::clone(&session),
                output,
                self.buffer.clone(),
                self.notifier.clone(),
            ) {
                Ok(relay) => {
                    self.active = Some(Active {
                        session,
                        relay: Some(relay),
                    });
                    LaunchOutcome::Started
                }
                Err(err) => {
                    warn!(error = %err, "failed to start relay thread");
                    session.abort();
                    self.buffer.push_line(
                        SegmentKind::Status(StatusKind::Error),
                        &format!("EXECUTION ERROR: {err}"),
                    );
                    LaunchOutcome::Failed
                }
            },
            Err(err) => {
                self.buffer.push_line(
                    SegmentKind::Status(StatusKind::Error),
                    &format!("LAUNCH ERROR: {err}"),
                );
                LaunchOutcome::Failed
            }
        };

        self.notifier.notify();
        outcome
    }

    /// Writes `text` to the running script. Returns `false` (and leaves the
    /// buffer alone) when nothing is running or the pipe is gone.
    pub fn on_operator_input(&mut self, text: &str) -> bool {
        let Some(active) = &self.active else {
            return false;
        };
        match active.session.send_input(text) {
            Ok(()) => {
                self.buffer.push_line(SegmentKind::Echo, &format!("> {text}"));
                self.notifier.notify();
                true
            }
            Err(SessionError::NotRunning) => false,
            Err(err) => {
                warn!(pid = active.session.pid(), error = %err, "input dropped");
                false
            }
        }
    }

    pub fn on_kill_requested(&mut self) -> bool {
        let Some(active) = &self.active else {
            return false;
        };
        if !active.session.kill() {
            return false;
        }
        self.buffer.push_line(
            SegmentKind::Status(StatusKind::Terminated),
            "PROCESS TERMINATED BY USER",
        );
        self.notifier.notify();
        true
    }

    /// Rescans the scripts directory. Returns the new snapshot only when it
    /// differs from the remembered one.
    pub fn on_poll_tick(&mut self) -> Option<&CatalogSnapshot> {
        let current = match catalog::scan(&self.config.scripts_dir) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "rescan failed");
                return None;
            }
        };
        if !catalog::changed(self.snapshot.as_ref(), &current) {
            return None;
        }

        let delta = catalog::diff(self.snapshot.as_ref(), &current);
        debug!(
            added = delta.added.len(),
            removed = delta.removed.len(),
            "script catalog changed"
        );
        self.snapshot = Some(current);
        self.snapshot.as_ref()
    }

    fn reap_finished(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if !active.session.state().is_terminal() {
            return;
        }
        if let Some(relay) = active.relay.take() {
            if relay.join().is_err() {
                warn!(pid = active.session.pid(), "relay thread panicked");
            }
        }
    }
}

impl<N: Notifier> DashboardController<N> {
    /// Stops any running script and joins its relay. Called on exit so no
    /// process outlives the dashboard.
    pub fn shutdown(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        let session = Arc::clone(&active.session);
        let grace = self.config.kill_grace();

        if session.is_running() {
            session.kill();
            if !wait_for_exit(&session, grace) {
                warn!(pid = session.pid(), "script ignored SIGTERM, forcing");
                session.force_kill();
                if !wait_for_exit(&session, grace) {
                    warn!(pid = session.pid(), "script still alive, detaching relay");
                    return;
                }
            }
        }

        if let Some(relay) = active.relay.take() {
            if relay.join().is_err() {
                warn!(pid = session.pid(), "relay thread panicked");
            }
        }
    }
}

impl<N: Notifier> Drop for DashboardController<N> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn wait_for_exit(session: &ProcessSession, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    while session.is_running() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(SHUTDOWN_POLL);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::ChannelNotifier;
    use std::fs;
    use tempfile::TempDir;

    fn controller(root: &Path) -> DashboardController<ChannelNotifier> {
        let (notifier, _rx) = ChannelNotifier::channel();
        let config = Config {
            scripts_dir: root.to_path_buf(),
            ..Config::default()
        };
        DashboardController::new(config, notifier)
    }

    #[test]
    fn first_poll_builds_then_quiet_until_change() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("setup.py"), "print('hi')\n").expect("write");
        let mut ctl = controller(dir.path());

        let first = ctl.on_poll_tick().cloned().expect("initial build");
        assert_eq!(first.len(), 1);
        assert!(ctl.on_poll_tick().is_none());

        fs::create_dir_all(dir.path().join("deploy")).expect("mkdir");
        fs::write(dir.path().join("deploy/run.sh"), "echo hi\n").expect("write");
        let rebuilt = ctl.on_poll_tick().cloned().expect("rebuild");
        assert_eq!(rebuilt.len(), 2);
        assert_eq!(ctl.snapshot(), Some(&rebuilt));
        assert!(ctl.on_poll_tick().is_none());
    }

    #[test]
    fn poll_creates_missing_scripts_dir() {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path().join("scripts");
        let mut ctl = controller(&root);

        let snapshot = ctl.on_poll_tick().cloned().expect("initial build");
        assert!(snapshot.is_empty());
        assert!(root.is_dir());
    }

    #[test]
    fn input_and_kill_without_session_are_no_ops() {
        let dir = TempDir::new().expect("tempdir");
        let mut ctl = controller(dir.path());
        ctl.buffer().reset("System ready.");
        let before = ctl.buffer().snapshot();

        assert!(!ctl.on_operator_input("hello"));
        assert!(!ctl.on_kill_requested());
        assert!(!ctl.is_running());
        assert_eq!(ctl.buffer().snapshot(), before);
    }
}
