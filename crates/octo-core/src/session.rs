use crate::catalog::ScriptEntry;
use crate::command::{Interpreters, LaunchCommand, Platform};
use crate::error::SessionError;
use parking_lot::Mutex;
use std::io::{self, PipeReader, Write};
use std::process::{Child, ChildStdin, ExitStatus, Stdio};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Exit code reported for a process that died of SIGTERM.
pub const TERMINATED_EXIT_CODE: i32 = -15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Launching,
    Running,
    ExitedOk,
    ExitedError(i32),
    Killed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::ExitedOk | SessionState::ExitedError(_) | SessionState::Killed
        )
    }
}

#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub platform: Platform,
    pub interpreters: Interpreters,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            platform: Platform::host(),
            interpreters: Interpreters::default(),
        }
    }
}

/// Read end of the merged stdout/stderr pipe.
pub struct SessionOutput {
    pub reader: PipeReader,
}

#[derive(Debug)]
struct Lifecycle {
    state: SessionState,
    kill_requested: bool,
    exit_code: Option<i32>,
}

pub struct ProcessSession {
    entry: ScriptEntry,
    command: LaunchCommand,
    pid: u32,
    child: Mutex<Child>,
    stdin: Mutex<Option<ChildStdin>>,
    lifecycle: Mutex<Lifecycle>,
}

impl ProcessSession {
    /// Spawns the interpreter for `entry`. stdout and stderr share one pipe so
    /// the relay sees them interleaved in delivery order.
    pub fn launch(
        entry: &ScriptEntry,
        config: &LaunchConfig,
    ) -> Result<(Arc<Self>, SessionOutput), SessionError> {
        let command =
            LaunchCommand::resolve(&entry.full_path, config.platform, &config.interpreters);
        let launch_err = |source: io::Error| SessionError::Launch {
            program: command.program.clone(),
            source,
        };

        let (reader, writer) = io::pipe().map_err(launch_err)?;
        let stderr_writer = writer.try_clone().map_err(launch_err)?;

        let mut process = command.to_command();
        process
            .stdin(Stdio::piped())
            .stdout(writer)
            .stderr(stderr_writer);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            process.process_group(0);
        }

        let spawned = process.spawn();
        // The parent's copies of the write end must close or the reader never sees EOF.
        drop(process);
        let mut child = spawned.map_err(|err| {
            warn!(error = %err, command = %command, "script spawn failed");
            launch_err(err)
        })?;

        let pid = child.id();
        let stdin = child.stdin.take();
        info!(pid, command = %command, script = %entry.display_name, "script launched");

        let session = Arc::new(Self {
            entry: entry.clone(),
            command,
            pid,
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            lifecycle: Mutex::new(Lifecycle {
                state: SessionState::Launching,
                kill_requested: false,
                exit_code: None,
            }),
        });
        Ok((session, SessionOutput { reader }))
    }

    pub fn entry(&self) -> &ScriptEntry {
        &self.entry
    }

    pub fn command(&self) -> &LaunchCommand {
        &self.command
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.lock().state
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.lifecycle.lock().exit_code
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    pub fn kill_requested(&self) -> bool {
        self.lifecycle.lock().kill_requested
    }

    pub(crate) fn mark_running(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == SessionState::Launching {
            lifecycle.state = SessionState::Running;
        }
    }

    pub fn send_input(&self, text: &str) -> Result<(), SessionError> {
        if !self.is_running() {
            return Err(SessionError::NotRunning);
        }
        let mut stdin = self.stdin.lock();
        let Some(pipe) = stdin.as_mut() else {
            return Err(SessionError::NotRunning);
        };

        let line = format!("{text}\n");
        let result = pipe
            .write_all(line.as_bytes())
            .and_then(|()| pipe.flush());
        if let Err(err) = result {
            if err.kind() == io::ErrorKind::BrokenPipe {
                *stdin = None;
            }
            return Err(SessionError::Io(err));
        }
        Ok(())
    }

    /// Requests termination. Returns `true` only when this call sent the
    /// request; the relay observes the exit on its own schedule.
    pub fn kill(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != SessionState::Running {
            return false;
        }
        if lifecycle.kill_requested {
            debug!(pid = self.pid, "kill already requested, escalating");
            self.force_kill();
            return false;
        }

        let mut child = self.child.lock();
        // A reaped leader can leave background members holding the output pipe.
        if matches!(child.try_wait(), Ok(Some(_))) && !self.group_alive() {
            return false;
        }

        match self.terminate(&mut child) {
            Ok(()) => {
                lifecycle.kill_requested = true;
                info!(pid = self.pid, "termination requested");
                true
            }
            Err(err) => {
                warn!(pid = self.pid, error = %err, "failed to signal script");
                false
            }
        }
    }

    #[cfg(unix)]
    fn group_alive(&self) -> bool {
        process_group_alive(self.pid)
    }

    #[cfg(not(unix))]
    fn group_alive(&self) -> bool {
        false
    }

    #[cfg(unix)]
    fn terminate(&self, _child: &mut Child) -> io::Result<()> {
        signal_group(self.pid, libc::SIGTERM)
    }

    #[cfg(not(unix))]
    fn terminate(&self, child: &mut Child) -> io::Result<()> {
        child.kill()
    }

    pub fn force_kill(&self) {
        #[cfg(unix)]
        let result = signal_group(self.pid, libc::SIGKILL);
        #[cfg(not(unix))]
        let result = self.child.lock().kill();

        if let Err(err) = result {
            debug!(pid = self.pid, error = %err, "force kill failed");
        }
    }

    pub(crate) fn has_exited(&self) -> io::Result<bool> {
        Ok(self.child.lock().try_wait()?.is_some())
    }

    pub(crate) fn wait(&self) -> io::Result<ExitStatus> {
        self.child.lock().wait()
    }

    /// Records the exit status once. Returns `None` if already terminal.
    pub fn finish(&self, status: ExitStatus) -> Option<SessionState> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state.is_terminal() {
            return None;
        }
        let code = exit_code(status);
        let state = classify(code, lifecycle.kill_requested);
        lifecycle.exit_code = Some(code);
        lifecycle.state = state;
        drop(lifecycle);

        *self.stdin.lock() = None;
        info!(pid = self.pid, code, state = ?state, "script finished");
        Some(state)
    }

    /// Force-kills and reaps the child after a relay failure.
    pub(crate) fn abort(&self) {
        self.force_kill();
        match self.wait() {
            Ok(status) => {
                self.finish(status);
            }
            Err(err) => {
                warn!(pid = self.pid, error = %err, "failed to reap aborted script");
                let mut lifecycle = self.lifecycle.lock();
                if !lifecycle.state.is_terminal() {
                    lifecycle.state = SessionState::ExitedError(-1);
                    lifecycle.exit_code = Some(-1);
                }
            }
        }
    }
}

fn classify(code: i32, kill_requested: bool) -> SessionState {
    if kill_requested || (cfg!(unix) && code == TERMINATED_EXIT_CODE) {
        SessionState::Killed
    } else if code == 0 {
        SessionState::ExitedOk
    } else {
        SessionState::ExitedError(code)
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| -signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: libc::c_int) -> io::Result<()> {
    // SAFETY: kill(2) takes plain integers; a negative pid addresses the group.
    let rc = unsafe { libc::kill(-(pgid as libc::pid_t), signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Signal 0 probes the group. EPERM still means a member exists.
#[cfg(unix)]
fn process_group_alive(pgid: u32) -> bool {
    // SAFETY: signal 0 performs the permission and existence checks only.
    let rc = unsafe { libc::kill(-(pgid as libc::pid_t), 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}
