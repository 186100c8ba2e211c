use crate::buffer::{OutputBuffer, SegmentKind, StatusKind};
use crate::error::SessionError;
use crate::session::{ProcessSession, SessionOutput, SessionState};
use std::io::{self, Read};
use std::process::ExitStatus;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

const READ_CHUNK: usize = 4096;
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Asks the rendering thread to refresh. Implementations must only schedule
/// work on that thread, never touch UI state directly.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self);
}

impl<F> Notifier for F
where
    F: Fn() + Send + Sync + 'static,
{
    fn notify(&self) {
        self()
    }
}

/// Coalescing wakeup over a bounded channel: at most one redraw is pending.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: SyncSender<()>,
}

impl ChannelNotifier {
    pub fn channel() -> (Self, Receiver<()>) {
        let (tx, rx) = mpsc::sync_channel(1);
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Incremental UTF-8 decoding that never splits a character across reads.
/// Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());
        let mut offset = 0;

        while offset < self.pending.len() {
            match std::str::from_utf8(&self.pending[offset..]) {
                Ok(valid) => {
                    out.push_str(valid);
                    offset = self.pending.len();
                }
                Err(err) => {
                    let valid_end = offset + err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[offset..valid_end]));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            offset = valid_end + len;
                        }
                        None => {
                            offset = valid_end;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..offset);
        out
    }

    /// Flushes a dangling partial sequence at end of stream.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        self.pending.clear();
        char::REPLACEMENT_CHARACTER.to_string()
    }
}

pub struct OutputRelay;

impl OutputRelay {
    /// Starts the pump thread for `session`. The session is Running from here on.
    pub fn spawn<N: Notifier>(
        session: Arc<ProcessSession>,
        output: SessionOutput,
        buffer: OutputBuffer,
        notifier: N,
    ) -> io::Result<JoinHandle<()>> {
        session.mark_running();
        thread::Builder::new()
            .name(format!("octo-relay-{}", session.pid()))
            .spawn(move || run(session, output.reader, buffer, notifier))
    }
}

fn run<R: Read, N: Notifier>(
    session: Arc<ProcessSession>,
    reader: R,
    buffer: OutputBuffer,
    notifier: N,
) {
    match pump(&session, reader, &buffer, &notifier) {
        Ok(status) => report(&session, status, &buffer),
        Err(err) => {
            warn!(pid = session.pid(), error = %err, "relay failed");
            buffer.push_line(
                SegmentKind::Status(StatusKind::Error),
                &format!("EXECUTION ERROR: {err}"),
            );
            session.abort();
        }
    }
    notifier.notify();
}

fn pump<R: Read, N: Notifier>(
    session: &ProcessSession,
    mut reader: R,
    buffer: &OutputBuffer,
    notifier: &N,
) -> Result<ExitStatus, SessionError> {
    let mut decoder = Utf8Decoder::default();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let read = match reader.read(&mut chunk) {
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(SessionError::Io(err)),
        };

        if read == 0 {
            // EOF alone is not exit: the script may have closed its output and kept running.
            if session.has_exited()? {
                break;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
            continue;
        }

        let text = decoder.decode(&chunk[..read]);
        if !text.is_empty() {
            buffer.push_output(&text);
            notifier.notify();
        }
    }

    let tail = decoder.finish();
    if !tail.is_empty() {
        buffer.push_output(&tail);
    }

    Ok(session.wait()?)
}

fn report(session: &ProcessSession, status: ExitStatus, buffer: &OutputBuffer) {
    let Some(state) = session.finish(status) else {
        return;
    };
    debug!(pid = session.pid(), state = ?state, "relay finished");

    match state {
        SessionState::ExitedOk => {
            buffer.push_line(SegmentKind::Status(StatusKind::Success), "STATUS: SUCCESS")
        }
        SessionState::ExitedError(code) => buffer.push_line(
            SegmentKind::Status(StatusKind::Failed),
            &format!("STATUS: FAILED ({code})"),
        ),
        // A user kill already has its line from the controller.
        SessionState::Killed if !session.kill_requested() => buffer.push_line(
            SegmentKind::Status(StatusKind::Terminated),
            "PROCESS TERMINATED BY SIGNAL",
        ),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plain_ascii() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"ready> "), "ready> ");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn holds_split_multibyte_sequence_until_complete() {
        let mut decoder = Utf8Decoder::default();
        let bytes = "héllo ✓".as_bytes();
        let check_start = bytes.len() - 3;

        assert_eq!(decoder.decode(&bytes[..2]), "h");
        assert_eq!(decoder.decode(&bytes[2..check_start + 1]), "éllo ");
        assert_eq!(decoder.decode(&bytes[check_start + 1..]), "✓");
    }

    #[test]
    fn replaces_invalid_bytes_and_continues() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"ok\xffthen\xc3("), "ok\u{FFFD}then\u{FFFD}(");
    }

    #[test]
    fn dangling_sequence_is_replaced_at_finish() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"x\xe2\x9c"), "x");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn channel_notifier_coalesces_wakeups() {
        let (notifier, rx) = ChannelNotifier::channel();
        notifier.notify();
        notifier.notify();
        notifier.clone().notify();

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    struct BrokenReader;

    impl Read for BrokenReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("stream reset"))
        }
    }

    #[cfg(unix)]
    #[test]
    fn read_failure_reports_once_and_reaps_the_child() {
        use crate::catalog::{ScriptEntry, GENERAL_CATEGORY};
        use crate::session::LaunchConfig;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("hang.sh");
        std::fs::write(&path, "sleep 30\n").expect("write script");
        let entry = ScriptEntry {
            category: GENERAL_CATEGORY.to_string(),
            display_name: "hang.sh".to_string(),
            full_path: path,
        };
        let (session, _output) =
            ProcessSession::launch(&entry, &LaunchConfig::default()).expect("launch");
        session.mark_running();

        let buffer = OutputBuffer::default();
        buffer.reset("Running: hang.sh...");
        let wakeups = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&wakeups);
        let notifier = move || {
            counter.fetch_add(1, Ordering::SeqCst);
        };

        run(Arc::clone(&session), BrokenReader, buffer.clone(), notifier);

        let snapshot = buffer.snapshot();
        let statuses: Vec<_> = snapshot.status_lines().collect();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].kind, SegmentKind::Status(StatusKind::Error));
        assert!(statuses[0].text.starts_with("EXECUTION ERROR:"));
        assert!(statuses[0].text.contains("stream reset"));
        assert_eq!(session.state(), SessionState::ExitedError(-libc::SIGKILL));
        assert_eq!(session.exit_code(), Some(-libc::SIGKILL));
        assert!(!session.is_running());
        assert_eq!(wakeups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn closures_are_notifiers() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let count = Arc::new(AtomicUsize::new(0));
        let hits = Arc::clone(&count);
        let notifier = move || {
            hits.fetch_add(1, Ordering::SeqCst);
        };
        notifier.notify();
        Notifier::notify(&notifier);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
