use parking_lot::Mutex;
use std::sync::Arc;

pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

const TRUNCATION_NOTICE: &str = "... earlier output truncated ...\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Success,
    Failed,
    Terminated,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Header,
    Output,
    Echo,
    Notice,
    Status(StatusKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferSnapshot {
    pub segments: Vec<Segment>,
    pub revision: u64,
}

impl BufferSnapshot {
    pub fn text(&self) -> String {
        self.segments.iter().map(|s| s.text.as_str()).collect()
    }

    pub fn status_lines(&self) -> impl Iterator<Item = &Segment> {
        self.segments
            .iter()
            .filter(|s| matches!(s.kind, SegmentKind::Status(_)))
    }
}

#[derive(Debug, Default)]
struct Inner {
    segments: Vec<Segment>,
    /// Bytes of every segment the cap applies to: output, echoes and notices.
    body_bytes: usize,
    truncated: bool,
    revision: u64,
}

/// Shared session transcript. Every operation is a single critical section,
/// so a reader always sees a prefix of what was written.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    inner: Arc<Mutex<Inner>>,
    max_output_bytes: usize,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OUTPUT_BYTES)
    }
}

impl OutputBuffer {
    pub fn new(max_output_bytes: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            max_output_bytes: max_output_bytes.max(1),
        }
    }

    pub fn reset(&self, header: &str) {
        let mut inner = self.inner.lock();
        inner.segments.clear();
        inner.body_bytes = 0;
        inner.truncated = false;
        inner.segments.push(Segment {
            kind: SegmentKind::Header,
            text: terminate_line(header),
        });
        inner.revision += 1;
    }

    pub fn push_output(&self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        let appended = match inner.segments.last_mut() {
            Some(last) if last.kind == SegmentKind::Output => {
                last.text.push_str(chunk);
                true
            }
            _ => false,
        };
        if !appended {
            inner.segments.push(Segment {
                kind: SegmentKind::Output,
                text: chunk.to_string(),
            });
        }
        inner.body_bytes += chunk.len();
        if inner.body_bytes > self.max_output_bytes {
            trim_front(&mut inner, self.max_output_bytes);
        }
        inner.revision += 1;
    }

    /// Appends a marked line, starting it on a fresh line if output left the cursor mid-line.
    pub fn push_line(&self, kind: SegmentKind, text: &str) {
        let mut inner = self.inner.lock();
        let mut line = String::new();
        let mid_line = inner
            .segments
            .last()
            .is_some_and(|last| !last.text.is_empty() && !last.text.ends_with('\n'));
        if mid_line {
            line.push('\n');
        }
        line.push_str(&terminate_line(text));
        let segment = Segment { kind, text: line };
        if counts_toward_cap(&segment) {
            inner.body_bytes += segment.text.len();
        }
        inner.segments.push(segment);
        if inner.body_bytes > self.max_output_bytes {
            trim_front(&mut inner, self.max_output_bytes);
        }
        inner.revision += 1;
    }

    pub fn snapshot(&self) -> BufferSnapshot {
        let inner = self.inner.lock();
        BufferSnapshot {
            segments: inner.segments.clone(),
            revision: inner.revision,
        }
    }

    pub fn text(&self) -> String {
        let inner = self.inner.lock();
        inner.segments.iter().map(|s| s.text.as_str()).collect()
    }

    pub fn revision(&self) -> u64 {
        self.inner.lock().revision
    }
}

fn terminate_line(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{text}\n")
    }
}

/// Headers and status lines are never capped or dropped.
fn counts_toward_cap(segment: &Segment) -> bool {
    match segment.kind {
        SegmentKind::Output | SegmentKind::Echo => true,
        SegmentKind::Notice => segment.text != TRUNCATION_NOTICE,
        SegmentKind::Header | SegmentKind::Status(_) => false,
    }
}

/// Drops the oldest capped text. Output is cut at a char boundary; echoes and
/// notices go as whole lines, except the newest segment which always stays.
fn trim_front(inner: &mut Inner, max_bytes: usize) {
    let mut excess = inner.body_bytes.saturating_sub(max_bytes);
    let mut idx = 0;
    while excess > 0 && idx < inner.segments.len() {
        let last = idx + 1 == inner.segments.len();
        let segment = &mut inner.segments[idx];
        if !counts_toward_cap(segment) {
            idx += 1;
            continue;
        }

        let len = segment.text.len();
        if segment.kind != SegmentKind::Output {
            if last {
                break;
            }
            excess = excess.saturating_sub(len);
            inner.body_bytes -= len;
            inner.segments.remove(idx);
            continue;
        }
        if len <= excess {
            excess -= len;
            inner.body_bytes -= len;
            inner.segments.remove(idx);
            continue;
        }

        let mut cut = excess;
        while !segment.text.is_char_boundary(cut) {
            cut += 1;
        }
        segment.text.drain(..cut);
        inner.body_bytes -= cut;
        excess = 0;
    }

    if !inner.truncated {
        inner.truncated = true;
        let at = inner
            .segments
            .iter()
            .position(|s| s.kind == SegmentKind::Header)
            .map(|pos| pos + 1)
            .unwrap_or(0);
        inner.segments.insert(
            at,
            Segment {
                kind: SegmentKind::Notice,
                text: TRUNCATION_NOTICE.to_string(),
            },
        );
    }
}
