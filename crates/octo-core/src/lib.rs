pub mod buffer;
pub mod catalog;
pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod relay;
pub mod session;

pub use buffer::{BufferSnapshot, OutputBuffer, Segment, SegmentKind, StatusKind};
pub use catalog::{changed, diff, scan, CatalogSnapshot, ScriptEntry, SnapshotDiff, GENERAL_CATEGORY};
pub use command::{Interpreters, LaunchCommand, Platform};
pub use config::Config;
pub use controller::{DashboardController, LaunchOutcome};
pub use error::{CatalogError, ConfigError, SessionError};
pub use relay::{ChannelNotifier, Notifier, OutputRelay, Utf8Decoder};
pub use session::{LaunchConfig, ProcessSession, SessionOutput, SessionState};
