//! Per-recording state
//!
//! A `RecordingSession` is the mutable state of one in-progress upload:
//! - Its chunk buffer and declared chunk count
//! - The container path it will be written to
//! - The currently armed inactivity deadline
//! - Its place in the `Open -> Finalizing -> Closed` lifecycle

mod config;
mod session;
mod stats;

pub use config::SessionConfig;
pub use session::{RecordingSession, SessionState};
pub use stats::SessionStats;
