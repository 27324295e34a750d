//! Chunk ingestion and session finalization
//!
//! Chunks of a recording arrive out of order over many requests. This
//! module buffers them per session, watches for inactivity, and writes each
//! recording exactly once:
//! - `buffer` - index-ordered chunk accumulator
//! - `registry` - concurrent table of open sessions
//! - `timeout` - rearmable per-session deadlines
//! - `coordinator` - the exactly-once finalization state machine
//! - `lifecycle` - the API consumed by the upload layer

pub mod buffer;
pub mod coordinator;
pub mod lifecycle;
pub mod registry;
pub mod timeout;
pub mod tracker;

pub use buffer::{ChunkBuffer, InsertOutcome};
pub use coordinator::{BatchOutcome, FinalizationCoordinator, FinalizeOutcome};
pub use lifecycle::{ChunkAck, ChunkUpload, IgnoreReason, SessionLifecycle, ShutdownReport};
pub use registry::{Lookup, SessionHandle, SessionRegistry};
pub use timeout::{Deadline, DeadlineFired, TimeoutSupervisor};
pub use tracker::TaskTracker;
