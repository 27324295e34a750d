pub mod audio;
pub mod config;
pub mod error;
pub mod handoff;
pub mod ingest;
pub mod nats;
pub mod session;

pub use audio::{AudioFile, ContainerWriter};
pub use config::Config;
pub use error::{IngestError, IngestResult};
pub use handoff::{
    FinalizeTrigger, FinalizedRecording, HttpHandoff, LogHandoff, TranscriptionHandoff,
};
pub use ingest::{ChunkAck, ChunkUpload, IgnoreReason, SessionLifecycle, ShutdownReport};
pub use nats::{NatsClient, NatsHandoff, RecordingReadyMessage};
pub use session::{RecordingSession, SessionConfig, SessionState, SessionStats};
