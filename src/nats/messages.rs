use crate::handoff::{FinalizeTrigger, FinalizedRecording};
use serde::{Deserialize, Serialize};

/// Published once a recording's container is finished
#[derive(Debug, Serialize, Deserialize)]
pub struct RecordingReadyMessage {
    pub session_id: String,
    pub file_name: String,  // Absolute container path
    pub payload_bytes: u64,
    pub duration_secs: f64,
    pub complete: bool,
    pub missing_chunks: Vec<u32>,
    pub trigger: FinalizeTrigger,
    pub timestamp: String,  // RFC3339 timestamp
}

impl RecordingReadyMessage {
    pub fn from_recording(recording: &FinalizedRecording) -> Self {
        Self {
            session_id: recording.session_id.clone(),
            file_name: recording.path.to_string_lossy().into_owned(),
            payload_bytes: recording.payload_bytes,
            duration_secs: recording.duration_secs,
            complete: recording.complete,
            missing_chunks: recording.missing_chunks.clone(),
            trigger: recording.trigger,
            timestamp: recording.finished_at.to_rfc3339(),
        }
    }
}
