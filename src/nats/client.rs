use crate::handoff::{FinalizedRecording, TranscriptionHandoff};
use anyhow::{Context, Result};
use async_nats::Client;
use tracing::info;

use super::messages::RecordingReadyMessage;

pub struct NatsClient {
    client: Client,
}

impl NatsClient {
    /// Connect to NATS server
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self { client })
    }

    /// Publish a recording-ready message on `<prefix>.meeting-<session id>`
    pub async fn publish_recording_ready(
        &self,
        subject_prefix: &str,
        recording: &FinalizedRecording,
    ) -> Result<()> {
        let subject = format!("{}.meeting-{}", subject_prefix, recording.session_id);

        let message = RecordingReadyMessage::from_recording(recording);
        let payload = serde_json::to_vec(&message)?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .context("Failed to publish recording-ready message")?;
        self.client
            .flush()
            .await
            .context("Failed to flush NATS connection")?;

        info!(
            "Published recording-ready to {} (bytes={}, complete={})",
            subject, recording.payload_bytes, recording.complete
        );

        Ok(())
    }
}

/// Hands recordings to the transcription pipeline over NATS
pub struct NatsHandoff {
    client: NatsClient,
    subject_prefix: String,
}

impl NatsHandoff {
    pub async fn connect(url: &str, subject_prefix: String) -> Result<Self> {
        Ok(Self {
            client: NatsClient::connect(url).await?,
            subject_prefix,
        })
    }
}

#[async_trait::async_trait]
impl TranscriptionHandoff for NatsHandoff {
    async fn hand_off(&self, recording: &FinalizedRecording) -> Result<()> {
        self.client
            .publish_recording_ready(&self.subject_prefix, recording)
            .await
    }

    fn name(&self) -> &str {
        "nats"
    }
}
