use super::{FinalizedRecording, TranscriptionHandoff};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::info;

/// Request body understood by the transcriber's `/run` endpoint
#[derive(Debug, Serialize)]
struct RunRequest<'a> {
    data: RunData<'a>,
}

#[derive(Debug, Serialize)]
struct RunData<'a> {
    file_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    participant: Option<u32>,
}

/// Triggers transcription with an HTTP POST
pub struct HttpHandoff {
    client: reqwest::Client,
    url: String,
    participants: Option<u32>,
}

impl HttpHandoff {
    pub fn new(url: String, participants: Option<u32>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            participants,
        }
    }
}

#[async_trait::async_trait]
impl TranscriptionHandoff for HttpHandoff {
    async fn hand_off(&self, recording: &FinalizedRecording) -> Result<()> {
        let file_name = recording.path.to_string_lossy();
        let body = RunRequest {
            data: RunData {
                file_name: &file_name,
                participant: self.participants,
            },
        };

        info!(
            "Requesting transcription at {} for session {}",
            self.url, recording.session_id
        );

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .context("Failed to reach transcriber")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("transcriber answered {}: {}", status, text);
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}
