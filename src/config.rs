use anyhow::{bail, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
    pub audio: AudioConfig,
    pub transcription: TranscriptionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "meeting-ingest".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory that receives one container file per recording
    pub base_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./meeting_records"),
        }
    }
}

/// Timing and concurrency knobs for the ingest core
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Inactivity deadline rearmed after every chunk
    pub chunk_timeout_secs: u64,

    /// Deadline armed by an explicit start before any chunk arrives
    pub start_timeout_secs: u64,

    /// Delay between the end signal and finalization, so a last in-flight
    /// chunk can still land
    pub end_grace_ms: u64,

    /// Concurrent downstream hand-offs
    pub handoff_workers: usize,

    /// Upper bound on how long shutdown waits for in-flight finalizations
    pub shutdown_grace_secs: u64,

    /// How long a closed session id keeps rejecting late chunks
    pub closed_session_ttl_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_timeout_secs: 180,
            start_timeout_secs: 600,
            end_grace_ms: 1000,
            handoff_workers: 10,
            shutdown_grace_secs: 60,
            closed_session_ttl_secs: 600,
        }
    }
}

impl IngestConfig {
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn end_grace(&self) -> Duration {
        Duration::from_millis(self.end_grace_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn closed_session_ttl(&self) -> Duration {
        Duration::from_secs(self.closed_session_ttl_secs)
    }
}

/// Fallback container format, used when no chunk carries its own header
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 1,
            bits_per_sample: 16,
        }
    }
}

impl AudioConfig {
    pub fn wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: self.bits_per_sample,
            sample_format: hound::SampleFormat::Int,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandoffKind {
    #[default]
    Log,
    Http,
    Nats,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub kind: HandoffKind,

    /// Transcriber endpoint for the HTTP hand-off
    pub url: String,

    pub nats_url: String,

    /// NATS subject prefix; the session id is appended per recording
    pub subject_prefix: String,

    /// Speaker count forwarded to the transcriber, when known
    pub participants: Option<u32>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            kind: HandoffKind::Log,
            url: "http://localhost:8081/run".to_string(),
            nats_url: "nats://localhost:4222".to_string(),
            subject_prefix: "recording.ready".to_string(),
            participants: None,
        }
    }
}

impl Config {
    /// Load from an optional config file, overridden by `MEETING_INGEST__*`
    /// environment variables.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("MEETING_INGEST").separator("__"))
            .build()?;

        let cfg: Self = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ingest.handoff_workers == 0 {
            bail!("ingest.handoff_workers must be at least 1");
        }
        if self.ingest.chunk_timeout_secs == 0 || self.ingest.start_timeout_secs == 0 {
            bail!("ingest timeouts must be non-zero");
        }
        if self.audio.channels == 0 || self.audio.sample_rate == 0 {
            bail!("audio.channels and audio.sample_rate must be non-zero");
        }
        if !matches!(self.audio.bits_per_sample, 8 | 16 | 24 | 32) {
            bail!(
                "audio.bits_per_sample must be 8, 16, 24 or 32 (got {})",
                self.audio.bits_per_sample
            );
        }
        Ok(())
    }
}
