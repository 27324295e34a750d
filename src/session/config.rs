use crate::config::Config;
use hound::WavSpec;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings shared by every recording session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory receiving the container files
    pub base_path: PathBuf,

    /// Container format used when no chunk carries an embedded header
    pub fallback_spec: WavSpec,

    /// Inactivity deadline rearmed after every chunk
    pub chunk_timeout: Duration,

    /// Deadline armed by an explicit start
    pub start_timeout: Duration,

    /// Delay between the end signal and finalization
    pub end_grace: Duration,

    /// Concurrent downstream hand-offs
    pub handoff_workers: usize,

    /// Bound on the shutdown drain
    pub shutdown_grace: Duration,

    /// How long a closed session id is remembered
    pub closed_session_ttl: Duration,
}

impl SessionConfig {
    /// Default timings with recordings stored under `base_path`
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Self::from_config(&Config::default())
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self {
            base_path: cfg.storage.base_path.clone(),
            fallback_spec: cfg.audio.wav_spec(),
            chunk_timeout: cfg.ingest.chunk_timeout(),
            start_timeout: cfg.ingest.start_timeout(),
            end_grace: cfg.ingest.end_grace(),
            handoff_workers: cfg.ingest.handoff_workers,
            shutdown_grace: cfg.ingest.shutdown_grace(),
            closed_session_ttl: cfg.ingest.closed_session_ttl(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
