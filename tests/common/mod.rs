// Shared helpers for the ingest integration tests

#![allow(dead_code)]

use anyhow::Result;
use meeting_ingest::audio::encode_header;
use meeting_ingest::{FinalizedRecording, SessionConfig, TranscriptionHandoff};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records every hand-off instead of calling a transcriber
#[derive(Default)]
pub struct RecordingHandoff {
    recordings: Mutex<Vec<FinalizedRecording>>,
}

impl RecordingHandoff {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.recordings.lock().unwrap().len()
    }

    pub fn recordings(&self) -> Vec<FinalizedRecording> {
        self.recordings.lock().unwrap().clone()
    }

    /// Poll until at least `n` hand-offs happened or `limit` elapses.
    pub async fn wait_for(&self, n: usize, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if self.count() >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.count() >= n
    }
}

#[async_trait::async_trait]
impl TranscriptionHandoff for RecordingHandoff {
    async fn hand_off(&self, recording: &FinalizedRecording) -> Result<()> {
        self.recordings.lock().unwrap().push(recording.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Settings with timers long enough not to interfere unless a test lowers them
pub fn test_config(base: &Path) -> SessionConfig {
    let mut config = SessionConfig::new(base);
    config.fallback_spec = mono_16k();
    config.chunk_timeout = Duration::from_secs(60);
    config.start_timeout = Duration::from_secs(60);
    config.end_grace = Duration::from_millis(20);
    config.handoff_workers = 2;
    config.shutdown_grace = Duration::from_secs(5);
    config.closed_session_ttl = Duration::from_secs(60);
    config
}

pub fn mono_16k() -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Deterministic PCM bytes; `seed` makes chunks distinguishable
pub fn pcm(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

/// A chunk that is itself a small WAV file: header followed by `body`
pub fn wav_chunk(body: &[u8]) -> Vec<u8> {
    let mut chunk = encode_header(&mono_16k(), body.len() as u32).to_vec();
    chunk.extend_from_slice(body);
    chunk
}

pub fn read_u32_le(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}
