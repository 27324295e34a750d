use super::container::WAV_HEADER_LEN;
use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// A finalized container read back from disk, used to verify what the
/// ingest pipeline wrote.
pub struct AudioFile {
    pub path: PathBuf,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub samples: Vec<i32>,
    /// Payload size the header claims
    pub declared_payload_bytes: u32,
    /// Payload size actually present after the header
    pub stored_payload_bytes: u64,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Reading back container: {}", path.display());

        let reader = WavReader::open(path)
            .with_context(|| format!("Not a readable WAV container: {:?}", path))?;
        let spec = reader.spec();
        let declared_payload_bytes = reader.len() * (spec.bits_per_sample as u32 / 8);

        if spec.sample_format == SampleFormat::Float {
            bail!("{} holds float samples; ingest only writes PCM", path.display());
        }

        let samples = reader
            .into_samples::<i32>()
            .collect::<Result<Vec<_>, _>>()
            .context("Container payload is truncated or malformed")?;

        let file_len = fs::metadata(path)
            .with_context(|| format!("Failed to stat {:?}", path))?
            .len();
        let stored_payload_bytes = file_len.saturating_sub(WAV_HEADER_LEN as u64);

        let frames = samples.len() as f64 / spec.channels.max(1) as f64;
        let duration_seconds = frames / spec.sample_rate.max(1) as f64;

        let audio = Self {
            path: path.to_path_buf(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            bits_per_sample: spec.bits_per_sample,
            samples,
            declared_payload_bytes,
            stored_payload_bytes,
        };

        if !audio.header_matches_payload() {
            warn!(
                "Header of {} declares {} bytes but {} are stored",
                path.display(),
                audio.declared_payload_bytes,
                audio.stored_payload_bytes
            );
        }

        Ok(audio)
    }

    /// Payload size implied by the decoded samples
    pub fn payload_bytes(&self) -> u64 {
        self.samples.len() as u64 * (self.bits_per_sample as u64 / 8)
    }

    /// True once the size fields were patched to the final payload length
    pub fn header_matches_payload(&self) -> bool {
        self.declared_payload_bytes as u64 == self.stored_payload_bytes
    }
}
