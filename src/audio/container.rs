//! WAV container synthesis for reassembled recordings.
//!
//! The file is written in three steps: a placeholder header with zeroed size
//! fields, the raw PCM payload, and finally a patch of the two size fields
//! once the true payload length is known.

use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavSpec};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Size of the canonical PCM WAV header
pub const WAV_HEADER_LEN: usize = 44;

/// RIFF size field: total file length minus the 8-byte RIFF preamble
const RIFF_SIZE_OFFSET: u64 = 4;
/// `data` sub-chunk size field: payload length only
const DATA_SIZE_OFFSET: u64 = 40;
/// Header bytes counted by the RIFF size field besides the payload
const RIFF_HEADER_OVERHEAD: u64 = 36;

/// Largest payload whose sizes still fit the 32-bit header fields
pub const MAX_PAYLOAD_BYTES: u64 = u32::MAX as u64 - RIFF_HEADER_OVERHEAD;

/// Block align and byte rate of `spec`, or `None` if the format is not
/// integer PCM we can describe in a 44-byte header.
pub fn frame_layout(spec: &WavSpec) -> Option<(u16, u32)> {
    if !matches!(spec.bits_per_sample, 8 | 16 | 24 | 32)
        || spec.channels == 0
        || spec.sample_rate == 0
    {
        return None;
    }

    let block_align = u32::from(spec.channels) * u32::from(spec.bits_per_sample) / 8;
    let byte_rate = spec.sample_rate.checked_mul(block_align)?;
    Some((u16::try_from(block_align).ok()?, byte_rate))
}

/// Encode a 44-byte PCM header for `spec` carrying `payload_len` bytes.
///
/// A format without a valid [`frame_layout`] gets zeroed rate fields rather
/// than wrapped ones; callers only pass validated or parsed formats.
pub fn encode_header(spec: &WavSpec, payload_len: u32) -> [u8; WAV_HEADER_LEN] {
    let (block_align, byte_rate) = frame_layout(spec).unwrap_or((0, 0));
    let riff_size = payload_len.saturating_add(RIFF_HEADER_OVERHEAD as u32);

    let mut header = [0u8; WAV_HEADER_LEN];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&riff_size.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM
    header[22..24].copy_from_slice(&spec.channels.to_le_bytes());
    header[24..28].copy_from_slice(&spec.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&spec.bits_per_sample.to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&payload_len.to_le_bytes());
    header
}

/// Length of the WAV header a chunk starts with, or 0 for raw PCM.
///
/// Only chunks that begin with `RIFF....WAVE` and are long enough to hold a
/// full header count as carrying one.
pub fn embedded_header_len(chunk: &[u8]) -> usize {
    if chunk.len() >= WAV_HEADER_LEN && &chunk[0..4] == b"RIFF" && &chunk[8..12] == b"WAVE" {
        WAV_HEADER_LEN
    } else {
        0
    }
}

/// Format described by a chunk's embedded header, if it has a usable one.
pub fn parse_embedded_header(chunk: &[u8]) -> Option<WavSpec> {
    if embedded_header_len(chunk) == 0 {
        return None;
    }

    let u16_at = |at: usize| u16::from_le_bytes([chunk[at], chunk[at + 1]]);
    let u32_at = |at: usize| {
        u32::from_le_bytes([chunk[at], chunk[at + 1], chunk[at + 2], chunk[at + 3]])
    };

    let channels = u16_at(22);
    let sample_rate = u32_at(24);
    let bits_per_sample = u16_at(34);

    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample,
        sample_format: SampleFormat::Int,
    };

    // Client-supplied; anything we could not re-encode falls back to config.
    frame_layout(&spec).map(|_| spec)
}

/// Overwrite both size fields of an existing container.
///
/// Only bytes 4..8 and 40..44 are touched, so patching twice with the same
/// count leaves the file byte-identical.
pub fn patch_header(path: &Path, final_byte_count: u64) -> Result<()> {
    if final_byte_count > MAX_PAYLOAD_BYTES {
        bail!(
            "payload of {} bytes does not fit a WAV header ({})",
            final_byte_count,
            path.display()
        );
    }

    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .with_context(|| format!("Failed to open container for patching: {:?}", path))?;

    let data_size = final_byte_count as u32;
    let riff_size = (final_byte_count + RIFF_HEADER_OVERHEAD) as u32;

    file.seek(SeekFrom::Start(RIFF_SIZE_OFFSET))?;
    file.write_all(&riff_size.to_le_bytes())?;
    file.seek(SeekFrom::Start(DATA_SIZE_OFFSET))?;
    file.write_all(&data_size.to_le_bytes())?;
    file.sync_data().context("Failed to sync patched header")?;

    debug!(
        "Patched header of {} (riff={}, data={})",
        path.display(),
        riff_size,
        data_size
    );

    Ok(())
}

/// Summary of a finished container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledContainer {
    pub spec: WavSpec,
    pub payload_bytes: u64,
    pub chunks_written: usize,
}

/// Sequential writer for one container file
pub struct ContainerWriter {
    path: PathBuf,
    spec: WavSpec,
    writer: BufWriter<File>,
    bytes_written: u64,
}

impl ContainerWriter {
    /// Create (or truncate) `path` and write a header with zeroed sizes, so
    /// the file is a well-formed, empty WAV from the first byte on.
    pub fn write_placeholder_header(path: impl AsRef<Path>, spec: WavSpec) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = File::create(&path)
            .with_context(|| format!("Failed to create container: {:?}", path))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(&encode_header(&spec, 0))
            .context("Failed to write placeholder header")?;

        Ok(Self {
            path,
            spec,
            writer,
            bytes_written: 0,
        })
    }

    pub fn append_payload(&mut self, bytes: &[u8]) -> Result<()> {
        if self.bytes_written + bytes.len() as u64 > MAX_PAYLOAD_BYTES {
            bail!(
                "container {} would exceed the WAV size limit",
                self.path.display()
            );
        }

        self.writer
            .write_all(bytes)
            .with_context(|| format!("Failed to append payload to {:?}", self.path))?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flush the payload and patch the header with the final byte count.
    pub fn finish(mut self) -> Result<u64> {
        self.writer.flush().context("Failed to flush container")?;
        let file = self
            .writer
            .into_inner()
            .map_err(|e| e.into_error())
            .context("Failed to flush container")?;
        file.sync_all().context("Failed to sync container")?;
        drop(file);

        patch_header(&self.path, self.bytes_written)?;
        Ok(self.bytes_written)
    }
}

/// Write ordered chunks into a fresh container at `path`.
///
/// The format comes from the first chunk carrying an embedded header, or
/// `fallback` if none does. Every embedded header is stripped; the container
/// gets its own synthesized header.
pub fn assemble_container<'a, I>(path: &Path, fallback: WavSpec, chunks: I) -> Result<AssembledContainer>
where
    I: IntoIterator<Item = (u32, &'a [u8])>,
    I::IntoIter: Clone,
{
    let chunks = chunks.into_iter();

    let spec = chunks
        .clone()
        .find_map(|(_, bytes)| parse_embedded_header(bytes))
        .unwrap_or(fallback);

    let mut writer = ContainerWriter::write_placeholder_header(path, spec)?;
    let mut chunks_written = 0;

    for (index, bytes) in chunks {
        let header_len = embedded_header_len(bytes);
        if header_len > 0 && index > 0 {
            debug!("Stripping embedded header from chunk {}", index);
        }
        writer.append_payload(&bytes[header_len..])?;
        chunks_written += 1;
    }

    let payload_bytes = writer.finish()?;

    info!(
        "Container written: {} ({} chunks, {} payload bytes, {}Hz, {} ch)",
        path.display(),
        chunks_written,
        payload_bytes,
        spec.sample_rate,
        spec.channels
    );

    Ok(AssembledContainer {
        spec,
        payload_bytes,
        chunks_written,
    })
}

/// Playback length of `payload_bytes` of PCM in `spec`
pub fn duration_secs(spec: &WavSpec, payload_bytes: u64) -> f64 {
    let bytes_per_second =
        spec.sample_rate as u64 * spec.channels as u64 * (spec.bits_per_sample as u64 / 8);
    if bytes_per_second == 0 {
        return 0.0;
    }
    payload_bytes as f64 / bytes_per_second as f64
}
