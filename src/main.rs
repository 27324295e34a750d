use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use meeting_ingest::handoff::build_handoff;
use meeting_ingest::{AudioFile, ChunkUpload, Config, LogHandoff, SessionConfig, SessionLifecycle};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "meeting-ingest", about = "Reassemble chunked meeting recordings")]
struct Cli {
    /// Config file (extension optional)
    #[arg(long, global = true, default_value = "config/meeting-ingest")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load the configuration and check the storage path
    CheckConfig,

    /// Feed chunk files, in order, through the ingest pipeline
    Assemble {
        /// Session id (generated if omitted)
        #[arg(long)]
        session: Option<String>,

        /// Chunk files; the Nth file becomes chunk N-1
        #[arg(required = true)]
        chunks: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;
    info!("Loaded config: {}", cfg.service.name);

    match cli.command {
        Command::CheckConfig => check_config(&cfg),
        Command::Assemble { session, chunks } => assemble(&cfg, session, chunks).await,
    }
}

fn check_config(cfg: &Config) -> Result<()> {
    let lifecycle_cfg = SessionConfig::from_config(cfg);
    info!("Storage path: {}", lifecycle_cfg.base_path.display());
    info!(
        "Timeouts: chunk={:?}, start={:?}, end grace={:?}",
        lifecycle_cfg.chunk_timeout, lifecycle_cfg.start_timeout, lifecycle_cfg.end_grace
    );
    info!("Transcription hand-off: {:?}", cfg.transcription.kind);

    let lifecycle = SessionLifecycle::new(lifecycle_cfg, Arc::new(LogHandoff))
        .context("Storage check failed")?;

    info!(
        "Configuration OK, recordings go to {}",
        lifecycle.config().base_path.display()
    );
    Ok(())
}

async fn assemble(cfg: &Config, session: Option<String>, chunks: Vec<PathBuf>) -> Result<()> {
    let session_id = session.unwrap_or_else(|| format!("meeting-{}", uuid::Uuid::new_v4()));
    let handoff = build_handoff(&cfg.transcription).await?;
    let lifecycle = SessionLifecycle::new(SessionConfig::from_config(cfg), handoff)?;

    lifecycle.start_session(&session_id, None).await?;
    let target = lifecycle
        .status(&session_id)
        .await
        .map(|stats| stats.target_path);

    let expected = chunks.len() as u32;
    for (index, path) in chunks.iter().enumerate() {
        let payload = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read chunk {:?}", path))?;

        let ack = lifecycle
            .submit_chunk(ChunkUpload {
                session_id: session_id.clone(),
                sequence_index: index as u32,
                expected_count: expected,
                payload,
                started_at: None,
            })
            .await?;
        info!("Chunk {} ({}): {:?}", index, path.display(), ack);
    }

    lifecycle.mark_end(&session_id).await;

    let report = lifecycle.shutdown_all().await;
    info!(
        "Assembly finished: {} sessions force-closed at shutdown, drained={}",
        report.finalized, report.drained
    );

    match target {
        Some(path) if path.exists() => {
            let audio = AudioFile::open(&path)?;
            info!(
                "Recording {}: {:.1}s, {}Hz, {} channels, header consistent={}",
                path.display(),
                audio.duration_seconds,
                audio.sample_rate,
                audio.channels,
                audio.header_matches_payload()
            );
        }
        _ => warn!("No container was produced for session {}", session_id),
    }

    Ok(())
}
