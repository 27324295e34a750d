// End-to-end tests for chunk ingestion and finalization
//
// These tests drive SessionLifecycle the way the upload layer does and
// check the containers it writes and the hand-offs it dispatches.

mod common;

use anyhow::Result;
use common::{pcm, read_u32_le, test_config, wav_chunk, RecordingHandoff};
use meeting_ingest::audio::{AudioFile, WAV_HEADER_LEN};
use meeting_ingest::{
    ChunkAck, ChunkUpload, FinalizeTrigger, IgnoreReason, IngestError, SessionLifecycle,
};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(5);

fn upload(session_id: &str, index: u32, expected: u32, payload: Vec<u8>) -> ChunkUpload {
    ChunkUpload {
        session_id: session_id.to_string(),
        sequence_index: index,
        expected_count: expected,
        payload,
        started_at: None,
    }
}

#[tokio::test]
async fn test_out_of_order_chunks_assemble_in_index_order() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let handoff = RecordingHandoff::new();
    let lifecycle = SessionLifecycle::new(test_config(temp_dir.path()), handoff.clone())?;

    // 512 bytes with a header, then two raw chunks, arriving 1, 0, 2
    let first = wav_chunk(&pcm(468, 10));
    assert_eq!(first.len(), 512);
    let second = pcm(500, 20);
    let third = pcm(300, 30);

    let ack = lifecycle
        .submit_chunk(upload("m1", 1, 3, second.clone()))
        .await?;
    assert_eq!(
        ack,
        ChunkAck::Stored {
            received: 1,
            expected: 3
        }
    );
    lifecycle.submit_chunk(upload("m1", 0, 3, first)).await?;
    let ack = lifecycle
        .submit_chunk(upload("m1", 2, 3, third.clone()))
        .await?;
    assert_eq!(ack, ChunkAck::Completed);

    assert!(handoff.wait_for(1, WAIT).await, "Recording was never handed off");

    let recording = &handoff.recordings()[0];
    assert_eq!(recording.session_id, "m1");
    assert_eq!(recording.trigger, FinalizeTrigger::ChunksComplete);
    assert!(recording.complete);
    assert_eq!(recording.payload_bytes, 1268);
    assert_eq!(recording.chunks_written, 3);

    let bytes = fs::read(&recording.path)?;
    assert_eq!(read_u32_le(&bytes, 40), 1268);
    assert_eq!(read_u32_le(&bytes, 4), 1304);

    let mut expected_payload = pcm(468, 10);
    expected_payload.extend_from_slice(&second);
    expected_payload.extend_from_slice(&third);
    assert_eq!(&bytes[WAV_HEADER_LEN..], expected_payload.as_slice());

    let audio = AudioFile::open(&recording.path)?;
    assert_eq!(audio.samples.len(), 634);

    assert!(lifecycle.active_sessions().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_arrival_order_does_not_change_output() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let handoff = RecordingHandoff::new();
    let lifecycle = SessionLifecycle::new(test_config(temp_dir.path()), handoff.clone())?;

    let chunks = [pcm(200, 1), pcm(300, 2), pcm(100, 3)];
    let orders: [[u32; 3]; 6] = [
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];

    for (n, order) in orders.iter().enumerate() {
        let session_id = format!("perm-{}", n);
        for &index in order {
            lifecycle
                .submit_chunk(upload(&session_id, index, 3, chunks[index as usize].clone()))
                .await?;
        }
    }

    assert!(handoff.wait_for(orders.len(), WAIT).await);

    let payloads: Vec<Vec<u8>> = handoff
        .recordings()
        .iter()
        .map(|recording| fs::read(&recording.path).map(|bytes| bytes[WAV_HEADER_LEN..].to_vec()))
        .collect::<Result<_, _>>()?;

    let expected = chunks.concat();
    for payload in &payloads {
        assert_eq!(payload, &expected);
    }

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_triggers_finalize_once() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let handoff = RecordingHandoff::new();
    let mut config = test_config(temp_dir.path());
    config.end_grace = Duration::ZERO;
    let lifecycle = Arc::new(SessionLifecycle::new(config, handoff.clone())?);

    let sessions = 8;
    for s in 0..sessions {
        let session_id = format!("race-{}", s);
        lifecycle
            .submit_chunk(upload(&session_id, 0, 2, pcm(64, 1)))
            .await?;

        // Several uploads of the last chunk race several end signals
        let mut handles = Vec::new();
        for _ in 0..4 {
            let lifecycle = Arc::clone(&lifecycle);
            let session_id = session_id.clone();
            handles.push(tokio::spawn(async move {
                let _ = lifecycle
                    .submit_chunk(upload(&session_id, 1, 2, pcm(64, 2)))
                    .await;
                lifecycle.mark_end(&session_id).await;
            }));
        }
        for handle in handles {
            handle.await?;
        }
    }

    assert!(handoff.wait_for(sessions, WAIT).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let recordings = handoff.recordings();
    assert_eq!(recordings.len(), sessions, "Each session handed off exactly once");
    let mut ids: Vec<_> = recordings.iter().map(|r| r.session_id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), sessions);
    for recording in &recordings {
        assert_eq!(recording.payload_bytes, 128);
        assert!(recording.complete);
    }

    Ok(())
}

#[tokio::test]
async fn test_activity_rearms_timeout() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let handoff = RecordingHandoff::new();
    let mut config = test_config(temp_dir.path());
    config.chunk_timeout = Duration::from_millis(400);
    let lifecycle = SessionLifecycle::new(config, handoff.clone())?;

    lifecycle.submit_chunk(upload("slow", 0, 3, pcm(100, 1))).await?;
    tokio::time::sleep(Duration::from_millis(250)).await;
    lifecycle.submit_chunk(upload("slow", 1, 3, pcm(100, 2))).await?;
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(handoff.count(), 0, "Deadline should have been rearmed");
    assert!(lifecycle.status("slow").await.is_some());

    assert!(handoff.wait_for(1, WAIT).await, "Timeout never fired");

    let recording = &handoff.recordings()[0];
    assert_eq!(recording.trigger, FinalizeTrigger::Timeout);
    assert!(!recording.complete);
    assert_eq!(recording.missing_chunks, vec![2]);
    assert_eq!(recording.payload_bytes, 200);
    assert!(lifecycle.status("slow").await.is_none());

    Ok(())
}

#[tokio::test]
async fn test_timeout_salvages_partial_recording() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let handoff = RecordingHandoff::new();
    let mut config = test_config(temp_dir.path());
    config.chunk_timeout = Duration::from_millis(150);
    let lifecycle = SessionLifecycle::new(config, handoff.clone())?;

    for index in [3u32, 0, 1] {
        lifecycle
            .submit_chunk(upload("partial", index, 4, pcm(50, index as u8 * 10)))
            .await?;
    }

    assert!(handoff.wait_for(1, WAIT).await);

    let recording = &handoff.recordings()[0];
    assert!(!recording.complete);
    assert_eq!(recording.missing_chunks, vec![2]);
    assert_eq!(recording.expected_chunks, 4);
    assert_eq!(recording.chunks_written, 3);

    let bytes = fs::read(&recording.path)?;
    let expected: Vec<u8> = [pcm(50, 0), pcm(50, 10), pcm(50, 30)].concat();
    assert_eq!(&bytes[WAV_HEADER_LEN..], expected.as_slice());
    assert_eq!(read_u32_le(&bytes, 40), 150);

    Ok(())
}

#[tokio::test]
async fn test_shutdown_finalizes_open_sessions() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let handoff = RecordingHandoff::new();
    let lifecycle = SessionLifecycle::new(test_config(temp_dir.path()), handoff.clone())?;

    for s in 0..3 {
        lifecycle
            .submit_chunk(upload(&format!("open-{}", s), 0, 5, pcm(80, s)))
            .await?;
    }
    assert_eq!(lifecycle.active_sessions().len(), 3);

    let report = lifecycle.shutdown_all().await;

    assert_eq!(report.sessions, 3);
    assert_eq!(report.finalized, 3);
    assert!(report.drained);
    assert_eq!(handoff.count(), 3, "Hand-offs should be drained by shutdown");
    assert!(lifecycle.active_sessions().is_empty());

    for recording in handoff.recordings() {
        assert_eq!(recording.trigger, FinalizeTrigger::Shutdown);
        assert!(!recording.complete);
        assert_eq!(recording.missing_chunks, vec![1, 2, 3, 4]);
    }

    let late = lifecycle.submit_chunk(upload("open-0", 1, 5, pcm(80, 9))).await;
    assert!(matches!(late, Err(IngestError::ShuttingDown)));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_catches_sessions_opened_during_shutdown() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let handoff = RecordingHandoff::new();
    let lifecycle = Arc::new(SessionLifecycle::new(
        test_config(temp_dir.path()),
        handoff.clone(),
    )?);

    let mut submits = Vec::new();
    for n in 0..32 {
        let lifecycle = Arc::clone(&lifecycle);
        submits.push(tokio::spawn(async move {
            lifecycle
                .submit_chunk(upload(&format!("racer-{}", n), 0, 2, pcm(32, n as u8)))
                .await
        }));
    }

    let report = lifecycle.shutdown_all().await;

    let mut stored = 0;
    for submit in submits {
        match submit.await? {
            Ok(ChunkAck::Stored { .. }) => stored += 1,
            Ok(ChunkAck::Ignored(IgnoreReason::SessionClosed)) | Err(IngestError::ShuttingDown) => {}
            other => panic!("unexpected submission result {:?}", other),
        }
    }

    // Every chunk that was accepted ends up in a handed-off recording
    assert!(report.drained);
    assert_eq!(report.finalized, stored);
    assert_eq!(handoff.count(), stored);
    assert!(lifecycle.active_sessions().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_shrinking_declared_total_is_not_complete() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let handoff = RecordingHandoff::new();
    let lifecycle = SessionLifecycle::new(test_config(temp_dir.path()), handoff.clone())?;

    lifecycle.submit_chunk(upload("shrink", 0, 4, pcm(20, 1))).await?;
    lifecycle.submit_chunk(upload("shrink", 3, 4, pcm(20, 4))).await?;
    let ack = lifecycle.submit_chunk(upload("shrink", 2, 3, pcm(20, 3))).await?;
    assert_eq!(ack, ChunkAck::Completed, "Count reached the revised total");

    assert!(handoff.wait_for(1, WAIT).await);

    let recording = &handoff.recordings()[0];
    assert_eq!(recording.expected_chunks, 3);
    assert_eq!(recording.chunks_written, 3);
    assert_eq!(recording.missing_chunks, vec![1]);
    assert!(!recording.complete, "A gap below the total is never complete");

    Ok(())
}

#[tokio::test]
async fn test_unusable_embedded_format_still_hands_off() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let handoff = RecordingHandoff::new();
    let lifecycle = SessionLifecycle::new(test_config(temp_dir.path()), handoff.clone())?;

    let mut first = wav_chunk(&pcm(64, 1));
    first[22..24].copy_from_slice(&4096u16.to_le_bytes());
    first[34..36].copy_from_slice(&32u16.to_le_bytes());

    lifecycle.submit_chunk(upload("absurd", 0, 2, first)).await?;
    lifecycle.submit_chunk(upload("absurd", 1, 2, pcm(64, 2))).await?;

    assert!(handoff.wait_for(1, WAIT).await, "Recording was lost");

    let recording = &handoff.recordings()[0];
    assert!(recording.complete);
    assert_eq!(recording.payload_bytes, 128);

    let audio = AudioFile::open(&recording.path)?;
    assert_eq!(audio.sample_rate, 16000, "Configured format is used instead");
    assert_eq!(audio.channels, 1);

    Ok(())
}

#[tokio::test]
async fn test_duplicate_chunk_keeps_first_payload() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let handoff = RecordingHandoff::new();
    let lifecycle = SessionLifecycle::new(test_config(temp_dir.path()), handoff.clone())?;

    lifecycle.submit_chunk(upload("dup", 0, 2, pcm(40, 1))).await?;
    let ack = lifecycle.submit_chunk(upload("dup", 0, 2, pcm(40, 99))).await?;
    assert_eq!(ack, ChunkAck::Ignored(IgnoreReason::DuplicateChunk));

    lifecycle.submit_chunk(upload("dup", 1, 2, pcm(40, 2))).await?;
    assert!(handoff.wait_for(1, WAIT).await);

    let bytes = fs::read(&handoff.recordings()[0].path)?;
    assert_eq!(&bytes[WAV_HEADER_LEN..WAV_HEADER_LEN + 40], pcm(40, 1).as_slice());

    Ok(())
}

#[tokio::test]
async fn test_chunk_after_finalization_is_ignored() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let handoff = RecordingHandoff::new();
    let lifecycle = SessionLifecycle::new(test_config(temp_dir.path()), handoff.clone())?;

    lifecycle.submit_chunk(upload("done", 0, 1, pcm(40, 1))).await?;
    assert!(handoff.wait_for(1, WAIT).await);

    let ack = lifecycle.submit_chunk(upload("done", 1, 2, pcm(40, 2))).await?;
    assert_eq!(ack, ChunkAck::Ignored(IgnoreReason::SessionClosed));
    assert!(lifecycle.active_sessions().is_empty());

    let files = fs::read_dir(temp_dir.path())?.count();
    assert_eq!(files, 1, "A late chunk must not open a new container");

    Ok(())
}

#[tokio::test]
async fn test_end_signal_for_unknown_session_is_noop() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let handoff = RecordingHandoff::new();
    let lifecycle = SessionLifecycle::new(test_config(temp_dir.path()), handoff.clone())?;

    assert!(!lifecycle.mark_end("nobody").await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handoff.count(), 0);
    assert!(lifecycle.active_sessions().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_end_signal_finishes_undeclared_session() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let handoff = RecordingHandoff::new();
    let lifecycle = SessionLifecycle::new(test_config(temp_dir.path()), handoff.clone())?;

    lifecycle.submit_chunk(upload("live", 1, 0, pcm(60, 2))).await?;
    lifecycle.submit_chunk(upload("live", 0, 0, pcm(60, 1))).await?;

    assert!(lifecycle.mark_end("live").await);
    assert!(!lifecycle.mark_end("live").await, "Second end signal is ignored");
    assert!(handoff.wait_for(1, WAIT).await);

    let recording = &handoff.recordings()[0];
    assert_eq!(recording.trigger, FinalizeTrigger::EndSignal);
    assert_eq!(recording.expected_chunks, 0);
    assert!(recording.complete);
    assert_eq!(recording.payload_bytes, 120);

    Ok(())
}

#[tokio::test]
async fn test_end_signal_waits_for_straggler() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let handoff = RecordingHandoff::new();
    let lifecycle = SessionLifecycle::new(test_config(temp_dir.path()), handoff.clone())?;

    lifecycle.submit_chunk(upload("late", 0, 3, pcm(30, 1))).await?;
    lifecycle.submit_chunk(upload("late", 1, 3, pcm(30, 2))).await?;
    assert!(lifecycle.mark_end("late").await);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(handoff.count(), 0, "Incomplete session should stay open");
    let stats = lifecycle.status("late").await.expect("session still open");
    assert!(stats.end_signaled);
    assert_eq!(stats.missing_chunks, vec![2]);

    let ack = lifecycle.submit_chunk(upload("late", 2, 3, pcm(30, 3))).await?;
    assert_eq!(ack, ChunkAck::Completed);
    assert!(handoff.wait_for(1, WAIT).await);

    let recording = &handoff.recordings()[0];
    assert!(recording.complete);
    assert_eq!(recording.trigger, FinalizeTrigger::ChunksComplete);

    Ok(())
}

#[tokio::test]
async fn test_started_session_without_chunks_closes_empty() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let handoff = RecordingHandoff::new();
    let mut config = test_config(temp_dir.path());
    config.start_timeout = Duration::from_millis(100);
    let lifecycle = SessionLifecycle::new(config, handoff.clone())?;

    assert!(lifecycle.start_session("idle", None).await?);
    assert!(!lifecycle.start_session("idle", None).await?);

    let target = lifecycle.status("idle").await.expect("session open").target_path;
    assert!(target.exists(), "Placeholder container is written on start");

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(lifecycle.status("idle").await.is_none());
    assert_eq!(handoff.count(), 0, "Empty sessions are not handed off");

    Ok(())
}

#[tokio::test]
async fn test_unusable_storage_path_is_rejected() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let blocker = temp_dir.path().join("not-a-dir");
    fs::write(&blocker, b"file")?;

    let result = SessionLifecycle::new(test_config(&blocker), RecordingHandoff::new());
    assert!(matches!(result, Err(IngestError::Config(_))));

    let relative = temp_dir.path().join("nested").join("..").join("records");
    let lifecycle = SessionLifecycle::new(test_config(&relative), RecordingHandoff::new())?;
    let resolved = &lifecycle.config().base_path;
    assert!(resolved.is_absolute());
    assert!(resolved.ends_with("records"));
    assert!(!resolved.to_string_lossy().contains(".."));

    Ok(())
}
