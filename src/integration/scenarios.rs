//! End-to-end pipeline scenarios

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::error::{FlvError, ForwardError, PipelineError};
use crate::frames::FRAME_BYTES;
use crate::integration::fixtures::{
    feed, peer_closed, FlvBuilder, RecordingForwarder, ScriptedTranscoder,
};
use crate::pipeline::{Connection, PipelineOutcome, PipelineSupervisor};
use crate::transcode::{FfmpegTranscoder, Transcoder};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);
const PEER: &str = "127.0.0.1:40000";

fn supervisor(
    transcoder: impl Transcoder + 'static,
    forwarder: &RecordingForwarder,
    drain_timeout: Duration,
) -> PipelineSupervisor {
    PipelineSupervisor::new(Arc::new(transcoder), Arc::new(forwarder.clone()))
        .with_drain_timeout(drain_timeout)
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let reached = timeout(TEST_TIMEOUT, async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {}", what);
}

#[tokio::test]
async fn test_audio_stream_runs_to_end_of_stream() {
    let transcoder = ScriptedTranscoder::new();
    let forwarder = RecordingForwarder::new();
    let supervisor = supervisor(transcoder.clone(), &forwarder, Duration::from_secs(1));

    let source = FlvBuilder::new(true, false)
        .script_tag()
        .aac_sequence_header()
        .aac_frames(50)
        .build();
    let connection = Connection::new(PEER, Cursor::new(source), CancellationToken::new());

    let outcome = timeout(TEST_TIMEOUT, supervisor.handle(connection))
        .await
        .unwrap();
    assert!(matches!(outcome, PipelineOutcome::EndOfStream), "{}", outcome);

    assert_eq!(forwarder.sequences(), (0..50).collect::<Vec<u64>>());
    for (i, frame) in forwarder.frames().iter().enumerate() {
        assert_eq!(frame.data.len(), FRAME_BYTES);
        assert!(frame.data.iter().all(|&b| b == FlvBuilder::frame_marker(i)));
    }
    assert_eq!(transcoder.starts(), 1);
    assert!(transcoder.terminated());
}

#[tokio::test]
async fn test_video_packets_never_reach_transcoder() {
    let transcoder = ScriptedTranscoder::new();
    let forwarder = RecordingForwarder::new();
    let supervisor = supervisor(transcoder.clone(), &forwarder, Duration::from_secs(1));

    let source = FlvBuilder::new(true, true)
        .avc_sequence_header()
        .aac_sequence_header()
        .avc_frame(0, true, 0, &[0x65, 0x88])
        .aac_frame(0, &[1, 0x21])
        .avc_frame(33, false, 0, &[0x41])
        .aac_frame(23, &[2, 0x21])
        .avc_frame(66, false, 0, &[0x41])
        .aac_frame(46, &[3, 0x21])
        .build();
    let connection = Connection::new(PEER, Cursor::new(source), CancellationToken::new());

    let outcome = timeout(TEST_TIMEOUT, supervisor.handle(connection))
        .await
        .unwrap();
    assert!(matches!(outcome, PipelineOutcome::EndOfStream), "{}", outcome);

    let markers: Vec<u8> = forwarder.frames().iter().map(|f| f.data[0]).collect();
    assert_eq!(markers, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_video_only_stream_has_no_audio() {
    let transcoder = ScriptedTranscoder::new();
    let forwarder = RecordingForwarder::new();
    let supervisor = supervisor(transcoder.clone(), &forwarder, Duration::from_secs(1));

    let source = FlvBuilder::new(false, true)
        .avc_sequence_header()
        .avc_frame(0, true, 0, &[0x65])
        .avc_frame(33, false, 0, &[0x41])
        .build();
    let connection = Connection::new(PEER, Cursor::new(source), CancellationToken::new());

    let outcome = timeout(TEST_TIMEOUT, supervisor.handle(connection))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        PipelineOutcome::Failed(PipelineError::NoAudioTrack)
    ));
    assert_eq!(transcoder.starts(), 0);
    assert_eq!(forwarder.frame_count(), 0);
}

#[tokio::test]
async fn test_handshake_failure() {
    let transcoder = ScriptedTranscoder::new();
    let forwarder = RecordingForwarder::new();
    let supervisor = supervisor(transcoder.clone(), &forwarder, Duration::from_secs(1));

    let connection = Connection::new(
        PEER,
        Cursor::new(b"\x03\x00\x00\x00 not an flv stream".to_vec()),
        CancellationToken::new(),
    );
    let outcome = timeout(TEST_TIMEOUT, supervisor.handle(connection))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        PipelineOutcome::Failed(PipelineError::Handshake(FlvError::BadSignature(_)))
    ));
    assert_eq!(transcoder.starts(), 0);
}

#[tokio::test]
async fn test_missing_transcoder_executable() {
    let forwarder = RecordingForwarder::new();
    let transcoder = FfmpegTranscoder::with_command("/nonexistent/bin/ffmpeg", Vec::new());
    let supervisor = supervisor(transcoder, &forwarder, Duration::from_secs(1));

    let source = FlvBuilder::new(true, false)
        .aac_sequence_header()
        .aac_frames(3)
        .build();
    let connection = Connection::new(PEER, Cursor::new(source), CancellationToken::new());

    let outcome = timeout(TEST_TIMEOUT, supervisor.handle(connection))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        PipelineOutcome::Failed(PipelineError::TranscoderStart(_))
    ));
    assert_eq!(forwarder.frame_count(), 0);
}

#[tokio::test]
async fn test_forward_failure_stops_pipeline() {
    let transcoder = ScriptedTranscoder::new();
    let forwarder = RecordingForwarder::fail_after(4);
    let supervisor = supervisor(transcoder.clone(), &forwarder, Duration::from_secs(1));

    let source = FlvBuilder::new(true, false)
        .aac_sequence_header()
        .aac_frames(50)
        .build();
    let connection = Connection::new(PEER, Cursor::new(source), CancellationToken::new());

    let outcome = timeout(TEST_TIMEOUT, supervisor.handle(connection))
        .await
        .unwrap();
    assert!(
        matches!(
            outcome,
            PipelineOutcome::Failed(PipelineError::Forward(ForwardError::Rejected(_)))
        ),
        "{}",
        outcome
    );
    assert_eq!(forwarder.sequences(), vec![0, 1, 2, 3]);
    assert!(transcoder.terminated());
}

#[tokio::test]
async fn test_publisher_cut_mid_tag() {
    let transcoder = ScriptedTranscoder::new();
    let forwarder = RecordingForwarder::new();
    let supervisor = supervisor(transcoder.clone(), &forwarder, Duration::from_secs(1));

    let full = FlvBuilder::new(true, false)
        .aac_sequence_header()
        .aac_frames(4)
        .build();
    let split = FlvBuilder::new(true, false)
        .aac_sequence_header()
        .aac_frames(3)
        .build()
        .len();

    let (mut publisher, stream) = tokio::io::duplex(4096);
    let connection = Connection::new(PEER, stream, CancellationToken::new());
    let task = tokio::spawn(async move { supervisor.handle(connection).await });

    assert!(feed(&mut publisher, &full[..split]).await);
    wait_until("three frames", || forwarder.frame_count() == 3).await;

    // Tag header plus two bytes of the body, then the publisher goes away
    assert!(feed(&mut publisher, &full[split..split + 13]).await);
    drop(publisher);

    let outcome = timeout(TEST_TIMEOUT, task).await.unwrap().unwrap();
    assert!(
        matches!(
            outcome,
            PipelineOutcome::Failed(PipelineError::StreamRead(FlvError::Truncated(_)))
        ),
        "{}",
        outcome
    );
    assert_eq!(forwarder.sequences(), vec![0, 1, 2]);
    assert_eq!(transcoder.starts(), 1);
    assert!(transcoder.terminated());
}

#[tokio::test]
async fn test_transcoder_input_closed_before_header() {
    let transcoder = ScriptedTranscoder::exiting_on_start();
    let forwarder = RecordingForwarder::new();
    let supervisor = supervisor(transcoder.clone(), &forwarder, Duration::from_secs(1));

    let source = FlvBuilder::new(true, false)
        .aac_sequence_header()
        .aac_frames(5)
        .build();
    let connection = Connection::new(PEER, Cursor::new(source), CancellationToken::new());

    let outcome = timeout(TEST_TIMEOUT, supervisor.handle(connection))
        .await
        .unwrap();
    assert!(
        matches!(outcome, PipelineOutcome::Failed(PipelineError::StreamWrite(_))),
        "{}",
        outcome
    );
    assert_eq!(transcoder.starts(), 1);
    assert!(transcoder.terminated());
    assert_eq!(forwarder.frame_count(), 0);
}

#[tokio::test]
async fn test_cancel_while_publisher_idle() {
    let transcoder = ScriptedTranscoder::new();
    let forwarder = RecordingForwarder::new();
    let supervisor = supervisor(transcoder.clone(), &forwarder, Duration::from_secs(2));

    let full = FlvBuilder::new(true, false)
        .aac_sequence_header()
        .aac_frames(6)
        .build();
    let split = FlvBuilder::new(true, false)
        .aac_sequence_header()
        .aac_frames(3)
        .build()
        .len();

    let (mut publisher, stream) = tokio::io::duplex(4096);
    let cancel = CancellationToken::new();
    let connection = Connection::new(PEER, stream, cancel.clone());
    let task = tokio::spawn(async move { supervisor.handle(connection).await });

    assert!(feed(&mut publisher, &full[..split]).await);
    wait_until("three frames", || forwarder.frame_count() == 3).await;

    // The packet relay is now parked on a publisher read
    cancel.cancel();
    feed(&mut publisher, &full[split..]).await;

    let outcome = timeout(TEST_TIMEOUT, task).await.unwrap().unwrap();
    assert!(matches!(outcome, PipelineOutcome::Canceled), "{}", outcome);
    assert!(forwarder.frame_count() >= 3);
    assert!(transcoder.terminated());
    assert!(peer_closed(&mut publisher).await);
}

#[tokio::test]
async fn test_cancel_then_publisher_disconnects() {
    let transcoder = ScriptedTranscoder::new();
    let forwarder = RecordingForwarder::new();
    let supervisor = supervisor(transcoder.clone(), &forwarder, Duration::from_secs(2));

    let prefix = FlvBuilder::new(true, false)
        .aac_sequence_header()
        .aac_frames(2)
        .build();
    let (mut publisher, stream) = tokio::io::duplex(4096);
    let cancel = CancellationToken::new();
    let connection = Connection::new(PEER, stream, cancel.clone());
    let task = tokio::spawn(async move { supervisor.handle(connection).await });

    assert!(feed(&mut publisher, &prefix).await);
    wait_until("two frames", || forwarder.frame_count() == 2).await;

    cancel.cancel();
    drop(publisher);

    let outcome = timeout(TEST_TIMEOUT, task).await.unwrap().unwrap();
    assert!(matches!(outcome, PipelineOutcome::Canceled), "{}", outcome);
    assert_eq!(forwarder.sequences(), vec![0, 1]);
    assert!(transcoder.terminated());
}

#[tokio::test]
async fn test_silent_publisher_is_closed_after_drain_timeout() {
    let transcoder = ScriptedTranscoder::new();
    let forwarder = RecordingForwarder::new();
    let supervisor = supervisor(transcoder.clone(), &forwarder, Duration::from_millis(200));

    let prefix = FlvBuilder::new(true, false)
        .aac_sequence_header()
        .aac_frames(1)
        .build();
    let (mut publisher, stream) = tokio::io::duplex(4096);
    let cancel = CancellationToken::new();
    let connection = Connection::new(PEER, stream, cancel.clone());
    let task = tokio::spawn(async move { supervisor.handle(connection).await });

    assert!(feed(&mut publisher, &prefix).await);
    wait_until("first frame", || forwarder.frame_count() == 1).await;

    // Publisher never sends another byte and never disconnects
    cancel.cancel();
    let outcome = timeout(TEST_TIMEOUT, task).await.unwrap().unwrap();
    assert!(matches!(outcome, PipelineOutcome::Canceled), "{}", outcome);
    assert!(transcoder.terminated());
    assert!(peer_closed(&mut publisher).await);
}

#[tokio::test]
async fn test_hung_transcoder_is_killed() {
    let transcoder = ScriptedTranscoder::lingering();
    let forwarder = RecordingForwarder::new();
    let supervisor = supervisor(transcoder.clone(), &forwarder, Duration::from_millis(200));

    let source = FlvBuilder::new(true, false)
        .aac_sequence_header()
        .aac_frames(5)
        .build();
    let cancel = CancellationToken::new();
    let connection = Connection::new(PEER, Cursor::new(source), cancel.clone());
    let task = tokio::spawn(async move { supervisor.handle(connection).await });

    // The output never ends, so only cancellation can stop the pipeline
    wait_until("five frames", || forwarder.frame_count() == 5).await;
    sleep(Duration::from_millis(50)).await;
    assert!(!task.is_finished());

    cancel.cancel();
    let outcome = timeout(TEST_TIMEOUT, task).await.unwrap().unwrap();
    assert!(matches!(outcome, PipelineOutcome::Canceled), "{}", outcome);
    assert!(transcoder.terminated());
}

#[cfg(unix)]
#[tokio::test]
async fn test_external_process_passthrough() {
    let forwarder = RecordingForwarder::new();
    let transcoder = FfmpegTranscoder::with_command("cat", Vec::new());
    let supervisor = supervisor(transcoder, &forwarder, Duration::from_secs(2));

    let source = FlvBuilder::new(true, false)
        .aac_sequence_header()
        .aac_frames(300)
        .build();
    let expected = source.clone();
    let connection = Connection::new(PEER, Cursor::new(source), CancellationToken::new());

    let outcome = timeout(TEST_TIMEOUT, supervisor.handle(connection))
        .await
        .unwrap();
    assert!(matches!(outcome, PipelineOutcome::EndOfStream), "{}", outcome);

    // `cat` echoes the re-muxed stream, which is byte-identical to the source
    let frames = forwarder.frames();
    assert_eq!(frames.len(), expected.len() / FRAME_BYTES);
    assert_eq!(frames[0].data.as_ref(), &expected[..FRAME_BYTES]);
    let last = frames.len() - 1;
    assert_eq!(
        frames[last].data.as_ref(),
        &expected[last * FRAME_BYTES..(last + 1) * FRAME_BYTES]
    );
}
