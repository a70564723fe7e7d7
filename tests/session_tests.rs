// Integration tests for the session controller
//
// The remote model is played by the in-memory transport, the microphone by a
// WAV file, and the speaker by a virtual output whose clock the tests drive.

use hound::{SampleFormat, WavSpec, WavWriter};
use live_voice::audio::{codec, AudioBackendConfig, AudioFrame, FileInput, VirtualClock};
use live_voice::session::SessionSnapshot;
use live_voice::tools::{ToolInvocation, RECORD_NOTE_TOOL};
use live_voice::transport::{MemoryPeer, MemoryServer, OutboundEvent};
use live_voice::{
    AudioInput, MemoryTransport, VoiceError, VoiceResult, NoteBook, RecordNoteTool, SessionConfig, SessionController,
    SessionHandle, SessionParts, SessionState, ToolRegistry, VirtualOutput,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    handle: SessionHandle,
    server: MemoryServer,
    clock: VirtualClock,
    _dir: TempDir,
}

fn write_tone(dir: &Path, seconds: u32) -> PathBuf {
    let path = dir.join("mic.wav");
    let spec = WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(&path, spec).unwrap();
    for i in 0..16000 * seconds {
        let sample = if i % 32 < 16 { 4000i16 } else { -4000 };
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
    path
}

fn harness_with_input(input: impl Fn(&Path) -> Box<dyn AudioInput>) -> Harness {
    let dir = TempDir::new().unwrap();
    let (transport, server) = MemoryTransport::pair();
    let output = VirtualOutput::new(24000);
    let clock = output.clock();

    let notes = NoteBook::default();
    let mut tools = ToolRegistry::new();
    tools.register(RecordNoteTool::new(notes.clone()));

    let handle = SessionController::spawn(SessionParts {
        config: SessionConfig {
            system_instruction: "Test persona".to_string(),
            ..SessionConfig::default()
        },
        transport: Arc::new(transport),
        input: input(dir.path()),
        output: Box::new(output),
        tools,
        notes,
    });

    Harness {
        handle,
        server,
        clock,
        _dir: dir,
    }
}

fn harness() -> Harness {
    harness_with_input(|dir| {
        Box::new(FileInput::new(write_tone(dir, 10), AudioBackendConfig::default()))
    })
}

async fn wait_for(
    handle: &SessionHandle,
    predicate: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    tokio::time::timeout(WAIT, handle.wait_for(predicate))
        .await
        .expect("timed out waiting for session snapshot")
        .unwrap()
}

/// Start the session and open it from the remote side
async fn open(h: &mut Harness) -> MemoryPeer {
    h.handle.start().unwrap();
    let peer = tokio::time::timeout(WAIT, h.server.accept())
        .await
        .unwrap()
        .unwrap();
    peer.open().await.unwrap();
    wait_for(&h.handle, |s| s.state == SessionState::Idle).await;
    peer
}

fn speech(seconds: f64) -> live_voice::TransportBlob {
    let samples = (seconds * 24000.0) as usize;
    codec::encode(&AudioFrame::mono(vec![0.2; samples], 24000))
}

fn note_call(id: &str, category: &str, content: &str) -> ToolInvocation {
    ToolInvocation {
        id: id.to_string(),
        name: RECORD_NOTE_TOOL.to_string(),
        args: json!({ "category": category, "content": content })
            .as_object()
            .cloned()
            .unwrap(),
    }
}

#[tokio::test]
async fn test_start_sends_setup_and_opens() {
    let mut h = harness();
    assert_eq!(h.handle.state(), SessionState::Disconnected);

    h.handle.start().unwrap();
    let peer = h.server.accept().await.unwrap();

    assert_eq!(peer.config.system_instruction, "Test persona");
    assert_eq!(peer.config.tools.len(), 1);
    assert_eq!(peer.config.tools[0].name, RECORD_NOTE_TOOL);
    assert_eq!(h.handle.state(), SessionState::Connecting);

    peer.open().await.unwrap();
    let snapshot = wait_for(&h.handle, |s| s.state == SessionState::Idle).await;
    assert!(snapshot.session_id.is_some());
    assert!(snapshot.error.is_none());
}

#[tokio::test]
async fn test_capture_streams_pcm_until_paused() {
    let mut h = harness();
    let mut peer = open(&mut h).await;

    h.handle.start_capture().unwrap();
    wait_for(&h.handle, |s| s.state == SessionState::Capturing).await;

    match tokio::time::timeout(WAIT, peer.recv()).await.unwrap() {
        Some(OutboundEvent::Audio(blob)) => {
            assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
            assert_eq!(blob.data.len(), 512);
        }
        other => panic!("Expected microphone audio, got {:?}", other),
    }

    h.handle.pause_capture().unwrap();
    let snapshot = wait_for(&h.handle, |s| s.state == SessionState::Idle).await;
    assert_eq!(snapshot.status, "Capture paused.");
    assert!(h.handle.stats().frames_sent >= 1);
}

#[tokio::test]
async fn test_capture_returns_to_idle_when_input_ends() {
    let mut h = harness_with_input(|dir| {
        Box::new(FileInput::new(write_tone(dir, 1), AudioBackendConfig::default()))
    });
    let _peer = open(&mut h).await;

    h.handle.start_capture().unwrap();
    wait_for(&h.handle, |s| s.state == SessionState::Capturing).await;

    let snapshot = wait_for(&h.handle, |s| s.state == SessionState::Idle).await;
    assert_eq!(snapshot.status, "Capture ended.");
    assert!(snapshot.error.is_none());
    assert!(h.handle.stats().frames_sent > 0);

    // The device was released, so capture can start again
    h.handle.start_capture().unwrap();
    wait_for(&h.handle, |s| s.state == SessionState::Capturing).await;
    h.handle.pause_capture().unwrap();
    wait_for(&h.handle, |s| s.state == SessionState::Idle).await;
}

/// Input that opens and then loses its device before the first frame
struct UnpluggedInput {
    capturing: bool,
}

#[async_trait::async_trait]
impl AudioInput for UnpluggedInput {
    async fn start(&mut self) -> VoiceResult<mpsc::Receiver<AudioFrame>> {
        let (_tx, rx) = mpsc::channel(1);
        self.capturing = true;
        Ok(rx)
    }

    async fn stop(&mut self) -> VoiceResult<()> {
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "unplugged"
    }

    fn take_error(&mut self) -> Option<VoiceError> {
        Some(VoiceError::CaptureUnavailable("device unplugged".to_string()))
    }
}

#[tokio::test]
async fn test_device_lost_mid_capture_is_error() {
    let mut h = harness_with_input(|_| Box::new(UnpluggedInput { capturing: false }));
    let peer = open(&mut h).await;

    h.handle.start_capture().unwrap();
    let snapshot = wait_for(&h.handle, |s| s.state == SessionState::Error).await;
    assert_eq!(snapshot.status, "Microphone unavailable.");
    assert!(snapshot.error.unwrap().contains("device unplugged"));

    // The session itself is still live
    peer.send_audio(speech(0.1)).await.unwrap();
    wait_for(&h.handle, |s| s.playing).await;
}

#[tokio::test]
async fn test_capture_unavailable_keeps_playback() {
    let mut h = harness_with_input(|_| {
        Box::new(FileInput::new(
            "/nonexistent/mic.wav",
            AudioBackendConfig::default(),
        ))
    });
    let peer = open(&mut h).await;

    h.handle.start_capture().unwrap();
    let snapshot = wait_for(&h.handle, |s| s.state == SessionState::Error).await;
    assert!(snapshot.error.unwrap().contains("Capture unavailable"));

    // Transport is still up, model audio still plays
    peer.send_audio(speech(0.2)).await.unwrap();
    let snapshot = wait_for(&h.handle, |s| s.playing).await;
    assert_eq!(snapshot.stats.chunks_scheduled, 1);
}

#[tokio::test]
async fn test_tool_calls_are_answered_in_order() {
    let mut h = harness();
    let mut peer = open(&mut h).await;

    let unknown = ToolInvocation {
        id: "fc-2".to_string(),
        name: "schedule_followup".to_string(),
        args: Default::default(),
    };
    peer.send_tool_calls(vec![note_call("fc-1", "Salary Expectation", "$95k"), unknown])
        .await
        .unwrap();

    let responses = match tokio::time::timeout(WAIT, peer.recv_control()).await.unwrap() {
        Some(OutboundEvent::ToolResponses(responses)) => responses,
        other => panic!("Expected tool responses, got {:?}", other),
    };

    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].id, "fc-1");
    assert_eq!(
        responses[0].response,
        json!({ "result": "Note recorded successfully." })
    );
    assert_eq!(responses[1].id, "fc-2");
    assert_eq!(responses[1].response["error"]["code"], "unsupported_action");

    let snapshot = wait_for(&h.handle, |s| s.notes.len() == 1).await;
    assert_eq!(snapshot.notes[0].category, "Salary Expectation");
    assert_eq!(snapshot.notes[0].content, "$95k");
    assert_eq!(snapshot.stats.tool_calls, 2);
    assert_eq!(snapshot.stats.tool_failures, 1);
}

#[tokio::test]
async fn test_interruption_stops_playback() {
    let mut h = harness();
    let peer = open(&mut h).await;

    for _ in 0..3 {
        peer.send_audio(speech(0.5)).await.unwrap();
    }
    wait_for(&h.handle, |s| s.playing).await;

    peer.interrupt().await.unwrap();
    let snapshot = wait_for(&h.handle, |s| !s.playing).await;
    assert_eq!(snapshot.stats.interruptions, 1);
    assert_eq!(h.clock.active(), 0);
}

#[tokio::test]
async fn test_playback_finishes_on_device_clock() {
    let mut h = harness();
    let peer = open(&mut h).await;

    peer.send_audio(speech(0.1)).await.unwrap();
    peer.send_audio(speech(0.1)).await.unwrap();

    // Only the first chunk changes the published snapshot; poll live counters
    for _ in 0..200 {
        if h.handle.stats().chunks_scheduled == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.handle.stats().chunks_scheduled, 2);
    assert!(h.handle.snapshot().playing);

    h.clock.advance(0.25);
    let snapshot = wait_for(&h.handle, |s| !s.playing).await;
    assert_eq!(snapshot.state, SessionState::Idle);
}

#[tokio::test]
async fn test_malformed_chunk_is_dropped() {
    let mut h = harness();
    let peer = open(&mut h).await;

    peer.send_audio(live_voice::TransportBlob::new(vec![1, 2, 3], "audio/pcm;rate=24000"))
        .await
        .unwrap();
    peer.send_audio(speech(0.1)).await.unwrap();

    let snapshot = wait_for(&h.handle, |s| s.playing).await;
    assert_eq!(snapshot.state, SessionState::Idle);
    assert!(snapshot.error.is_none());
    assert_eq!(h.handle.stats().chunks_dropped, 1);
}

#[tokio::test]
async fn test_transport_error_requires_reset() {
    let mut h = harness();
    let peer = open(&mut h).await;

    peer.fail("socket reset").await.unwrap();
    let snapshot = wait_for(&h.handle, |s| s.state == SessionState::Error).await;
    assert!(snapshot.error.unwrap().contains("socket reset"));

    // Capture cannot start without a session
    h.handle.start_capture().unwrap();
    h.handle.start().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.handle.state(), SessionState::Error);

    h.handle.reset().unwrap();
    let snapshot = wait_for(&h.handle, |s| s.state == SessionState::Connecting).await;
    assert!(snapshot.error.is_none());

    let peer = h.server.accept().await.unwrap();
    peer.open().await.unwrap();
    wait_for(&h.handle, |s| s.state == SessionState::Idle).await;
}

#[tokio::test]
async fn test_remote_close_disconnects() {
    let mut h = harness();
    let peer = open(&mut h).await;

    peer.close("session expired").await.unwrap();
    let snapshot = wait_for(&h.handle, |s| s.state == SessionState::Disconnected).await;
    assert_eq!(snapshot.status, "Disconnected: session expired");

    // A fresh start reconnects
    h.handle.start().unwrap();
    assert!(tokio::time::timeout(WAIT, h.server.accept()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_connection_refused_is_error() {
    let h = harness();
    h.server.refuse(Some("invalid API key"));

    h.handle.start().unwrap();
    let snapshot = wait_for(&h.handle, |s| s.state == SessionState::Error).await;
    assert!(snapshot.error.unwrap().contains("invalid API key"));
}

#[tokio::test]
async fn test_reset_is_idempotent() {
    let mut h = harness();
    let mut peer = open(&mut h).await;

    peer.send_tool_calls(vec![note_call("fc-1", "Feedback", "Clear answers")])
        .await
        .unwrap();
    peer.recv_control().await.unwrap();
    wait_for(&h.handle, |s| s.notes.len() == 1).await;

    h.handle.reset().unwrap();
    let once = wait_for(&h.handle, |s| s.state == SessionState::Connecting).await;

    h.handle.reset().unwrap();
    h.handle.reset().unwrap();
    // The old peer sees the close request
    assert_eq!(peer.recv_control().await, Some(OutboundEvent::Close));
    tokio::time::sleep(Duration::from_millis(50)).await;
    let twice = h.handle.snapshot();

    for snapshot in [&once, &twice] {
        assert_eq!(snapshot.state, SessionState::Connecting);
        assert!(snapshot.notes.is_empty());
        assert!(snapshot.error.is_none());
        assert!(!snapshot.playing);
    }
    assert_eq!(once.status, twice.status);
}

#[tokio::test]
async fn test_shutdown_stops_controller() {
    let mut h = harness();
    let _peer = open(&mut h).await;

    h.handle.shutdown().unwrap();
    wait_for(&h.handle, |s| s.state == SessionState::Disconnected).await;

    for _ in 0..50 {
        if !h.handle.is_running() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!h.handle.is_running());
    assert!(h.handle.start().is_err());
}
