//! Session lifecycle and mode orchestration.
//!
//! [`SessionController`] is the capture-side counterpart of the service in [`crate::server`]: it
//! owns the connection lifecycle, enforces the in-flight frame bound when dispatching, mirrors
//! the authoritative count/state coming back from the service, and drives the optional
//! ticker-based capture loop. [`process_animation`] is the batch variant: the same per-frame
//! path run synchronously over a pre-recorded animation, with no frame shedding.

use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;

use crate::anim::Animation;
use crate::counter::{RepCounter, RepState, Thresholds};
use crate::detector::PoseEstimator;
use crate::draw;
use crate::frame;
use crate::landmark::arm_angles;
use crate::pipeline::{FrameGate, FramePump, FrameSource, PipelineConfig};
use crate::protocol::{ClientMessage, ControlCommand, LandmarkSet, PoseUpdate};

/// Connection lifecycle state.
///
/// `Disconnected` → `Connecting` → `Connected`, back to `Disconnected` on disconnect or failure.
/// Transport failures pass through `Error` before settling in `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Point-in-time copy of a session's observable state.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub status: ConnectionStatus,
    pub count: u32,
    pub state: RepState,
    pub landmarks: Option<LandmarkSet>,
    /// Message of the most recent transport failure, if any.
    pub last_error: Option<String>,
}

#[derive(Default)]
struct Shared {
    status: ConnectionStatus,
    count: u32,
    state: RepState,
    landmarks: Option<LandmarkSet>,
    last_error: Option<String>,
}

/// What happened to a frame handed to [`SessionController::send_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The frame was dispatched to the service.
    Sent,
    /// The in-flight bound was reached; the frame was shed to keep the stream fresh.
    Dropped,
    /// There is no usable connection (never connected, or the transport just failed).
    Disconnected,
}

#[derive(Clone)]
struct FrameSender {
    writer: Arc<Mutex<TcpStream>>,
    gate: FrameGate,
    shared: Arc<Mutex<Shared>>,
}

impl FrameSender {
    fn send_data_uri(&self, data: &str) -> SendOutcome {
        if self.shared.lock().unwrap().status != ConnectionStatus::Connected {
            log::warn!("not connected, skipping frame");
            return SendOutcome::Disconnected;
        }

        // Backpressure: never let the service fall more than the bound behind. Shedding here is
        // deliberate and not an error.
        if !self.gate.try_acquire() {
            log::warn!(
                "service is behind ({} frames in flight), dropping frame",
                self.gate.pending(),
            );
            return SendOutcome::Dropped;
        }

        let msg = ClientMessage::Frame {
            frame: data.to_string(),
        };
        let line = match serde_json::to_string(&msg) {
            Ok(line) => line,
            Err(e) => {
                log::error!("failed to encode frame message: {e}");
                self.gate.release();
                return SendOutcome::Dropped;
            }
        };

        let mut writer = self.writer.lock().unwrap();
        match writeln!(writer, "{line}") {
            Ok(()) => SendOutcome::Sent,
            Err(e) => {
                log::warn!("failed to send frame: {e}");
                self.gate.release();
                fail(&self.shared, &self.gate, &format!("send failed: {e}"));
                SendOutcome::Disconnected
            }
        }
    }
}

/// Marks the transport as failed.
///
/// The status settles to `Disconnected` once the reader thread observes the dead socket (or on
/// explicit disconnect). Count and state stay as last known; a transport failure must not
/// corrupt them.
fn fail(shared: &Arc<Mutex<Shared>>, gate: &FrameGate, message: &str) {
    let mut shared = shared.lock().unwrap();
    shared.status = ConnectionStatus::Error;
    shared.last_error = Some(message.to_string());
    gate.reset();
}

struct Connection {
    stream: TcpStream,
    sender: FrameSender,
    reader: Option<JoinHandle<()>>,
}

/// Client-side session orchestration: connect/disconnect lifecycle, frame dispatch with
/// backpressure, reset, and the capture loop.
pub struct SessionController {
    config: PipelineConfig,
    gate: FrameGate,
    shared: Arc<Mutex<Shared>>,
    conn: Option<Connection>,
    pump: Option<FramePump>,
}

impl SessionController {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            gate: FrameGate::new(config.max_pending),
            config,
            shared: Arc::new(Mutex::new(Shared::default())),
            conn: None,
            pump: None,
        }
    }

    /// Establishes the transport and initializes a fresh session (count 0, waiting state).
    ///
    /// Calling this while already connected is a no-op.
    pub fn connect<A: ToSocketAddrs>(&mut self, addr: A) -> anyhow::Result<()> {
        if self.conn.is_some() && self.status() == ConnectionStatus::Connected {
            log::warn!("already connected");
            return Ok(());
        }
        self.disconnect();

        self.shared.lock().unwrap().status = ConnectionStatus::Connecting;
        let stream = match TcpStream::connect(addr) {
            Ok(stream) => stream,
            Err(e) => {
                fail(&self.shared, &self.gate, &format!("connect failed: {e}"));
                // No reader thread exists yet, so settle the status here.
                self.shared.lock().unwrap().status = ConnectionStatus::Disconnected;
                return Err(e).context("failed to connect to counting service");
            }
        };
        log::info!(
            "connected to {}",
            stream
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "<unknown>".into()),
        );

        {
            let mut shared = self.shared.lock().unwrap();
            *shared = Shared {
                status: ConnectionStatus::Connected,
                ..Shared::default()
            };
        }
        self.gate.reset();

        let sender = FrameSender {
            writer: Arc::new(Mutex::new(stream.try_clone()?)),
            gate: self.gate.clone(),
            shared: self.shared.clone(),
        };
        let reader = thread::Builder::new().name("update reader".into()).spawn({
            let reader = BufReader::new(stream.try_clone()?);
            let gate = self.gate.clone();
            let shared = self.shared.clone();
            move || reader_loop(reader, gate, shared)
        })?;

        self.conn = Some(Connection {
            stream,
            sender,
            reader: Some(reader),
        });
        Ok(())
    }

    /// Halts capture, tears the transport down and clears the landmark display state.
    ///
    /// Idempotent: disconnecting twice is a no-op the second time. The last known count and
    /// state are kept until the next connect or reset.
    pub fn disconnect(&mut self) {
        self.stop_capture();

        let Some(mut conn) = self.conn.take() else {
            return;
        };
        // Unblocks the reader thread, which then settles the status.
        conn.stream.shutdown(Shutdown::Both).ok();
        if let Some(reader) = conn.reader.take() {
            reader.join().ok();
        }

        let mut shared = self.shared.lock().unwrap();
        shared.status = ConnectionStatus::Disconnected;
        shared.landmarks = None;
        drop(shared);
        self.gate.reset();
        log::info!("disconnected");
    }

    /// Sends one already-encoded frame (base64 JPEG data URI), subject to the in-flight bound.
    pub fn send_frame(&self, data_uri: &str) -> SendOutcome {
        match &self.conn {
            Some(conn) => conn.sender.send_data_uri(data_uri),
            None => {
                log::warn!("not connected, skipping frame");
                SendOutcome::Disconnected
            }
        }
    }

    /// Applies an explicit reset.
    ///
    /// While connected, the command is sent to the service and the local count/state are *not*
    /// cleared until the acknowledging update arrives, so the displayed count can never disagree
    /// with the service's. An unreachable service is reported as an error and leaves local state
    /// untouched. Without an active connection there is nothing to desync from, so the local
    /// session is cleared directly. Idempotent in all cases.
    pub fn reset(&mut self) -> anyhow::Result<()> {
        if let Some(conn) = &self.conn {
            if self.status() == ConnectionStatus::Connected {
                let msg = ClientMessage::Control {
                    control: ControlCommand::Reset,
                };
                let mut writer = conn.sender.writer.lock().unwrap();
                let line = serde_json::to_string(&msg)?;
                writeln!(writer, "{line}").context("failed to send reset command")?;
                return Ok(());
            }
        }

        let mut shared = self.shared.lock().unwrap();
        shared.count = 0;
        shared.state = RepState::Waiting;
        shared.landmarks = None;
        Ok(())
    }

    /// Starts the ticker-driven capture loop, dispatching frames from `source`.
    pub fn start_capture<S: FrameSource>(&mut self, source: S) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.status() == ConnectionStatus::Connected,
            "cannot start capture while disconnected",
        );
        self.stop_capture();

        let sender = self
            .conn
            .as_ref()
            .map(|conn| conn.sender.clone())
            .expect("connected without connection");
        let pump = FramePump::spawn(self.config, source, move |frame| {
            let uri = match frame::to_data_uri(&frame) {
                Ok(uri) => uri,
                Err(e) => {
                    log::warn!("failed to encode frame: {e}");
                    return true;
                }
            };
            sender.send_data_uri(&uri) != SendOutcome::Disconnected
        })?;
        self.pump = Some(pump);
        Ok(())
    }

    /// Cancels the capture loop. No frame dispatch happens after this returns.
    pub fn stop_capture(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.stop();
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.lock().unwrap().status
    }

    /// Number of dispatched frames currently awaiting a result.
    pub fn pending_frames(&self) -> usize {
        self.gate.pending()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let shared = self.shared.lock().unwrap();
        SessionSnapshot {
            status: shared.status,
            count: shared.count,
            state: shared.state,
            landmarks: shared.landmarks,
            last_error: shared.last_error.clone(),
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn reader_loop(reader: BufReader<TcpStream>, gate: FrameGate, shared: Arc<Mutex<Shared>>) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::warn!("transport failed: {e}");
                fail(&shared, &gate, &format!("receive failed: {e}"));
                break;
            }
        };
        let update = match serde_json::from_str::<PoseUpdate>(&line) {
            Ok(update) => update,
            Err(e) => {
                log::warn!("ignoring malformed update: {e}");
                continue;
            }
        };

        {
            let mut shared = shared.lock().unwrap();
            shared.count = update.count;
            shared.state = update.state;
            // Keep showing the last skeleton through detection misses; only a new detection
            // replaces it.
            if update.landmarks.is_some() {
                shared.landmarks = update.landmarks;
            }
        }

        // Releasing only after the snapshot is updated keeps `pending_frames() == 0` a reliable
        // "result applied" signal.
        gate.release();
    }

    // Transport gone, through failure or orderly EOF: settle.
    let mut shared = shared.lock().unwrap();
    shared.status = ConnectionStatus::Disconnected;
    gate.reset();
}

/// Summary of a batch processing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    /// Total confirmed repetitions; travels separately from the annotated artifact.
    pub total_reps: u32,
    /// Number of frames processed.
    pub frames: usize,
    /// Frames in which a pose was detected.
    pub detected_frames: usize,
}

/// Batch mode: runs the full per-frame path over a pre-recorded animation.
///
/// Unlike the live pipeline there is no frame shedding, every frame is processed in order. When
/// `annotated_out` is given, an annotated copy of the animation (skeleton overlay plus a
/// count/state banner, like the live UI renders) is written there.
pub fn process_animation<E: PoseEstimator>(
    estimator: &mut E,
    animation: &Animation,
    thresholds: Thresholds,
    annotated_out: Option<&Path>,
) -> anyhow::Result<BatchReport> {
    let mut counter = RepCounter::new(thresholds);
    let mut detected_frames = 0;
    let mut annotated: Vec<(frame::Frame, Duration)> = Vec::new();

    for anim_frame in animation.frames() {
        let mut frame = anim_frame.to_frame();

        let landmarks = estimator.estimate(&frame)?;
        let angles = landmarks.as_ref().and_then(arm_angles);
        let state = counter.observe(angles);

        if annotated_out.is_some() {
            if let (Some(landmarks), Some(angles)) = (&landmarks, angles) {
                draw::skeleton(&mut frame, &LandmarkSet::new(landmarks, angles));
            }
            draw::banner(&mut frame, counter.count(), state.as_str());
            annotated.push((frame, anim_frame.duration()));
        }
        if landmarks.is_some() {
            detected_frames += 1;
        }
    }

    if let Some(out) = annotated_out {
        crate::anim::encode_gif(out, annotated)?;
        log::info!("wrote annotated animation to {}", out.display());
    }

    Ok(BatchReport {
        total_reps: counter.count(),
        frames: animation.len(),
        detected_frames,
    })
}

#[cfg(test)]
mod tests {
    use crate::detector::ScriptedEstimator;
    use crate::landmark::test_support::arms_at;

    use super::*;

    #[test]
    fn batch_processes_every_frame() {
        // 180 → 80 → 180, twice: two full repetitions, plus a detection miss in the middle.
        let script = vec![
            Some(arms_at(175.0)),
            Some(arms_at(80.0)),
            None,
            Some(arms_at(175.0)),
            Some(arms_at(80.0)),
            Some(arms_at(175.0)),
        ];
        let mut estimator = ScriptedEstimator::new(script);

        let mut data = Vec::new();
        {
            use image::codecs::gif::GifEncoder;
            let mut encoder = GifEncoder::new(&mut data);
            for _ in 0..6 {
                encoder
                    .encode_frame(image::Frame::new(image::RgbaImage::new(64, 64)))
                    .unwrap();
            }
        }
        let animation = Animation::from_reader(&data[..]).unwrap();

        let report =
            process_animation(&mut estimator, &animation, Thresholds::PULL_UPS, None).unwrap();
        assert_eq!(
            report,
            BatchReport {
                total_reps: 2,
                frames: 6,
                detected_frames: 5,
            }
        );
    }

    #[test]
    fn disconnected_reset_is_idempotent() {
        let mut controller = SessionController::new(PipelineConfig::default());
        controller.reset().unwrap();
        assert_eq!(controller.snapshot().count, 0);
        controller.reset().unwrap();
        assert_eq!(controller.snapshot().count, 0);
        assert_eq!(controller.snapshot().state, RepState::Waiting);
    }

    #[test]
    fn disconnect_without_connection_is_a_noop() {
        let mut controller = SessionController::new(PipelineConfig::default());
        controller.disconnect();
        controller.disconnect();
        assert_eq!(controller.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn send_frame_while_disconnected_is_refused() {
        let controller = SessionController::new(PipelineConfig::default());
        assert_eq!(
            controller.send_frame("data:image/jpeg;base64,AAAA"),
            SendOutcome::Disconnected
        );
    }
}
