//! The live counting service.
//!
//! Each client connection gets its own session: a fresh repetition counter, a detector instance,
//! and a two-stage worker pipeline (decode + estimate, then write back). Frames from one session
//! are processed strictly in arrival order and never concurrently; the promise chain between the
//! two stages preserves result order even though the next frame may already be decoding while
//! the previous result is being written.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use pawawwewism::{promise, Promise, PromiseHandle, Worker};

use crate::counter::{RepCounter, Thresholds};
use crate::detector::PoseEstimator;
use crate::frame::Frame;
use crate::landmark::arm_angles;
use crate::protocol::{ClientMessage, ControlCommand, LandmarkSet, PoseUpdate};
use crate::timer::{FpsCounter, Timer};

/// Accepts connections forever, spawning one session thread per client.
///
/// `make_estimator` is invoked once per connection; sessions never share detector state, so a
/// cheaply cloneable estimator handle is the intended use.
pub fn serve<E, F>(
    listener: TcpListener,
    thresholds: Thresholds,
    mut make_estimator: F,
) -> anyhow::Result<()>
where
    E: PoseEstimator,
    F: FnMut() -> anyhow::Result<E>,
{
    log::info!("listening on {}", listener.local_addr()?);

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("failed to accept connection: {e}");
                continue;
            }
        };
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "<unknown>".into());
        log::info!("client {peer} connected");

        let estimator = make_estimator()?;
        let counter = RepCounter::new(thresholds);
        thread::Builder::new()
            .name(format!("session {peer}"))
            .spawn(move || match run_session(stream, estimator, counter) {
                Ok(()) => log::info!("client {peer} disconnected"),
                Err(e) => log::warn!("session {peer} ended: {e}"),
            })?;
    }

    Ok(())
}

/// Runs a single session until the client disconnects or the transport fails.
pub fn run_session<E: PoseEstimator>(
    stream: TcpStream,
    mut estimator: E,
    mut counter: RepCounter,
) -> anyhow::Result<()> {
    let reader = BufReader::new(stream.try_clone()?);
    let mut out = stream;

    // Second stage: deliver results in dispatch order. Blocking on each promise in the order the
    // frames arrived is what guarantees no reordering.
    let mut writer: Worker<PromiseHandle<PoseUpdate>> = Worker::builder()
        .name("update writer")
        .spawn(move |handle: PromiseHandle<PoseUpdate>| {
            let Ok(update) = handle.block() else { return };
            let mut line = match serde_json::to_vec(&update) {
                Ok(line) => line,
                Err(e) => {
                    log::error!("failed to encode update: {e}");
                    return;
                }
            };
            line.push(b'\n');
            if let Err(e) = out.write_all(&line) {
                // The read side of the session will notice the dead socket shortly.
                log::warn!("failed to deliver update: {e}");
            }
        })?;

    // First stage: decode, estimate, advance the state machine.
    let mut fps = FpsCounter::new("session");
    let mut t_decode = Timer::new("decode");
    let mut t_estimate = Timer::new("estimate");
    let mut processor: Worker<(ClientMessage, Promise<PoseUpdate>)> = Worker::builder()
        .name("frame processor")
        .spawn(move |(msg, promise): (ClientMessage, Promise<PoseUpdate>)| {
            let update = match msg {
                ClientMessage::Control {
                    control: ControlCommand::Reset,
                } => {
                    counter.reset();
                    log::info!("counter reset");
                    PoseUpdate {
                        count: counter.count(),
                        state: counter.state(),
                        landmarks: None,
                    }
                }
                ClientMessage::Frame { frame } => {
                    process_frame(&frame, &mut estimator, &mut counter, &mut t_decode, &mut t_estimate)
                }
            };
            promise.fulfill(update);
            fps.tick_with([&mut t_decode, &mut t_estimate]);
        })?;

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let msg = match serde_json::from_str::<ClientMessage>(&line) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("ignoring malformed message: {e}");
                continue;
            }
        };

        let (promise, handle) = promise();
        processor.send((msg, promise));
        writer.send(handle);
    }

    Ok(())
}

fn process_frame<E: PoseEstimator>(
    data: &str,
    estimator: &mut E,
    counter: &mut RepCounter,
    t_decode: &mut Timer,
    t_estimate: &mut Timer,
) -> PoseUpdate {
    // An undecodable frame is treated exactly like a frame without a detection: the state
    // machine holds, and the client still gets its one answer for this frame.
    let landmarks = match t_decode.time(|| Frame::from_data_uri(data)) {
        Ok(frame) => match t_estimate.time(|| estimator.estimate(&frame)) {
            Ok(landmarks) => landmarks,
            Err(e) => {
                log::error!("pose estimation failed: {e}");
                None
            }
        },
        Err(e) => {
            log::warn!("undecodable frame: {e}");
            None
        }
    };

    let angles = landmarks.as_ref().and_then(arm_angles);
    let state = counter.observe(angles);
    let landmarks = match (&landmarks, angles) {
        (Some(landmarks), Some(angles)) => Some(LandmarkSet::new(landmarks, angles)),
        _ => None,
    };

    PoseUpdate {
        count: counter.count(),
        state,
        landmarks,
    }
}
