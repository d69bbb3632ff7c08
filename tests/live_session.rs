//! End-to-end tests: a real client/service pair talking over a loopback TCP connection, with a
//! scripted stand-in for the pose network.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use image::RgbImage;
use repcount::counter::{RepCounter, RepState, Thresholds};
use repcount::detector::ScriptedEstimator;
use repcount::frame::{self, Frame};
use repcount::landmark::{JointIdx, Landmark, Landmarks, NUM_JOINTS};
use repcount::pipeline::PipelineConfig;
use repcount::protocol::PoseUpdate;
use repcount::server;
use repcount::session::{ConnectionStatus, SendOutcome, SessionController};

/// Builds a landmark set whose elbows read the given angles, all other joints at the origin.
fn arms_at(right: f32, left: f32) -> Landmarks {
    let mut lms = Landmarks::new(NUM_JOINTS);
    let sides = [
        (right, JointIdx::RightShoulder, JointIdx::RightElbow, JointIdx::RightWrist),
        (left, JointIdx::LeftShoulder, JointIdx::LeftElbow, JointIdx::LeftWrist),
    ];
    for (angle, shoulder, elbow, wrist) in sides {
        let (ex, ey) = (320.0, 240.0);
        let rad = angle.to_radians();
        lms.set(shoulder as usize, Landmark::new([ex, ey - 100.0]));
        lms.set(elbow as usize, Landmark::new([ex, ey]));
        lms.set(
            wrist as usize,
            Landmark::new([ex + 100.0 * rad.sin(), ey + 100.0 * -rad.cos()]),
        );
    }
    lms
}

/// Spawns a single-session service whose detector replays `script`, returning its address.
fn spawn_service(script: Vec<Option<Landmarks>>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let estimator = ScriptedEstimator::new(script);
        let counter = RepCounter::new(Thresholds::PULL_UPS);
        server::run_session(stream, estimator, counter).ok();
    });
    addr
}

fn test_frame_uri() -> String {
    frame::to_data_uri(&Frame::new(RgbImage::new(8, 8))).unwrap()
}

fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for condition");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn counts_one_repetition_and_resets() {
    let addr = spawn_service(vec![
        Some(arms_at(170.0, 170.0)),
        Some(arms_at(85.0, 82.0)),
        None, // detection miss mid-repetition must not disturb the count
        Some(arms_at(170.0, 175.0)),
    ]);

    let mut controller = SessionController::new(PipelineConfig::default());
    controller.connect(&addr).unwrap();
    assert_eq!(controller.status(), ConnectionStatus::Connected);

    let uri = test_frame_uri();
    for _ in 0..4 {
        assert_eq!(controller.send_frame(&uri), SendOutcome::Sent);
        // Waiting for the result keeps this deterministic (and below the in-flight bound).
        wait_until(|| controller.pending_frames() == 0);
    }

    // The counting frame reports the confirmation pulse.
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.count, 1);
    assert_eq!(snapshot.state, RepState::DownGood);
    let landmarks = snapshot.landmarks.expect("skeleton should be tracked");
    assert!(landmarks.angle_r > 160.0);

    // One more frame (the script is exhausted, so it is a detection miss) and the state has
    // settled back to waiting, with the count untouched.
    assert_eq!(controller.send_frame(&uri), SendOutcome::Sent);
    wait_until(|| controller.pending_frames() == 0);
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.count, 1);
    assert_eq!(snapshot.state, RepState::Waiting);

    // Reset is applied by the service and mirrored back; the local count is only cleared once
    // the acknowledgement arrives.
    controller.reset().unwrap();
    wait_until(|| controller.snapshot().count == 0);
    assert_eq!(controller.snapshot().state, RepState::Waiting);

    // A second reset is a no-op, not an error.
    controller.reset().unwrap();
    wait_until(|| controller.snapshot().count == 0);

    controller.disconnect();
    assert_eq!(controller.status(), ConnectionStatus::Disconnected);
}

#[test]
fn disconnect_is_idempotent_and_halts_dispatch() {
    let addr = spawn_service(Vec::new());

    let mut controller = SessionController::new(PipelineConfig::default());
    controller.connect(&addr).unwrap();

    controller.disconnect();
    controller.disconnect();
    assert_eq!(controller.status(), ConnectionStatus::Disconnected);
    assert_eq!(controller.pending_frames(), 0);

    // No usable transport: frames are refused, not queued.
    assert_eq!(
        controller.send_frame(&test_frame_uri()),
        SendOutcome::Disconnected
    );
}

#[test]
fn service_skips_malformed_lines_and_acknowledges_reset() {
    let addr = spawn_service(vec![Some(arms_at(170.0, 170.0))]);

    let mut stream = TcpStream::connect(&addr).unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());

    // Garbage must be ignored without ending the session.
    writeln!(stream, "this is not json").unwrap();
    writeln!(stream, "{}", serde_json::json!({ "frame": test_frame_uri() })).unwrap();

    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    let update: PoseUpdate = serde_json::from_str(&line).unwrap();
    assert_eq!(update.count, 0);
    assert!(update.landmarks.is_some());

    // Reset with no repetitions counted still succeeds.
    writeln!(stream, "{}", serde_json::json!({ "control": "reset" })).unwrap();
    line.clear();
    reader.read_line(&mut line).unwrap();
    let ack: PoseUpdate = serde_json::from_str(&line).unwrap();
    assert_eq!(ack.count, 0);
    assert_eq!(ack.state, RepState::Waiting);
    assert!(ack.landmarks.is_none());
}

#[test]
fn detection_miss_sends_update_without_landmarks() {
    let addr = spawn_service(vec![None]);

    let mut stream = TcpStream::connect(&addr).unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    writeln!(stream, "{}", serde_json::json!({ "frame": test_frame_uri() })).unwrap();

    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    let update: PoseUpdate = serde_json::from_str(&line).unwrap();
    assert_eq!(update.count, 0);
    assert_eq!(update.state, RepState::Waiting);
    assert!(update.landmarks.is_none());
}
