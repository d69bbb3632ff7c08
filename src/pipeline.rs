//! Frame ingestion and flow control.
//!
//! A capture source produces frames at a fixed cadence, but the downstream detector drains them
//! at whatever rate inference allows. This module bounds the number of in-flight frames so a slow
//! backend never accumulates a queue of stale work: when the bound is reached, new frames are
//! *dropped*, not queued. Under backpressure, freshness wins over completeness.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, Sender};

use crate::frame::Frame;

/// Default bound on in-flight frames.
pub const DEFAULT_MAX_PENDING: usize = 2;

/// Default capture cadence in frames per second.
pub const DEFAULT_CAPTURE_FPS: f32 = 2.0;

/// Tunables of the frame ingestion pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Maximum number of dispatched frames awaiting a result before new frames are shed.
    pub max_pending: usize,
    /// Target capture cadence, in frames per second.
    pub capture_fps: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_pending: DEFAULT_MAX_PENDING,
            capture_fps: DEFAULT_CAPTURE_FPS,
        }
    }
}

impl PipelineConfig {
    pub fn capture_period(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.capture_fps)
    }
}

/// Shared in-flight frame counter.
///
/// The dispatch path calls [`FrameGate::try_acquire`] before sending a frame; the result path
/// calls [`FrameGate::release`] once per received result. Both paths may run on different
/// threads, so the counter is atomic.
#[derive(Debug, Clone)]
pub struct FrameGate {
    pending: Arc<AtomicUsize>,
    max_pending: usize,
}

impl FrameGate {
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: Arc::new(AtomicUsize::new(0)),
            max_pending,
        }
    }

    /// Accounts for one dispatched frame.
    ///
    /// Returns `false` if the in-flight bound is already reached, in which case the caller must
    /// drop the frame instead of dispatching it.
    pub fn try_acquire(&self) -> bool {
        self.pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| {
                (pending < self.max_pending).then_some(pending + 1)
            })
            .is_ok()
    }

    /// Accounts for one received result.
    ///
    /// Saturates at zero: a result that arrives after [`FrameGate::reset`] (for example right
    /// around a reconnect) must not underflow the counter.
    pub fn release(&self) {
        self.pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| {
                Some(pending.saturating_sub(1))
            })
            .ok();
    }

    /// Clears the counter. Called when the transport disconnects.
    pub fn reset(&self) {
        self.pending.store(0, Ordering::SeqCst);
    }

    /// Number of frames currently awaiting a result.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

/// A source of frames to feed through the pipeline, polled at the capture cadence.
pub trait FrameSource: Send + 'static {
    /// Captures the current frame. `Ok(None)` means the source is exhausted and the capture loop
    /// should stop (a camera never returns it, a replayed recording does).
    fn capture(&mut self) -> anyhow::Result<Option<Frame>>;
}

impl<F> FrameSource for F
where
    F: FnMut() -> anyhow::Result<Option<Frame>> + Send + 'static,
{
    fn capture(&mut self) -> anyhow::Result<Option<Frame>> {
        self()
    }
}

/// Ticker-driven capture loop.
///
/// Polls a [`FrameSource`] at the configured cadence on a dedicated thread and hands each frame
/// to a dispatch function. The dispatch function returns `false` when the transport is gone,
/// which ends the loop. [`FramePump::stop`] cancels the loop immediately: once it returns, no
/// further dispatch happens.
pub struct FramePump {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl FramePump {
    /// Spawns the capture loop thread.
    pub fn spawn<S, D>(config: PipelineConfig, mut source: S, mut dispatch: D) -> io::Result<Self>
    where
        S: FrameSource,
        D: FnMut(Frame) -> bool + Send + 'static,
    {
        let (stop, stop_recv) = bounded::<()>(0);
        let ticker = crossbeam::channel::tick(config.capture_period());

        let handle = thread::Builder::new()
            .name("frame pump".into())
            .spawn(move || loop {
                crossbeam::select! {
                    recv(stop_recv) -> _ => {
                        // Either an explicit stop or the `FramePump` was dropped.
                        log::trace!("frame pump cancelled");
                        return;
                    }
                    recv(ticker) -> _ => {
                        let frame = match source.capture() {
                            Ok(Some(frame)) => frame,
                            Ok(None) => {
                                log::debug!("frame source exhausted, stopping capture");
                                return;
                            }
                            Err(e) => {
                                log::warn!("frame capture failed: {e}");
                                continue;
                            }
                        };
                        if !dispatch(frame) {
                            log::debug!("dispatch rejected frame terminally, stopping capture");
                            return;
                        }
                    }
                }
            })?;

        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Cancels the capture loop and waits for the thread to exit.
    ///
    /// After this returns, the dispatch function is guaranteed not to be called again.
    pub fn stop(mut self) {
        self.stop_impl();
    }

    fn stop_impl(&mut self) {
        // Dropping the sender makes the `recv(stop_recv)` arm fire.
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}

impl Drop for FramePump {
    fn drop(&mut self) {
        self.stop_impl();
    }
}
