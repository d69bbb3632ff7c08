//! Pose-based exercise repetition counting.
//!
//! This crate implements the processing core of a live exercise tracker: frames captured by a
//! client are streamed to a counting service, which runs pose landmark estimation on every frame,
//! derives the elbow angles of both arms, and feeds them through a hysteresis state machine that
//! counts full repetitions (pull-ups by default). Results are streamed back to the client in frame
//! order. A batch mode runs the same per-frame path over a pre-recorded animation and produces an
//! annotated copy plus the total count.
//!
//! # Coordinates
//!
//! Landmark positions use image pixel coordinates: X points right, Y points *down*, with the
//! origin in the top-left corner of the frame they were detected in.
//!
//! # Environment Variables
//!
//! Some parts of this crate can be overridden by setting environment variables:
//!
//! * `REPCOUNT_JPEG_BACKEND`: Configures the JPEG decoder used for incoming frames. Allowed
//!   values are:
//!   * `image`: uses the [image] crate's JPEG support. Robust, but not the fastest.
//!   * `zune`: uses the [zune-jpeg] crate, which decodes significantly faster.
//! * `REPCOUNT_POSE_MODEL`: Filesystem path of the ONNX pose landmark model loaded by
//!   [`detector::OnnxPoseEstimator::from_env`]. The model is an external collaborator and is not
//!   shipped with this repository.
//!
//! [image]: https://github.com/image-rs/image
//! [zune-jpeg]: https://github.com/etemesi254/zune-jpeg

use log::LevelFilter;

pub mod angle;
pub mod anim;
pub mod counter;
pub mod detector;
pub mod draw;
pub mod frame;
pub mod landmark;
pub mod pipeline;
pub mod protocol;
pub mod server;
pub mod session;
pub mod timer;

pub type Error = Box<dyn std::error::Error + Sync + Send>;
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = LevelFilter::Debug;
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_PKG_NAME")), log_level)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// The calling crate and `repcount` will log at *debug* level; `RUST_LOG` can override this.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
