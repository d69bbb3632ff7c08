//! Pose landmark estimation.
//!
//! The pose network itself is an external collaborator: this module only defines the seam the
//! pipeline consumes ([`PoseEstimator`]) plus two implementations, a [tract]-backed ONNX runner
//! for MediaPipe-style pose landmark models and a scripted stand-in for tests and demos.
//!
//! [tract]: https://github.com/sonos/tract

use std::collections::VecDeque;
use std::env;
use std::sync::Arc;

use anyhow::Context;
use tract_onnx::prelude::{
    tract_ndarray, tvec, Framework, Graph, InferenceModelExt, SimplePlan, TypedFact, TypedOp,
};

use crate::frame::Frame;
use crate::landmark::{Landmark, Landmarks, NUM_JOINTS};
use crate::timer::Timer;

type Model = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// A per-frame body landmark detector.
///
/// Implementations take a frame and return the detected joint positions in that frame's pixel
/// coordinates, or [`None`] when no pose is visible. Failing to find a pose is *not* an error;
/// `Err` is reserved for conditions like inference failure.
pub trait PoseEstimator: Send + 'static {
    fn estimate(&mut self, frame: &Frame) -> anyhow::Result<Option<Landmarks>>;
}

/// Runs a MediaPipe-style pose landmark network via [tract].
///
/// The network is expected to take one NCHW RGB input (values in `0..=1`) and to produce a
/// landmark tensor of 5 values per joint (x, y, z, visibility, presence, in input-image
/// coordinates) along with a single-element pose presence score.
///
/// [tract]: https://github.com/sonos/tract
pub struct OnnxPoseEstimator {
    model: Arc<Model>,
    input_width: usize,
    input_height: usize,
    presence_threshold: f32,
    t_resize: Timer,
    t_infer: Timer,
}

impl OnnxPoseEstimator {
    pub const DEFAULT_PRESENCE_THRESHOLD: f32 = 0.5;

    /// Loads the model named by the `REPCOUNT_POSE_MODEL` environment variable.
    pub fn from_env() -> anyhow::Result<Self> {
        let path = env::var("REPCOUNT_POSE_MODEL")
            .context("`REPCOUNT_POSE_MODEL` must point at an ONNX pose landmark model")?;
        Self::from_path(&path)
    }

    /// Loads and optimizes an ONNX pose landmark model.
    pub fn from_path(path: &str) -> anyhow::Result<Self> {
        let model = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("failed to read pose model `{path}`"))?
            .into_optimized()?
            .into_runnable()?;

        let shape = model
            .model()
            .input_fact(0)?
            .shape
            .as_concrete()
            .context("pose model has a symbolic input shape")?
            .to_vec();
        anyhow::ensure!(
            shape.len() == 4 && shape[0] == 1 && shape[1] == 3,
            "expected one NCHW input, got shape {shape:?}",
        );

        log::info!("loaded pose model `{path}` ({}x{} input)", shape[3], shape[2]);
        Ok(Self {
            model: Arc::new(model),
            input_width: shape[3],
            input_height: shape[2],
            presence_threshold: Self::DEFAULT_PRESENCE_THRESHOLD,
            t_resize: Timer::new("resize"),
            t_infer: Timer::new("infer"),
        })
    }

    /// Sets the pose presence score below which a frame is reported as having no detection.
    pub fn set_presence_threshold(&mut self, threshold: f32) {
        self.presence_threshold = threshold;
    }

    /// Returns profiling timers for image resizing and neural inference.
    pub fn timers(&mut self) -> impl Iterator<Item = &mut Timer> + '_ {
        [&mut self.t_resize, &mut self.t_infer].into_iter()
    }
}

impl Clone for OnnxPoseEstimator {
    fn clone(&self) -> Self {
        Self {
            model: self.model.clone(),
            input_width: self.input_width,
            input_height: self.input_height,
            presence_threshold: self.presence_threshold,
            t_resize: Timer::new("resize"),
            t_infer: Timer::new("infer"),
        }
    }
}

impl PoseEstimator for OnnxPoseEstimator {
    fn estimate(&mut self, frame: &Frame) -> anyhow::Result<Option<Landmarks>> {
        let (w, h) = (self.input_width, self.input_height);
        let resized = self.t_resize.time(|| {
            image::imageops::resize(
                frame.buf(),
                w as u32,
                h as u32,
                image::imageops::FilterType::Triangle,
            )
        });

        let input = tract_ndarray::Array4::from_shape_fn((1, 3, h, w), |(_, c, y, x)| {
            f32::from(resized.get_pixel(x as u32, y as u32)[c]) / 255.0
        });
        let outputs = self
            .t_infer
            .time(|| self.model.run(tvec!(tract_onnx::prelude::Tensor::from(input).into())))?;
        log::trace!("inference result: {outputs:?}");

        // Locate the outputs by shape instead of by index; exporters order them differently.
        let mut landmark_out = None;
        let mut flag_out = None;
        for output in outputs.iter() {
            let view = output.to_array_view::<f32>()?;
            let values = view.len();
            if values == 1 {
                flag_out.get_or_insert(view.iter().copied().next().unwrap_or(0.0));
            } else if values % 5 == 0 && values / 5 >= NUM_JOINTS && landmark_out.is_none() {
                landmark_out = Some(view.iter().copied().collect::<Vec<f32>>());
            }
        }
        let raw = landmark_out.context("pose model produced no landmark tensor")?;
        let presence = flag_out.context("pose model produced no presence tensor")?;

        if presence < self.presence_threshold {
            log::trace!("pose presence {presence} below threshold, no detection");
            return Ok(None);
        }

        // 5 values per joint; the network may append auxiliary landmarks after the 33 body
        // joints, those are dropped here.
        let mut landmarks = Landmarks::new(NUM_JOINTS);
        for (i, chunk) in raw.chunks_exact(5).take(NUM_JOINTS).enumerate() {
            landmarks.set(i, Landmark::new([chunk[0], chunk[1]]));
        }

        // Map from network input coordinates back into the frame the caller handed us.
        let (sx, sy) = (
            frame.width() as f32 / w as f32,
            frame.height() as f32 / h as f32,
        );
        landmarks.map_positions(|[x, y]| [x * sx, y * sy]);

        Ok(Some(landmarks))
    }
}

/// Replays a pre-scripted landmark sequence, one entry per frame.
///
/// Stands in for the neural network in tests and demos. Once the script runs out, every further
/// frame reports no detection.
pub struct ScriptedEstimator {
    script: VecDeque<Option<Landmarks>>,
}

impl ScriptedEstimator {
    pub fn new<I: IntoIterator<Item = Option<Landmarks>>>(script: I) -> Self {
        Self {
            script: script.into_iter().collect(),
        }
    }
}

impl PoseEstimator for ScriptedEstimator {
    fn estimate(&mut self, _frame: &Frame) -> anyhow::Result<Option<Landmarks>> {
        Ok(self.script.pop_front().flatten())
    }
}

#[cfg(test)]
mod tests {
    use image::RgbImage;

    use super::*;
    use crate::landmark::test_support::arms_at;

    #[test]
    fn scripted_estimator_replays_then_reports_misses() {
        let mut estimator = ScriptedEstimator::new([Some(arms_at(170.0)), None]);
        let frame = Frame::new(RgbImage::new(4, 4));

        assert!(estimator.estimate(&frame).unwrap().is_some());
        assert!(estimator.estimate(&frame).unwrap().is_none());
        assert!(estimator.estimate(&frame).unwrap().is_none());
    }
}
