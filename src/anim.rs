//! Animated image decoding and encoding for batch mode.
//!
//! Batch processing consumes a pre-recorded animation instead of a live camera feed, and writes
//! the annotated result back out in the same container.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::slice;
use std::time::Duration;

use image::codecs::gif::{GifDecoder, GifEncoder};
use image::{AnimationDecoder, Delay, DynamicImage};

use crate::frame::Frame;

/// A timed sequence of frames.
pub struct Animation {
    frames: Vec<image::Frame>,
}

impl Animation {
    /// Loads a gif animation from a filesystem path.
    ///
    /// The path must have a `.gif` extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        match path.extension() {
            Some(ext) if ext == "gif" => {}
            _ => anyhow::bail!("animation path must have `.gif` extension"),
        }

        Self::from_reader(BufReader::new(File::open(path)?))
    }

    /// Loads a gif animation from a [`BufRead`] implementor.
    pub fn from_reader<R: BufRead>(reader: R) -> anyhow::Result<Self> {
        let frames = GifDecoder::new(reader)?.into_frames().collect_frames()?;
        Ok(Self { frames })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Returns an iterator over the frames of this animation.
    pub fn frames(&self) -> FrameIter<'_> {
        FrameIter {
            frames: self.frames.iter(),
        }
    }
}

/// Iterator over an [`Animation`]'s frames.
#[derive(Clone)]
pub struct FrameIter<'a> {
    frames: slice::Iter<'a, image::Frame>,
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = AnimationFrame<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.frames.next().map(|frame| AnimationFrame { frame })
    }
}

/// One frame of an [`Animation`].
pub struct AnimationFrame<'a> {
    frame: &'a image::Frame,
}

impl AnimationFrame<'_> {
    /// Copies this frame's pixels into an RGB [`Frame`] for the processing pipeline.
    pub fn to_frame(&self) -> Frame {
        Frame::new(DynamicImage::ImageRgba8(self.frame.buffer().clone()).to_rgb8())
    }

    /// How long this frame is displayed for.
    pub fn duration(&self) -> Duration {
        Duration::from(self.frame.delay())
    }
}

/// Encodes annotated frames back into a gif animation at `path`.
pub fn encode_gif<P: AsRef<Path>>(
    path: P,
    frames: impl IntoIterator<Item = (Frame, Duration)>,
) -> anyhow::Result<()> {
    let file = BufWriter::new(File::create(path)?);
    write_gif(file, frames)
}

fn write_gif<W: Write>(
    writer: W,
    frames: impl IntoIterator<Item = (Frame, Duration)>,
) -> anyhow::Result<()> {
    let mut encoder = GifEncoder::new(writer);
    for (frame, duration) in frames {
        let rgba = DynamicImage::ImageRgb8(frame.into_buf()).to_rgba8();
        encoder.encode_frame(image::Frame::from_parts(
            rgba,
            0,
            0,
            Delay::from_saturating_duration(duration),
        ))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;

    #[test]
    fn gif_round_trip() {
        let frames = (0..3).map(|i| {
            let frame = Frame::new(RgbImage::from_pixel(8, 8, Rgb([i * 40, 0, 0])));
            (frame, Duration::from_millis(100))
        });

        let mut data = Vec::new();
        write_gif(&mut data, frames).unwrap();

        let anim = Animation::from_reader(&data[..]).unwrap();
        assert_eq!(anim.len(), 3);
        for anim_frame in anim.frames() {
            assert!(anim_frame.duration() >= Duration::from_millis(10));
            let frame = anim_frame.to_frame();
            assert_eq!((frame.width(), frame.height()), (8, 8));
        }
    }
}
