//! Frame decoding.
//!
//! Clients transmit frames as base64-encoded JPEG data, usually wrapped in a `data:` URI. This
//! module turns those payloads into RGB frame buffers for the rest of the pipeline.

use std::env::{self, VarError};
use std::process;

use anyhow::{anyhow, Context};
use base64::Engine as _;
use image::RgbImage;
use once_cell::sync::Lazy;

/// Because computers, we support more than one JPEG decoding backend.
enum JpegBackend {
    /// Uses the `image` crate's JPEG support. Robust, pure Rust, not the fastest.
    Image,
    /// Uses the `zune-jpeg` crate, which decodes noticeably faster on typical camera frames.
    Zune,
}

const DEFAULT_BACKEND: JpegBackend = JpegBackend::Zune;

static JPEG_BACKEND: Lazy<JpegBackend> = Lazy::new(|| match env::var("REPCOUNT_JPEG_BACKEND") {
    Ok(v) if v == "image" => JpegBackend::Image,
    Ok(v) if v == "zune" => JpegBackend::Zune,
    Ok(v) => {
        eprintln!("invalid value set for `REPCOUNT_JPEG_BACKEND` variable: '{v}'; exiting");
        process::exit(1);
    }
    Err(VarError::NotPresent) => DEFAULT_BACKEND,
    Err(VarError::NotUnicode(s)) => {
        eprintln!(
            "invalid value set for `REPCOUNT_JPEG_BACKEND` variable: {}; exiting",
            s.to_string_lossy()
        );
        process::exit(1);
    }
});

/// A single decoded RGB video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    buf: RgbImage,
}

impl Frame {
    pub fn new(buf: RgbImage) -> Self {
        Self { buf }
    }

    /// Decodes a frame from a `data:image/jpeg;base64,<payload>` URI.
    ///
    /// A bare base64 payload without the URI prefix is accepted as well, since some capture
    /// clients send that.
    pub fn from_data_uri(data: &str) -> anyhow::Result<Self> {
        let payload = match data.split_once(',') {
            Some((_prefix, payload)) => payload,
            None => data,
        };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .context("invalid base64 frame payload")?;
        Self::decode_jpeg(&bytes)
    }

    /// Decodes a JPEG-compressed frame using the backend selected by `REPCOUNT_JPEG_BACKEND`.
    pub fn decode_jpeg(data: &[u8]) -> anyhow::Result<Self> {
        let buf = match *JPEG_BACKEND {
            JpegBackend::Image => {
                image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)?.to_rgb8()
            }
            JpegBackend::Zune => {
                let mut decoder = zune_jpeg::Decoder::new_with_options(
                    zune_jpeg::ZuneJpegOptions::new()
                        .set_out_colorspace(zune_jpeg::ColorSpace::RGB),
                );
                let buf = decoder.decode_buffer(data)?;
                let width = u32::from(decoder.width());
                let height = u32::from(decoder.height());
                RgbImage::from_raw(width, height, buf)
                    .ok_or_else(|| anyhow!("JPEG decoder returned short buffer"))?
            }
        };

        Ok(Self { buf })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.buf.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.buf.height()
    }

    #[inline]
    pub fn buf(&self) -> &RgbImage {
        &self.buf
    }

    #[inline]
    pub fn buf_mut(&mut self) -> &mut RgbImage {
        &mut self.buf
    }

    pub fn into_buf(self) -> RgbImage {
        self.buf
    }
}

/// Encodes `frame` as JPEG and wraps it in the data URI format clients send.
///
/// Mostly useful for tests and demo clients; the service itself only ever decodes.
pub fn to_data_uri(frame: &Frame) -> anyhow::Result<String> {
    let mut jpeg = Vec::new();
    image::codecs::jpeg::JpegEncoder::new(&mut jpeg).encode_image(frame.buf())?;
    Ok(format!(
        "data:image/jpeg;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(&jpeg)
    ))
}
