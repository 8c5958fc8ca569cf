//! Encoded observations and RGB decoding.

use image::ImageFormat;

use crate::error::{EnvError, Result};

/// How an observation buffer was produced, and so which codec decodes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationKind {
    /// Lossless PNG of the whole rendered frame.
    PngFrame,
    /// Lossless PNG of the game canvas, scaled to the spec's size.
    PngCanvas,
    /// Lossy JPEG of the whole rendered frame.
    JpegFrame,
}

/// An encoded snapshot of an environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    kind: ObservationKind,
    data: Vec<u8>,
}

/// A decoded observation: `width * height * 3` bytes, row-major RGB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Observation {
    pub fn new(kind: ObservationKind, data: Vec<u8>) -> Self {
        Self { kind, data }
    }

    pub fn kind(&self) -> ObservationKind {
        self.kind
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn is_lossless(&self) -> bool {
        !matches!(self.kind, ObservationKind::JpegFrame)
    }

    /// File extension matching the encoding.
    pub fn extension(&self) -> &'static str {
        match self.kind {
            ObservationKind::PngFrame | ObservationKind::PngCanvas => "png",
            ObservationKind::JpegFrame => "jpg",
        }
    }

    /// Decode the buffer into raw RGB pixels.
    pub fn to_rgb(&self) -> Result<RgbFrame> {
        let format = match self.kind {
            ObservationKind::PngFrame | ObservationKind::PngCanvas => ImageFormat::Png,
            ObservationKind::JpegFrame => ImageFormat::Jpeg,
        };
        let img = image::load_from_memory_with_format(&self.data, format)
            .map_err(|e| EnvError::Decode(e.to_string()))?
            .into_rgb8();
        Ok(RgbFrame {
            width: img.width(),
            height: img.height(),
            data: img.into_raw(),
        })
    }
}
