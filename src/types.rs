//! Shared result types returned by the public decode entry points.
//!
//! [`ImageConfig`] and [`ColorModel`] are serializable so the CLI can emit
//! them as JSON; [`DecodedImageSet`] carries pixel buffers and is not.

use crate::codec::PixelImage;
use serde::{Deserialize, Serialize};

/// Pixel layout a decode produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorModel {
    /// Packed, interleaved, non-premultiplied RGBA (4 bytes per pixel).
    Rgba,
    /// Planar Y + 4:2:0 Cb/Cr + full-resolution alpha.
    Yuva420,
}

impl ColorModel {
    /// Still lossy streams decode to planar YUVA; lossless and animated ones
    /// decode to RGBA so their pixels survive unchanged.
    pub fn for_stream(has_animation: bool, is_lossless: bool) -> Self {
        if has_animation || is_lossless {
            ColorModel::Rgba
        } else {
            ColorModel::Yuva420
        }
    }
}

impl std::fmt::Display for ColorModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColorModel::Rgba => write!(f, "RGBA"),
            ColorModel::Yuva420 => write!(f, "YUVA 4:2:0"),
        }
    }
}

/// Dimensions and color model of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    pub width: u32,
    pub height: u32,
    pub color_model: ColorModel,
}

/// Every frame of a stream, in decode order, with per-frame delays.
///
/// `frames()` and `delays()` always have the same length. A still image has
/// exactly one frame with delay 0.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImageSet {
    frames: Vec<PixelImage>,
    delays: Vec<u32>,
}

impl DecodedImageSet {
    pub(crate) fn new() -> Self {
        Self {
            frames: Vec::new(),
            delays: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, frame: PixelImage, delay_ms: u32) {
        self.frames.push(frame);
        self.delays.push(delay_ms);
    }

    pub fn frames(&self) -> &[PixelImage] {
        &self.frames
    }

    /// Display durations in milliseconds, parallel to [`frames`](Self::frames).
    pub fn delays(&self) -> &[u32] {
        &self.delays
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_animated(&self) -> bool {
        self.frames.len() > 1
    }

    /// Split into owned frames and delays.
    pub fn into_parts(self) -> (Vec<PixelImage>, Vec<u32>) {
        (self.frames, self.delays)
    }

    /// First frame, if any.
    pub fn into_first(self) -> Option<PixelImage> {
        self.frames.into_iter().next()
    }
}
