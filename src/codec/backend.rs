//! Backend capability trait and shared types.
//!
//! The [`Backend`] trait is the one seam between the frame sequencer and the
//! two codec implementations:
//!
//! | Operation | Native (libwebp via dlopen) | Sandboxed (wasm guest) |
//! |---|---|---|
//! | `probe` | `WebPGetFeatures` + demux canvas info | guest `decode` with header-only flag |
//! | `frames` (still) | `WebPDecode` into RGBA or YUVA | one guest `decode` call |
//! | `frames` (animated) | demux iterator, one fragment per pull | one guest `decode` call, all frames |
//! | `encode` | `WebPEncode` + memory writer | guest `encode` |
//!
//! Exactly one implementation is active per process, picked by the
//! [resolver](super::resolver).

use super::params::EncodeOptions;
use super::pixels::{EncoderInput, PixelImage};
use crate::types::ColorModel;
use serde::Serialize;
use std::collections::VecDeque;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("decode failed: {0}")]
    DecodeFailed(String),
    #[error("encode failed: {0}")]
    EncodeFailed(String),
    #[error("guest memory read of {len} bytes at offset {offset} failed")]
    MemoryReadFailed { offset: u32, len: u32 },
    #[error("guest memory write of {len} bytes at offset {offset} failed")]
    MemoryWriteFailed { offset: u32, len: u32 },
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("sandbox runtime error: {0}")]
    Runtime(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which implementation serves codec calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Native,
    Sandboxed,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Native => write!(f, "native"),
            BackendKind::Sandboxed => write!(f, "sandboxed"),
        }
    }
}

/// Stream facts a backend reports before decoding pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub frame_count: u32,
    pub has_animation: bool,
    pub is_lossless: bool,
    pub has_alpha: bool,
}

impl StreamInfo {
    /// Layout the single-frame decode produces.
    pub fn color_model(&self) -> ColorModel {
        ColorModel::for_stream(self.has_animation, self.is_lossless)
    }
}

/// How many frames the caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRequest {
    First,
    All,
}

/// One decoded frame with its display duration.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub image: PixelImage,
    pub delay_ms: u32,
}

/// Pull-based frame producer.
///
/// Returns `Ok(None)` once the stream has no more frames. Foreign resources
/// held by an implementation are released when it is dropped, whether or
/// not it was drained.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<DecodedFrame>, CodecError>;
}

/// Frames that were decoded up front.
#[derive(Debug, Default)]
pub struct BufferedFrames {
    frames: VecDeque<DecodedFrame>,
}

impl BufferedFrames {
    pub fn new(frames: Vec<DecodedFrame>) -> Self {
        Self {
            frames: frames.into(),
        }
    }

    pub fn single(image: PixelImage) -> Self {
        Self::new(vec![DecodedFrame { image, delay_ms: 0 }])
    }
}

impl FrameSource for BufferedFrames {
    fn next_frame(&mut self) -> Result<Option<DecodedFrame>, CodecError> {
        Ok(self.frames.pop_front())
    }
}

/// Codec capability interface. See the [module docs](self) for the parity table.
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Read stream facts. `data` is the whole stream.
    fn probe(&self, data: &[u8]) -> Result<StreamInfo, CodecError>;

    /// Start producing frames. `info` is what [`probe`](Self::probe) returned.
    fn frames<'a>(
        &'a self,
        data: &'a [u8],
        info: &StreamInfo,
        request: FrameRequest,
    ) -> Result<Box<dyn FrameSource + 'a>, CodecError>;

    /// Encode one picture into a complete WebP file.
    fn encode(
        &self,
        input: &EncoderInput<'_>,
        options: &EncodeOptions,
    ) -> Result<Vec<u8>, CodecError>;
}
