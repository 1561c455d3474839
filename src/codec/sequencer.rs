//! Animation/Frame Sequencer.
//!
//! Drives one backend through a decode and packages the frames:
//!
//! ```text
//! Init ──header──▶ ProbedHeader ──┬─▶ SingleFrame ──┐
//!   │                             └─▶ MultiFrame* ──┴─▶ Done
//!   └── config only ─────────────────────────────────────▶ Done
//! ```
//!
//! `Init` parses the header prefix and enforces the dimension bound before
//! the backend sees the stream. `ProbedHeader` holds the backend's
//! [`StreamInfo`]. `SingleFrame` pulls exactly one frame; `MultiFrame` pulls
//! until the backend's [`FrameSource`] is exhausted. Frames keep decode
//! order: the first frame pulled is index 0.

use super::backend::{Backend, CodecError, DecodedFrame, FrameRequest, StreamInfo};
use super::params::EncodeOptions;
use super::pixels::{EncodeSource, EncoderInput, PixelImage};
use super::probe::{self, CHUNK_SCAN_LIMIT, MAX_HEADER_SIZE};
use crate::types::{DecodedImageSet, ImageConfig};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    ProbedHeader,
    SingleFrame,
    MultiFrame(usize),
    Done,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Init => write!(f, "init"),
            State::ProbedHeader => write!(f, "probed-header"),
            State::SingleFrame => write!(f, "single-frame"),
            State::MultiFrame(i) => write!(f, "multi-frame[{i}]"),
            State::Done => write!(f, "done"),
        }
    }
}

/// Decode/encode orchestration over one backend.
pub struct Sequencer<'b> {
    backend: &'b dyn Backend,
    max_dimension: u32,
    state: State,
}

impl<'b> Sequencer<'b> {
    pub fn new(backend: &'b dyn Backend, max_dimension: u32) -> Self {
        Self {
            backend,
            max_dimension,
            state: State::Init,
        }
    }

    fn enter(&mut self, next: State) {
        debug!(backend = %self.backend.kind(), from = %self.state, to = %next, "sequencer");
        self.state = next;
    }

    fn check_dimensions(&self, width: u32, height: u32) -> Result<(), CodecError> {
        if width > self.max_dimension || height > self.max_dimension {
            return Err(CodecError::DecodeFailed(format!(
                "{width}x{height} exceeds the {} pixel limit",
                self.max_dimension
            )));
        }
        Ok(())
    }

    /// Width, height and color model from the header prefix alone.
    pub fn probe_config(mut self, data: &[u8]) -> Result<ImageConfig, CodecError> {
        let prefix = &data[..data.len().min(CHUNK_SCAN_LIMIT)];
        let header = probe::read_header(prefix)?;
        self.check_dimensions(header.width, header.height)?;
        self.enter(State::Done);
        Ok(ImageConfig {
            width: header.width,
            height: header.height,
            color_model: header.color_model(),
        })
    }

    /// Decode the first frame, or every frame, of `data`.
    pub fn decode(
        mut self,
        data: &[u8],
        request: FrameRequest,
    ) -> Result<DecodedImageSet, CodecError> {
        let prefix = &data[..data.len().min(MAX_HEADER_SIZE)];
        let header = probe::read_header(prefix)?;
        self.check_dimensions(header.width, header.height)?;

        let info = self.backend.probe(data)?;
        self.check_dimensions(info.width, info.height)?;
        if info.frame_count == 0 {
            return Err(CodecError::DecodeFailed("stream has no frames".into()));
        }
        self.enter(State::ProbedHeader);

        let single = request == FrameRequest::First || !info.has_animation;
        let request = if single { FrameRequest::First } else { FrameRequest::All };
        let mut source = self.backend.frames(data, &info, request)?;
        let mut set = DecodedImageSet::new();

        if single {
            self.enter(State::SingleFrame);
            let frame = source
                .next_frame()?
                .ok_or_else(|| CodecError::DecodeFailed("backend produced no frame".into()))?;
            let delay = if info.has_animation { frame.delay_ms } else { 0 };
            set.push(check_frame(frame, &info, 0)?, delay);
        } else {
            let mut index = 0;
            while let Some(frame) = source.next_frame()? {
                self.enter(State::MultiFrame(index));
                let delay = frame.delay_ms;
                set.push(check_frame(frame, &info, index)?, delay);
                index += 1;
            }
            if set.is_empty() {
                return Err(CodecError::DecodeFailed("backend produced no frames".into()));
            }
            if set.len() != info.frame_count as usize {
                debug!(
                    expected = info.frame_count,
                    got = set.len(),
                    "frame count differs from stream header"
                );
            }
        }

        self.enter(State::Done);
        Ok(set)
    }

    /// Encode one picture.
    pub fn encode(
        self,
        source: EncodeSource<'_>,
        options: &EncodeOptions,
    ) -> Result<Vec<u8>, CodecError> {
        let input = EncoderInput::from_source(source)?;
        debug!(
            backend = %self.backend.kind(),
            width = input.width(),
            height = input.height(),
            planar = input.is_planar(),
            "encoding"
        );
        let out = self.backend.encode(&input, options)?;
        if out.is_empty() {
            return Err(CodecError::EncodeFailed("encoder produced no output".into()));
        }
        Ok(out)
    }
}

fn check_frame(
    frame: DecodedFrame,
    info: &StreamInfo,
    index: usize,
) -> Result<PixelImage, CodecError> {
    let dims = frame.image.dimensions();
    if dims != (info.width, info.height) {
        return Err(CodecError::DecodeFailed(format!(
            "frame {index} is {}x{}, canvas is {}x{}",
            dims.0, dims.1, info.width, info.height
        )));
    }
    Ok(frame.image)
}
