//! Header prober: dimensions and stream kind from the first bytes of a file.
//!
//! Dimensions come from the RIFF container and the first chunk header, so
//! [`MAX_HEADER_SIZE`] bytes are enough for them. Extended (`VP8X`) files
//! hide the image bitstream behind optional chunks (`ICCP`, `ALPH`); the
//! prober walks those within whatever prefix it is given, up to
//! [`CHUNK_SCAN_LIMIT`], to tell lossless stills from lossy ones. Pure
//! functions, no backend involved.
//!
//! ```text
//! 0      4      8      12     16     20
//! RIFF   size   WEBP   fourcc csize  payload...
//!                      VP8    → frame tag (3) + start code 9d 01 2a + w16 h16
//!                      VP8L   → 0x2f + 14-bit w-1, 14-bit h-1, alpha, version
//!                      VP8X   → flags (1) + reserved (3) + 24-bit w-1, h-1
//! ```

use super::backend::CodecError;
use crate::types::ColorModel;

/// Bytes needed to read any supported header.
pub const MAX_HEADER_SIZE: usize = 32;

/// Prefix length searched for the image chunk of an extended file.
pub const CHUNK_SCAN_LIMIT: usize = 4096;

/// Offset of the first chunk after a `VP8X` header.
const VP8X_CHUNKS_START: usize = 30;

const VP8X_FLAG_ANIMATION: u8 = 0x02;
const VP8X_FLAG_ALPHA: u8 = 0x10;

/// Which first chunk the stream starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitstreamKind {
    /// Simple lossy file (`VP8 `).
    Lossy,
    /// Simple lossless file (`VP8L`).
    Lossless,
    /// Extended file (`VP8X`): may carry alpha, animation, metadata.
    Extended,
}

/// What the header reveals without decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderInfo {
    pub width: u32,
    pub height: u32,
    pub kind: BitstreamKind,
    pub has_alpha: bool,
    pub has_animation: bool,
    /// Whether the (first) image bitstream is lossless, when the prefix shows it.
    pub lossless_hint: bool,
}

impl HeaderInfo {
    /// Layout a single-frame decode will produce for this stream.
    pub fn color_model(&self) -> ColorModel {
        ColorModel::for_stream(self.has_animation, self.lossless_hint)
    }
}

/// `RIFF????WEBPVP8` signature check.
pub fn is_webp(prefix: &[u8]) -> bool {
    prefix.len() >= 15 && &prefix[0..4] == b"RIFF" && &prefix[8..15] == b"WEBPVP8"
}

/// Whether the stream starts with an extended (`VP8X`) header.
///
/// The color model of such a stream may need up to [`CHUNK_SCAN_LIMIT`]
/// bytes to determine.
pub fn is_extended(prefix: &[u8]) -> bool {
    prefix.len() >= 16 && &prefix[12..16] == b"VP8X"
}

/// Parse the file header from a prefix of the stream.
pub fn read_header(prefix: &[u8]) -> Result<HeaderInfo, CodecError> {
    if prefix.len() < 20 {
        return Err(CodecError::DecodeFailed(format!(
            "header too short ({} bytes)",
            prefix.len()
        )));
    }
    if &prefix[0..4] != b"RIFF" || &prefix[8..12] != b"WEBP" {
        return Err(CodecError::DecodeFailed("missing RIFF/WEBP signature".into()));
    }

    let payload = &prefix[20..];
    let info = match &prefix[12..16] {
        b"VP8 " => read_vp8(payload)?,
        b"VP8L" => read_vp8l(payload)?,
        b"VP8X" => read_vp8x(payload, &prefix[VP8X_CHUNKS_START.min(prefix.len())..])?,
        other => {
            return Err(CodecError::DecodeFailed(format!(
                "unknown first chunk {:?}",
                String::from_utf8_lossy(other)
            )));
        }
    };

    if info.width == 0 || info.height == 0 {
        return Err(CodecError::DecodeFailed("zero image dimension".into()));
    }
    Ok(info)
}

fn truncated(kind: &str) -> CodecError {
    CodecError::DecodeFailed(format!("truncated {kind} header"))
}

fn read_vp8(payload: &[u8]) -> Result<HeaderInfo, CodecError> {
    if payload.len() < 10 {
        return Err(truncated("VP8"));
    }
    // Bit 0 of the frame tag is 0 for key frames; only key frames carry a size.
    if payload[0] & 1 != 0 {
        return Err(CodecError::DecodeFailed("VP8 stream does not start with a key frame".into()));
    }
    if payload[3..6] != [0x9d, 0x01, 0x2a] {
        return Err(CodecError::DecodeFailed("bad VP8 start code".into()));
    }
    let width = u16::from_le_bytes([payload[6], payload[7]]) & 0x3fff;
    let height = u16::from_le_bytes([payload[8], payload[9]]) & 0x3fff;
    Ok(HeaderInfo {
        width: width as u32,
        height: height as u32,
        kind: BitstreamKind::Lossy,
        has_alpha: false,
        has_animation: false,
        lossless_hint: false,
    })
}

fn read_vp8l(payload: &[u8]) -> Result<HeaderInfo, CodecError> {
    if payload.len() < 5 {
        return Err(truncated("VP8L"));
    }
    if payload[0] != 0x2f {
        return Err(CodecError::DecodeFailed("bad VP8L signature".into()));
    }
    let bits = u32::from_le_bytes([payload[1], payload[2], payload[3], payload[4]]);
    if bits >> 29 != 0 {
        return Err(CodecError::DecodeFailed("unsupported VP8L version".into()));
    }
    Ok(HeaderInfo {
        width: (bits & 0x3fff) + 1,
        height: ((bits >> 14) & 0x3fff) + 1,
        kind: BitstreamKind::Lossless,
        has_alpha: (bits >> 28) & 1 == 1,
        has_animation: false,
        lossless_hint: true,
    })
}

fn read_vp8x(payload: &[u8], rest: &[u8]) -> Result<HeaderInfo, CodecError> {
    if payload.len() < 10 {
        return Err(truncated("VP8X"));
    }
    let flags = payload[0];
    let width = u32::from_le_bytes([payload[4], payload[5], payload[6], 0]) + 1;
    let height = u32::from_le_bytes([payload[7], payload[8], payload[9], 0]) + 1;
    let has_animation = flags & VP8X_FLAG_ANIMATION != 0;
    Ok(HeaderInfo {
        width,
        height,
        kind: BitstreamKind::Extended,
        has_alpha: flags & VP8X_FLAG_ALPHA != 0,
        has_animation,
        lossless_hint: !has_animation && first_image_chunk(rest) == Some(*b"VP8L"),
    })
}

/// Fourcc of the first `VP8 `, `VP8L` or `ALPH` chunk in `chunks`, skipping
/// metadata chunks. `None` when it lies beyond the bytes available.
fn first_image_chunk(mut chunks: &[u8]) -> Option<[u8; 4]> {
    while chunks.len() >= 8 {
        let fourcc = [chunks[0], chunks[1], chunks[2], chunks[3]];
        if matches!(&fourcc, b"VP8 " | b"VP8L" | b"ALPH") {
            return Some(fourcc);
        }
        let size = u32::from_le_bytes([chunks[4], chunks[5], chunks[6], chunks[7]]) as usize;
        // Chunk payloads are padded to an even length.
        let skip = size.checked_add(8 + (size & 1))?;
        chunks = chunks.get(skip..)?;
    }
    None
}
