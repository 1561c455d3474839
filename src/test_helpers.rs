//! Shared test utilities for the webpgate test suite.
//!
//! Two kinds of fixtures:
//!
//! - **Fake streams** ([`fake_stream`]): a 10-byte record understood only by
//!   the instrumented native table and the fake guest. Used to drive the
//!   backends' resource handling without a real codec.
//! - **Real WebP files** ([`lossless_webp`], [`animated_webp`]): built with
//!   the `image` crate's lossless encoder, wrapped by hand into an animated
//!   container when several frames are needed.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let still = lossless_webp(&gradient(64, 48));
//! let anim = animated_webp(&[gradient(8, 8), gradient(8, 8)], 40);
//! ```

use image::{ImageEncoder, RgbaImage};

// =========================================================================
// Fake streams
// =========================================================================

/// Width, height (u32 LE), flags (bit0 animated, bit1 lossless), frame count.
pub fn fake_stream(width: u32, height: u32, animated: bool, lossless: bool, frames: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(10);
    out.extend_from_slice(&width.to_le_bytes());
    out.extend_from_slice(&height.to_le_bytes());
    out.push(animated as u8 | (lossless as u8) << 1);
    out.push(frames);
    out
}

// =========================================================================
// Real WebP files
// =========================================================================

/// Deterministic test pattern with varying alpha.
pub fn gradient(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            ((x + y) % 256) as u8,
            255 - ((x * 3) % 128) as u8,
        ])
    })
}

/// Encode `img` as a simple lossless (VP8L) file.
pub fn lossless_webp(img: &RgbaImage) -> Vec<u8> {
    let mut out = Vec::new();
    image::codecs::webp::WebPEncoder::new_lossless(&mut out)
        .write_image(
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::Rgba8,
        )
        .unwrap();
    out
}

fn chunk(out: &mut Vec<u8>, fourcc: &[u8; 4], payload: &[u8]) {
    out.extend_from_slice(fourcc);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    if payload.len() % 2 == 1 {
        out.push(0);
    }
}

fn u24(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes()[..3]);
}

/// Extended still: `VP8X` header, then `extra` chunks in order, then the
/// lossless bitstream of `img`.
pub fn extended_still_webp(img: &RgbaImage, extra: &[(&[u8; 4], &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(b"WEBP");

    let mut flags = 0x10;
    if extra.iter().any(|(fourcc, _)| *fourcc == b"ICCP") {
        flags |= 0x20;
    }
    let mut vp8x = vec![flags, 0, 0, 0];
    u24(&mut vp8x, img.width() - 1);
    u24(&mut vp8x, img.height() - 1);
    chunk(&mut body, b"VP8X", &vp8x);

    for (fourcc, payload) in extra {
        chunk(&mut body, fourcc, payload);
    }
    body.extend_from_slice(&lossless_webp(img)[12..]);

    let mut out = Vec::with_capacity(body.len() + 8);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// Animated file: every frame full-canvas at (0, 0), no blending, `delay_ms`
/// each, infinite loop.
pub fn animated_webp(frames: &[RgbaImage], delay_ms: u32) -> Vec<u8> {
    let (width, height) = frames[0].dimensions();

    let mut body = Vec::new();
    body.extend_from_slice(b"WEBP");

    let mut vp8x = vec![0x02 | 0x10, 0, 0, 0];
    u24(&mut vp8x, width - 1);
    u24(&mut vp8x, height - 1);
    chunk(&mut body, b"VP8X", &vp8x);

    // Background color (BGRA) + loop count.
    chunk(&mut body, b"ANIM", &[0, 0, 0, 0, 0, 0]);

    for frame in frames {
        let still = lossless_webp(frame);
        // Skip "RIFF" + size + "WEBP"; the rest is the VP8L chunk.
        let image_chunk = &still[12..];
        let mut anmf = Vec::new();
        u24(&mut anmf, 0);
        u24(&mut anmf, 0);
        u24(&mut anmf, frame.width() - 1);
        u24(&mut anmf, frame.height() - 1);
        u24(&mut anmf, delay_ms);
        // Bit 1: do not blend. Bit 0: dispose none.
        anmf.push(0b10);
        anmf.extend_from_slice(image_chunk);
        chunk(&mut body, b"ANMF", &anmf);
    }

    let mut out = Vec::with_capacity(body.len() + 8);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn animated_container_is_well_formed() {
        let data = animated_webp(&[gradient(4, 4), gradient(4, 4)], 50);
        assert_eq!(&data[0..4], b"RIFF");
        let riff_len = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
        assert_eq!(riff_len + 8, data.len());
        assert_eq!(&data[12..16], b"VP8X");
        assert_eq!(data.len() % 2, 0);
    }

    #[test]
    fn fake_stream_layout() {
        let s = fake_stream(3, 2, true, false, 9);
        assert_eq!(s.len(), 10);
        assert_eq!(s[8], 1);
        assert_eq!(s[9], 9);
    }
}
