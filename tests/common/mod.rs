//! Fixtures shared by the integration tests.
//!
//! Real WebP files are built in-test with the `image` crate's lossless
//! encoder; animated files wrap several of those in a VP8X/ANIM/ANMF
//! container by hand.

#![allow(dead_code)]

use image::{ImageEncoder, RgbaImage};
use webpgate::{CodecError, EncodeOptions};

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

/// Solid opaque frame, distinguishable by `shade`.
pub fn solid(width: u32, height: u32, shade: u8) -> RgbaImage {
    RgbaImage::from_pixel(width, height, image::Rgba([shade, 255 - shade, shade / 2, 255]))
}

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

/// Extended still: VP8X, an ICC profile of `icc_len` bytes, then the
/// lossless bitstream of `img`.
pub fn extended_still_webp(img: &RgbaImage, icc_len: usize) -> Vec<u8> {
    let mut body = b"WEBP".to_vec();
    let mut vp8x = vec![0x20 | 0x10, 0, 0, 0];
    u24(&mut vp8x, img.width() - 1);
    u24(&mut vp8x, img.height() - 1);
    chunk(&mut body, b"VP8X", &vp8x);
    chunk(&mut body, b"ICCP", &vec![0; icc_len]);
    body.extend_from_slice(&lossless_webp(img)[12..]);

    let mut out = b"RIFF".to_vec();
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// Animated file: full-canvas frames at (0, 0), no blending, one delay each.
pub fn animated_webp(frames: &[RgbaImage], delays_ms: &[u32]) -> Vec<u8> {
    let (width, height) = frames[0].dimensions();
    let mut body = b"WEBP".to_vec();

    let mut vp8x = vec![0x02 | 0x10, 0, 0, 0];
    u24(&mut vp8x, width - 1);
    u24(&mut vp8x, height - 1);
    chunk(&mut body, b"VP8X", &vp8x);
    chunk(&mut body, b"ANIM", &[0, 0, 0, 0, 0, 0]);

    for (frame, &delay) in frames.iter().zip(delays_ms) {
        let still = lossless_webp(frame);
        let mut anmf = Vec::new();
        u24(&mut anmf, 0);
        u24(&mut anmf, 0);
        u24(&mut anmf, frame.width() - 1);
        u24(&mut anmf, frame.height() - 1);
        u24(&mut anmf, delay);
        anmf.push(0b10);
        anmf.extend_from_slice(&still[12..]);
        chunk(&mut body, b"ANMF", &anmf);
    }

    let mut out = b"RIFF".to_vec();
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// Whether the process backend can serve calls. Prints why when it cannot.
pub fn codec_available() -> bool {
    match webpgate::encode(&solid(1, 1, 0), &EncodeOptions::lossless()) {
        Ok(_) => true,
        Err(CodecError::BackendUnavailable(cause)) => {
            eprintln!("Skipping: no codec backend available ({cause})");
            false
        }
        Err(e) => panic!("probe encode failed: {e}"),
    }
}
