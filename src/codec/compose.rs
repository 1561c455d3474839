//! Animation canvas compositor.
//!
//! The demux API hands out frames as fragments: a sub-rectangle of the
//! canvas plus dispose and blend instructions. Callers want whole canvases,
//! so each fragment is painted over the previous canvas state:
//!
//! 1. If the previous fragment asked for dispose-to-background, its
//!    rectangle is cleared to transparent black.
//! 2. The new fragment is either copied (no-blend) or alpha-blended
//!    (non-premultiplied "over") onto the canvas.
//!
//! The blend arithmetic is the integer form libwebp's own animation decoder
//! uses, so both backends agree on the composited pixels.

use super::backend::CodecError;
use image::RgbaImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispose {
    None,
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blend {
    AlphaBlend,
    NoBlend,
}

/// A decoded sub-rectangle of the canvas.
#[derive(Debug, Clone, Copy)]
pub struct Fragment<'a> {
    pub x_offset: u32,
    pub y_offset: u32,
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA, `width * height * 4` bytes.
    pub rgba: &'a [u8],
    pub dispose: Dispose,
    pub blend: Blend,
}

#[derive(Debug, Clone, Copy)]
struct Rect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

/// Canvas state carried from one fragment to the next.
#[derive(Debug)]
pub struct Canvas {
    pixels: RgbaImage,
    pending_clear: Option<Rect>,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            pixels: RgbaImage::new(width, height),
            pending_clear: None,
        }
    }

    /// Paint `fragment` and return the resulting canvas.
    pub fn apply(&mut self, fragment: &Fragment<'_>) -> Result<&RgbaImage, CodecError> {
        let (cw, ch) = self.pixels.dimensions();
        let fits = fragment
            .x_offset
            .checked_add(fragment.width)
            .is_some_and(|r| r <= cw)
            && fragment
                .y_offset
                .checked_add(fragment.height)
                .is_some_and(|b| b <= ch);
        if !fits {
            return Err(CodecError::DecodeFailed(format!(
                "frame {}x{} at ({}, {}) exceeds {}x{} canvas",
                fragment.width, fragment.height, fragment.x_offset, fragment.y_offset, cw, ch
            )));
        }
        let expected = fragment.width as usize * fragment.height as usize * 4;
        if fragment.rgba.len() < expected {
            return Err(CodecError::DecodeFailed(format!(
                "frame buffer holds {} bytes, expected {expected}",
                fragment.rgba.len()
            )));
        }

        if let Some(rect) = self.pending_clear.take() {
            for y in rect.y..rect.y + rect.height {
                for x in rect.x..rect.x + rect.width {
                    self.pixels.put_pixel(x, y, image::Rgba([0, 0, 0, 0]));
                }
            }
        }

        for row in 0..fragment.height {
            for col in 0..fragment.width {
                let i = (row as usize * fragment.width as usize + col as usize) * 4;
                let src = [
                    fragment.rgba[i],
                    fragment.rgba[i + 1],
                    fragment.rgba[i + 2],
                    fragment.rgba[i + 3],
                ];
                let dst = self
                    .pixels
                    .get_pixel_mut(fragment.x_offset + col, fragment.y_offset + row);
                dst.0 = match fragment.blend {
                    Blend::NoBlend => src,
                    Blend::AlphaBlend => blend_non_premult(src, dst.0),
                };
            }
        }

        if fragment.dispose == Dispose::Background {
            self.pending_clear = Some(Rect {
                x: fragment.x_offset,
                y: fragment.y_offset,
                width: fragment.width,
                height: fragment.height,
            });
        }
        Ok(&self.pixels)
    }
}

/// Source-over for straight (non-premultiplied) alpha.
fn blend_non_premult(src: [u8; 4], dst: [u8; 4]) -> [u8; 4] {
    let src_a = src[3] as u32;
    match src_a {
        0 => return dst,
        255 => return src,
        _ => {}
    }
    let dst_factor_a = (dst[3] as u32 * (256 - src_a)) >> 8;
    let blend_a = src_a + dst_factor_a;
    let scale = (1u32 << 24) / blend_a;
    let channel = |s: u8, d: u8| -> u8 {
        let unscaled = s as u32 * src_a + d as u32 * dst_factor_a;
        ((unscaled as u64 * scale as u64) >> 24) as u8
    };
    [
        channel(src[0], dst[0]),
        channel(src[1], dst[1]),
        channel(src[2], dst[2]),
        blend_a.min(255) as u8,
    ]
}
