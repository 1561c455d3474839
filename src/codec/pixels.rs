//! Pixel layout adapter.
//!
//! Decoders hand back either packed RGBA or planar YUVA 4:2:0 buffers; the
//! encoder wants one of the same two. This module owns those shapes and the
//! conversions between them.
//!
//! | Direction | Source | Result |
//! |---|---|---|
//! | decode | packed RGBA canvas | [`PixelImage::Rgba8`] |
//! | decode | Y, U, V, A planes | [`PixelImage::Yuva420`] |
//! | encode | RGBA / [`Yuva420Image`] | passed through, strides kept |
//! | encode | anything else | converted to non-premultiplied RGBA first |
//!
//! YUV ↔ RGB uses BT.601 limited-range coefficients, the same matrix the
//! codec uses internally, with nearest-neighbour chroma upsampling.

use super::backend::CodecError;
use crate::types::ColorModel;
use image::{DynamicImage, RgbaImage};
use std::borrow::Cow;

/// Largest width or height the bitstream can express.
pub const MAX_DIMENSION: u32 = 16383;

/// Chroma plane size for 4:2:0 subsampling (rounds up for odd sizes).
pub fn chroma_dimensions(width: u32, height: u32) -> (u32, u32) {
    (width.div_ceil(2), height.div_ceil(2))
}

/// Byte size of tightly packed Y, U, V and A planes.
pub fn yuva420_len(width: u32, height: u32) -> usize {
    let (cw, ch) = chroma_dimensions(width, height);
    2 * (width as usize * height as usize) + 2 * (cw as usize * ch as usize)
}

/// Planar 4:2:0 image with a full-resolution alpha plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Yuva420Image {
    width: u32,
    height: u32,
    y: Vec<u8>,
    u: Vec<u8>,
    v: Vec<u8>,
    a: Vec<u8>,
    y_stride: usize,
    uv_stride: usize,
    a_stride: usize,
}

fn plane_fits(len: usize, stride: usize, width: u32, rows: u32) -> bool {
    rows == 0 || (stride >= width as usize && len >= stride * (rows as usize - 1) + width as usize)
}

impl Yuva420Image {
    /// Build from separate planes. Strides are in bytes.
    #[allow(clippy::too_many_arguments)]
    pub fn from_planes(
        width: u32,
        height: u32,
        y: Vec<u8>,
        u: Vec<u8>,
        v: Vec<u8>,
        a: Vec<u8>,
        y_stride: usize,
        uv_stride: usize,
        a_stride: usize,
    ) -> Result<Self, CodecError> {
        let (cw, ch) = chroma_dimensions(width, height);
        if !plane_fits(y.len(), y_stride, width, height)
            || !plane_fits(u.len(), uv_stride, cw, ch)
            || !plane_fits(v.len(), uv_stride, cw, ch)
            || !plane_fits(a.len(), a_stride, width, height)
        {
            return Err(CodecError::InvalidInput(format!(
                "planes too small for {width}x{height} YUVA 4:2:0"
            )));
        }
        Ok(Self {
            width,
            height,
            y,
            u,
            v,
            a,
            y_stride,
            uv_stride,
            a_stride,
        })
    }

    /// Split a tightly packed `Y | U | V | A` buffer.
    pub fn from_contiguous(width: u32, height: u32, buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < yuva420_len(width, height) {
            return Err(CodecError::InvalidInput(format!(
                "YUVA buffer holds {} bytes, {}x{} needs {}",
                buf.len(),
                width,
                height,
                yuva420_len(width, height)
            )));
        }
        let (cw, ch) = chroma_dimensions(width, height);
        let luma = width as usize * height as usize;
        let chroma = cw as usize * ch as usize;
        let (y, rest) = buf.split_at(luma);
        let (u, rest) = rest.split_at(chroma);
        let (v, rest) = rest.split_at(chroma);
        let a = &rest[..luma];
        Self::from_planes(
            width,
            height,
            y.to_vec(),
            u.to_vec(),
            v.to_vec(),
            a.to_vec(),
            width as usize,
            cw as usize,
            width as usize,
        )
    }

    /// Convert packed RGBA to planar YUVA, averaging chroma over 2x2 blocks.
    pub fn from_rgba(rgba: &RgbaImage) -> Self {
        let (width, height) = rgba.dimensions();
        let (cw, ch) = chroma_dimensions(width, height);
        let mut y = vec![0u8; width as usize * height as usize];
        let mut a = vec![0u8; width as usize * height as usize];
        let mut u = vec![0u8; cw as usize * ch as usize];
        let mut v = vec![0u8; cw as usize * ch as usize];

        for (px, py, p) in rgba.enumerate_pixels() {
            let [r, g, b, alpha] = p.0;
            let idx = (py * width + px) as usize;
            y[idx] = rgb_to_y(r, g, b);
            a[idx] = alpha;
        }

        for cy in 0..ch {
            for cx in 0..cw {
                let (mut sr, mut sg, mut sb, mut n) = (0u32, 0u32, 0u32, 0u32);
                for py in (cy * 2)..(cy * 2 + 2).min(height) {
                    for px in (cx * 2)..(cx * 2 + 2).min(width) {
                        let [r, g, b, _] = rgba.get_pixel(px, py).0;
                        sr += r as u32;
                        sg += g as u32;
                        sb += b as u32;
                        n += 1;
                    }
                }
                let (r, g, b) = (
                    ((sr + n / 2) / n) as u8,
                    ((sg + n / 2) / n) as u8,
                    ((sb + n / 2) / n) as u8,
                );
                let idx = (cy * cw + cx) as usize;
                u[idx] = rgb_to_u(r, g, b);
                v[idx] = rgb_to_v(r, g, b);
            }
        }

        Self {
            width,
            height,
            y,
            u,
            v,
            a,
            y_stride: width as usize,
            uv_stride: cw as usize,
            a_stride: width as usize,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn y_plane(&self) -> &[u8] {
        &self.y
    }

    pub fn u_plane(&self) -> &[u8] {
        &self.u
    }

    pub fn v_plane(&self) -> &[u8] {
        &self.v
    }

    pub fn a_plane(&self) -> &[u8] {
        &self.a
    }

    pub fn y_stride(&self) -> usize {
        self.y_stride
    }

    pub fn uv_stride(&self) -> usize {
        self.uv_stride
    }

    pub fn a_stride(&self) -> usize {
        self.a_stride
    }

    /// Planes concatenated without row padding, as `Y | U | V | A`.
    pub fn to_contiguous(&self) -> Vec<u8> {
        let (cw, ch) = chroma_dimensions(self.width, self.height);
        let mut out = Vec::with_capacity(yuva420_len(self.width, self.height));
        copy_rows(&mut out, &self.y, self.y_stride, self.width, self.height);
        copy_rows(&mut out, &self.u, self.uv_stride, cw, ch);
        copy_rows(&mut out, &self.v, self.uv_stride, cw, ch);
        copy_rows(&mut out, &self.a, self.a_stride, self.width, self.height);
        out
    }

    /// Convert to packed RGBA.
    pub fn to_rgba8(&self) -> RgbaImage {
        RgbaImage::from_fn(self.width, self.height, |x, y| {
            let luma = self.y[y as usize * self.y_stride + x as usize];
            let ci = (y / 2) as usize * self.uv_stride + (x / 2) as usize;
            let (r, g, b) = yuv_to_rgb(luma, self.u[ci], self.v[ci]);
            let alpha = self.a[y as usize * self.a_stride + x as usize];
            image::Rgba([r, g, b, alpha])
        })
    }
}

fn copy_rows(out: &mut Vec<u8>, plane: &[u8], stride: usize, width: u32, rows: u32) {
    for row in 0..rows as usize {
        let start = row * stride;
        out.extend_from_slice(&plane[start..start + width as usize]);
    }
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

fn rgb_to_y(r: u8, g: u8, b: u8) -> u8 {
    clamp_u8(16.0 + 0.2568 * r as f32 + 0.5041 * g as f32 + 0.0979 * b as f32)
}

fn rgb_to_u(r: u8, g: u8, b: u8) -> u8 {
    clamp_u8(128.0 - 0.1482 * r as f32 - 0.2910 * g as f32 + 0.4392 * b as f32)
}

fn rgb_to_v(r: u8, g: u8, b: u8) -> u8 {
    clamp_u8(128.0 + 0.4392 * r as f32 - 0.3678 * g as f32 - 0.0714 * b as f32)
}

/// BT.601 limited-range YCbCr → RGB.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let c = 1.164 * (y as f32 - 16.0);
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    (
        clamp_u8(c + 1.596 * e),
        clamp_u8(c - 0.392 * d - 0.813 * e),
        clamp_u8(c + 2.017 * d),
    )
}

/// A decoded frame in whichever layout the backend produced.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelImage {
    Rgba8(RgbaImage),
    Yuva420(Yuva420Image),
}

impl PixelImage {
    pub fn width(&self) -> u32 {
        match self {
            PixelImage::Rgba8(img) => img.width(),
            PixelImage::Yuva420(img) => img.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            PixelImage::Rgba8(img) => img.height(),
            PixelImage::Yuva420(img) => img.height(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    pub fn color_model(&self) -> ColorModel {
        match self {
            PixelImage::Rgba8(_) => ColorModel::Rgba,
            PixelImage::Yuva420(_) => ColorModel::Yuva420,
        }
    }

    /// Packed RGBA copy of this frame.
    pub fn to_rgba8(&self) -> RgbaImage {
        match self {
            PixelImage::Rgba8(img) => img.clone(),
            PixelImage::Yuva420(img) => img.to_rgba8(),
        }
    }

    pub fn into_rgba8(self) -> RgbaImage {
        match self {
            PixelImage::Rgba8(img) => img,
            PixelImage::Yuva420(img) => img.to_rgba8(),
        }
    }

    /// Hand the frame to the `image` ecosystem.
    pub fn into_dynamic(self) -> DynamicImage {
        DynamicImage::ImageRgba8(self.into_rgba8())
    }
}

/// Anything [`encode`](crate::encode) accepts.
#[derive(Debug, Clone, Copy)]
pub enum EncodeSource<'a> {
    Pixels(&'a PixelImage),
    Rgba(&'a RgbaImage),
    Yuva(&'a Yuva420Image),
    Dynamic(&'a DynamicImage),
}

impl<'a> From<&'a PixelImage> for EncodeSource<'a> {
    fn from(img: &'a PixelImage) -> Self {
        EncodeSource::Pixels(img)
    }
}

impl<'a> From<&'a RgbaImage> for EncodeSource<'a> {
    fn from(img: &'a RgbaImage) -> Self {
        EncodeSource::Rgba(img)
    }
}

impl<'a> From<&'a Yuva420Image> for EncodeSource<'a> {
    fn from(img: &'a Yuva420Image) -> Self {
        EncodeSource::Yuva(img)
    }
}

impl<'a> From<&'a DynamicImage> for EncodeSource<'a> {
    fn from(img: &'a DynamicImage) -> Self {
        EncodeSource::Dynamic(img)
    }
}

/// Encoder-ready pixels: either packed RGBA or planar YUVA 4:2:0.
#[derive(Debug, Clone)]
pub enum EncoderInput<'a> {
    Packed {
        pixels: Cow<'a, [u8]>,
        width: u32,
        height: u32,
        /// Bytes per row.
        stride: usize,
    },
    Planar(&'a Yuva420Image),
}

impl<'a> EncoderInput<'a> {
    /// Pick the encoder layout for a source, converting only when the source
    /// is neither packed RGBA nor planar 4:2:0.
    pub fn from_source(source: EncodeSource<'a>) -> Result<Self, CodecError> {
        let input = match source {
            EncodeSource::Pixels(PixelImage::Rgba8(img)) | EncodeSource::Rgba(img) => {
                Self::packed(Cow::Borrowed(img.as_raw().as_slice()), img.width(), img.height())
            }
            EncodeSource::Pixels(PixelImage::Yuva420(img)) | EncodeSource::Yuva(img) => {
                EncoderInput::Planar(img)
            }
            EncodeSource::Dynamic(DynamicImage::ImageRgba8(img)) => {
                Self::packed(Cow::Borrowed(img.as_raw().as_slice()), img.width(), img.height())
            }
            EncodeSource::Dynamic(other) => {
                let rgba = other.to_rgba8();
                let (width, height) = rgba.dimensions();
                Self::packed(Cow::Owned(rgba.into_raw()), width, height)
            }
        };
        input.validate()?;
        Ok(input)
    }

    fn packed(pixels: Cow<'a, [u8]>, width: u32, height: u32) -> Self {
        EncoderInput::Packed {
            pixels,
            width,
            height,
            stride: width as usize * 4,
        }
    }

    fn validate(&self) -> Result<(), CodecError> {
        let (w, h) = (self.width(), self.height());
        if w == 0 || h == 0 || w > MAX_DIMENSION || h > MAX_DIMENSION {
            return Err(CodecError::InvalidInput(format!(
                "cannot encode {w}x{h}: dimensions must be 1..={MAX_DIMENSION}"
            )));
        }
        Ok(())
    }

    pub fn width(&self) -> u32 {
        match self {
            EncoderInput::Packed { width, .. } => *width,
            EncoderInput::Planar(img) => img.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            EncoderInput::Packed { height, .. } => *height,
            EncoderInput::Planar(img) => img.height(),
        }
    }

    pub fn is_planar(&self) -> bool {
        matches!(self, EncoderInput::Planar(_))
    }

    /// Pixels without row padding: RGBA rows, or `Y | U | V | A` planes.
    pub fn tight_bytes(&self) -> Cow<'_, [u8]> {
        match self {
            EncoderInput::Packed {
                pixels,
                width,
                height,
                stride,
            } => {
                let row = *width as usize * 4;
                if *stride == row {
                    Cow::Borrowed(&pixels[..row * *height as usize])
                } else {
                    let mut out = Vec::with_capacity(row * *height as usize);
                    copy_rows(&mut out, pixels, *stride, *width * 4, *height);
                    Cow::Owned(out)
                }
            }
            EncoderInput::Planar(img) => Cow::Owned(img.to_contiguous()),
        }
    }
}
