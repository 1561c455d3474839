//! Native backend: libwebp reached through `libloading`.
//!
//! Every library allocation is owned by a guard whose `Drop` hands it back
//! to the matching release entry point, so early returns and `?` never leak:
//!
//! | Guard | Acquired by | Released by |
//! |---|---|---|
//! | [`DecoderConfigGuard`] | `WebPDecode` | `WebPFreeDecBuffer` |
//! | [`WebpBuffer`] | `WebPDecodeRGBA` | `WebPFree` |
//! | [`PictureGuard`] | `WebPPictureInit` / `WebPPictureImportRGBA` | `WebPPictureFree` |
//! | [`MemoryWriterGuard`] | `WebPMemoryWrite` (via `WebPEncode`) | `WebPMemoryWriterClear` |
//! | [`DemuxerGuard`] | `WebPDemuxInternal` | `WebPDemuxDelete` |
//! | [`IteratorGuard`] | `WebPDemuxGetFrame` | `WebPDemuxReleaseIterator` |
//!
//! Still images decode with one `WebPDecode` call. Animations go through the
//! demux iterator: each pull decodes one fragment with `WebPDecodeRGBA` and
//! paints it onto a [`Canvas`].

pub mod abi;
pub mod library;

#[cfg(test)]
pub(crate) mod fake;

use abi::*;
use library::{NativeLibrary, WebpApi};

use super::backend::{
    Backend, BackendKind, BufferedFrames, CodecError, DecodedFrame, FrameRequest, FrameSource,
    StreamInfo,
};
use super::compose::{Blend, Canvas, Dispose, Fragment};
use super::params::EncodeOptions;
use super::pixels::{EncoderInput, PixelImage, Yuva420Image};
use crate::types::ColorModel;
use image::RgbaImage;
use std::ffi::{c_int, c_void};

/// Decoder output buffer, freed with `WebPFreeDecBuffer`.
struct DecoderConfigGuard<'a> {
    api: &'a WebpApi,
    config: WebPDecoderConfig,
}

impl Drop for DecoderConfigGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: the buffer was initialized by WebPInitDecoderConfig; freeing
        // an empty or already-released buffer is a no-op.
        unsafe { (self.api.free_dec_buffer)(&mut self.config.output) };
    }
}

/// Buffer returned by a `WebPDecode*` convenience call, freed with `WebPFree`.
struct WebpBuffer<'a> {
    api: &'a WebpApi,
    ptr: *mut u8,
    len: usize,
}

impl WebpBuffer<'_> {
    fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr came from the library with at least len bytes and is
        // live until drop.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl Drop for WebpBuffer<'_> {
    fn drop(&mut self) {
        // SAFETY: ptr is a non-null library allocation not yet released.
        unsafe { (self.api.free)(self.ptr.cast::<c_void>()) };
    }
}

/// Encoder picture, freed with `WebPPictureFree`.
struct PictureGuard<'a> {
    api: &'a WebpApi,
    picture: WebPPicture,
}

impl Drop for PictureGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: picture was initialized by WebPPictureInit; only memory the
        // library allocated is released, caller-provided planes are not.
        unsafe { (self.api.picture_free)(&mut self.picture) };
    }
}

/// Growable output buffer the encoder writes into.
struct MemoryWriterGuard<'a> {
    api: &'a WebpApi,
    writer: Box<WebPMemoryWriter>,
}

impl<'a> MemoryWriterGuard<'a> {
    fn new(api: &'a WebpApi) -> Self {
        let mut writer = Box::new(WebPMemoryWriter::zeroed());
        // SAFETY: writer is a valid, writable struct.
        unsafe { (api.memory_writer_init)(writer.as_mut()) };
        Self { api, writer }
    }

    fn custom_ptr(&mut self) -> *mut c_void {
        (self.writer.as_mut() as *mut WebPMemoryWriter).cast()
    }

    fn bytes(&self) -> &[u8] {
        if self.writer.mem.is_null() {
            return &[];
        }
        // SAFETY: mem holds size bytes written by WebPMemoryWrite.
        unsafe { std::slice::from_raw_parts(self.writer.mem, self.writer.size) }
    }
}

impl Drop for MemoryWriterGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: writer was initialized by WebPMemoryWriterInit.
        unsafe { (self.api.memory_writer_clear)(self.writer.as_mut()) };
    }
}

/// Demuxer over a borrowed stream, deleted with `WebPDemuxDelete`.
struct DemuxerGuard<'a> {
    api: &'a WebpApi,
    demux: *mut WebPDemuxer,
    _data: std::marker::PhantomData<&'a [u8]>,
}

impl<'a> DemuxerGuard<'a> {
    fn new(api: &'a WebpApi, data: &'a [u8]) -> Result<Self, CodecError> {
        // SAFETY: data is borrowed for 'a, which outlives the guard.
        let demux = unsafe { api.demux(data) };
        if demux.is_null() {
            return Err(CodecError::DecodeFailed(
                "WebPDemux could not parse the container".into(),
            ));
        }
        Ok(Self {
            api,
            demux,
            _data: std::marker::PhantomData,
        })
    }

    fn value(&self, feature: c_int) -> u32 {
        // SAFETY: demux is live for the guard's lifetime.
        unsafe { self.api.demux_value(self.demux, feature) }
    }
}

impl Drop for DemuxerGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: demux is non-null and not yet deleted.
        unsafe { (self.api.demux_delete)(self.demux) };
    }
}

/// Frame iterator, released with `WebPDemuxReleaseIterator`.
struct IteratorGuard<'a> {
    api: &'a WebpApi,
    iter: WebPIterator,
}

impl Drop for IteratorGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: iter was filled by a successful WebPDemuxGetFrame.
        unsafe { (self.api.demux_release_iterator)(&mut self.iter) };
    }
}

/// Animation frames pulled one fragment at a time.
///
/// Field order is drop order: the iterator is released before its demuxer.
struct DemuxFrames<'a> {
    iter: Option<IteratorGuard<'a>>,
    demux: DemuxerGuard<'a>,
    api: &'a WebpApi,
    canvas: Canvas,
    remaining: u32,
}

impl<'a> DemuxFrames<'a> {
    fn new(
        api: &'a WebpApi,
        data: &'a [u8],
        request: FrameRequest,
    ) -> Result<Self, CodecError> {
        let demux = DemuxerGuard::new(api, data)?;
        let canvas = Canvas::new(
            demux.value(WEBP_FF_CANVAS_WIDTH),
            demux.value(WEBP_FF_CANVAS_HEIGHT),
        );
        let remaining = match request {
            FrameRequest::First => 1,
            FrameRequest::All => demux.value(WEBP_FF_FRAME_COUNT),
        };
        Ok(Self {
            iter: None,
            demux,
            api,
            canvas,
            remaining,
        })
    }

    /// Move the iterator onto the next frame; `false` when there is none.
    fn step(&mut self) -> Result<bool, CodecError> {
        if let Some(guard) = self.iter.as_mut() {
            // SAFETY: guard.iter was filled by first_frame on a live demuxer.
            return Ok(unsafe { self.api.advance(&mut guard.iter) });
        }
        let mut iter = WebPIterator::zeroed();
        // SAFETY: the demuxer is live while self exists.
        if !unsafe { self.api.first_frame(self.demux.demux, &mut iter) } {
            return Err(CodecError::DecodeFailed(
                "WebPDemuxGetFrame found no first frame".into(),
            ));
        }
        self.iter = Some(IteratorGuard {
            api: self.api,
            iter,
        });
        Ok(true)
    }
}

impl FrameSource for DemuxFrames<'_> {
    fn next_frame(&mut self) -> Result<Option<DecodedFrame>, CodecError> {
        if self.remaining == 0 || !self.step()? {
            self.remaining = 0;
            return Ok(None);
        }
        let Some(guard) = self.iter.as_ref() else {
            return Ok(None);
        };
        let iter = guard.iter;

        let (mut w, mut h) = (0, 0);
        // SAFETY: the fragment points into the stream the demuxer borrows.
        let ptr = unsafe {
            (self.api.decode_rgba)(iter.fragment.bytes, iter.fragment.size, &mut w, &mut h)
        };
        if ptr.is_null() {
            return Err(CodecError::DecodeFailed(format!(
                "frame {}: WebPDecodeRGBA failed",
                iter.frame_num
            )));
        }
        let pixels = WebpBuffer {
            api: self.api,
            ptr,
            len: w.max(0) as usize * h.max(0) as usize * 4,
        };

        let fragment = Fragment {
            x_offset: iter.x_offset.max(0) as u32,
            y_offset: iter.y_offset.max(0) as u32,
            width: w.max(0) as u32,
            height: h.max(0) as u32,
            rgba: pixels.as_slice(),
            dispose: if iter.dispose_method == WEBP_MUX_DISPOSE_BACKGROUND {
                Dispose::Background
            } else {
                Dispose::None
            },
            blend: if iter.blend_method == WEBP_MUX_NO_BLEND {
                Blend::NoBlend
            } else {
                Blend::AlphaBlend
            },
        };
        let image = self.canvas.apply(&fragment)?.clone();
        self.remaining -= 1;

        tracing::trace!(frame = iter.frame_num, delay_ms = iter.duration, "decoded frame");
        Ok(Some(DecodedFrame {
            image: PixelImage::Rgba8(image),
            delay_ms: iter.duration.max(0) as u32,
        }))
    }
}

fn status_error(call: &str, status: c_int) -> CodecError {
    CodecError::DecodeFailed(format!(
        "{call} returned {} ({status})",
        status_name(status)
    ))
}

/// libwebp loaded in-process.
pub struct NativeBackend {
    lib: NativeLibrary,
    use_threads: bool,
}

impl NativeBackend {
    pub fn new(lib: NativeLibrary, use_threads: bool) -> Self {
        Self { lib, use_threads }
    }

    fn api(&self) -> &WebpApi {
        self.lib.api()
    }

    fn decode_still(
        &self,
        data: &[u8],
        model: ColorModel,
    ) -> Result<PixelImage, CodecError> {
        let api = self.api();
        let config = api.decoder_config().ok_or_else(|| {
            CodecError::DecodeFailed("WebPInitDecoderConfig rejected the ABI version".into())
        })?;
        let mut guard = DecoderConfigGuard { api, config };
        guard.config.options.use_threads = self.use_threads as c_int;
        guard.config.output.colorspace = match model {
            ColorModel::Rgba => MODE_RGBA,
            ColorModel::Yuva420 => MODE_YUVA,
        };

        api.decode_into(data, &mut guard.config)
            .map_err(|status| status_error("WebPDecode", status))?;

        let out = &guard.config.output;
        let (width, height) = (out.width.max(0) as u32, out.height.max(0) as u32);
        match model {
            ColorModel::Rgba => {
                // SAFETY: colorspace is MODE_RGBA, so the RGBA arm is active.
                let buf = unsafe { out.u.RGBA };
                copy_rgba(buf, width, height).map(PixelImage::Rgba8)
            }
            ColorModel::Yuva420 => {
                // SAFETY: colorspace is MODE_YUVA, so the YUVA arm is active.
                let buf = unsafe { out.u.YUVA };
                copy_yuva(buf, width, height).map(PixelImage::Yuva420)
            }
        }
    }
}

fn copy_rgba(buf: WebPRGBABuffer, width: u32, height: u32) -> Result<RgbaImage, CodecError> {
    let stride = buf.stride.max(0) as usize;
    let row = width as usize * 4;
    let needed = stride * height.saturating_sub(1) as usize + row;
    if buf.rgba.is_null() || stride < row || buf.size < needed {
        return Err(CodecError::DecodeFailed("decoder returned an empty RGBA buffer".into()));
    }
    // SAFETY: the library reports `size` readable bytes at `rgba`.
    let src = unsafe { std::slice::from_raw_parts(buf.rgba, buf.size) };
    let mut pixels = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        pixels.extend_from_slice(&src[y * stride..y * stride + row]);
    }
    RgbaImage::from_raw(width, height, pixels)
        .ok_or_else(|| CodecError::DecodeFailed("RGBA buffer size mismatch".into()))
}

fn copy_yuva(buf: WebPYUVABuffer, width: u32, height: u32) -> Result<Yuva420Image, CodecError> {
    let plane = |ptr: *mut u8, size: usize| -> Option<Vec<u8>> {
        // SAFETY: the library reports `size` readable bytes at `ptr`.
        (!ptr.is_null()).then(|| unsafe { std::slice::from_raw_parts(ptr, size) }.to_vec())
    };
    let (Some(y), Some(u), Some(v)) = (
        plane(buf.y, buf.y_size),
        plane(buf.u, buf.u_size),
        plane(buf.v, buf.v_size),
    ) else {
        return Err(CodecError::DecodeFailed("decoder returned an empty YUV buffer".into()));
    };
    let (a, a_stride) = match plane(buf.a, buf.a_size) {
        Some(a) => (a, buf.a_stride.max(0) as usize),
        None => (vec![0xff; width as usize * height as usize], width as usize),
    };
    Yuva420Image::from_planes(
        width,
        height,
        y,
        u,
        v,
        a,
        buf.y_stride.max(0) as usize,
        buf.u_stride.max(0) as usize,
        a_stride,
    )
}

impl Backend for NativeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn probe(&self, data: &[u8]) -> Result<StreamInfo, CodecError> {
        let api = self.api();
        let (width, height) = api
            .info(data)
            .ok_or_else(|| CodecError::DecodeFailed("WebPGetInfo rejected the header".into()))?;
        let features = api
            .features(data)
            .map_err(|status| status_error("WebPGetFeatures", status))?;

        let mut info = StreamInfo {
            width,
            height,
            frame_count: 1,
            has_animation: features.has_animation != 0,
            is_lossless: features.format == FORMAT_LOSSLESS,
            has_alpha: features.has_alpha != 0,
        };
        if info.has_animation {
            let demux = DemuxerGuard::new(api, data)?;
            info.width = demux.value(WEBP_FF_CANVAS_WIDTH);
            info.height = demux.value(WEBP_FF_CANVAS_HEIGHT);
            info.frame_count = demux.value(WEBP_FF_FRAME_COUNT);
        }
        tracing::debug!(?info, "native probe");
        Ok(info)
    }

    fn frames<'a>(
        &'a self,
        data: &'a [u8],
        info: &StreamInfo,
        request: FrameRequest,
    ) -> Result<Box<dyn FrameSource + 'a>, CodecError> {
        if info.has_animation {
            return Ok(Box::new(DemuxFrames::new(self.api(), data, request)?));
        }
        let image = self.decode_still(data, info.color_model())?;
        Ok(Box::new(BufferedFrames::single(image)))
    }

    fn encode(
        &self,
        input: &EncoderInput<'_>,
        options: &EncodeOptions,
    ) -> Result<Vec<u8>, CodecError> {
        let api = self.api();
        let mut config = api
            .encoder_config(options.quality.value() as f32)
            .ok_or_else(|| {
                CodecError::EncodeFailed("WebPConfigInit rejected the ABI version".into())
            })?;
        config.lossless = options.lossless as c_int;
        config.method = options.method.value() as c_int;
        config.exact = options.exact as c_int;
        config.thread_level = self.use_threads as c_int;
        if !api.is_valid(&config) {
            return Err(CodecError::EncodeFailed("WebPValidateConfig rejected the options".into()));
        }

        let mut writer = MemoryWriterGuard::new(api);
        let picture = api.picture().ok_or_else(|| {
            CodecError::EncodeFailed("WebPPictureInit rejected the ABI version".into())
        })?;
        let mut picture = PictureGuard { api, picture };
        picture.picture.width = input.width() as c_int;
        picture.picture.height = input.height() as c_int;

        // Planes stay borrowed only for exact encodes; otherwise the encoder
        // rewrites pixels under transparent areas in place.
        let mut scratch: Option<Yuva420Image> = None;
        match input {
            EncoderInput::Packed { pixels, stride, .. } => {
                picture.picture.use_argb = 1;
                if !api.import_rgba(&mut picture.picture, pixels, *stride)? {
                    return Err(CodecError::EncodeFailed("WebPPictureImportRGBA failed".into()));
                }
            }
            EncoderInput::Planar(img) => {
                let planes: &Yuva420Image = if options.exact {
                    img
                } else {
                    scratch.insert((*img).clone())
                };
                let pic = &mut picture.picture;
                pic.use_argb = 0;
                pic.colorspace = WEBP_YUV420A;
                pic.y = planes.y_plane().as_ptr().cast_mut();
                pic.u = planes.u_plane().as_ptr().cast_mut();
                pic.v = planes.v_plane().as_ptr().cast_mut();
                pic.a = planes.a_plane().as_ptr().cast_mut();
                pic.y_stride = planes.y_stride() as c_int;
                pic.uv_stride = planes.uv_stride() as c_int;
                pic.a_stride = planes.a_stride() as c_int;
            }
        }

        picture.picture.writer = Some(api.memory_write);
        picture.picture.custom_ptr = writer.custom_ptr();

        // SAFETY: plane pointers come from `input` or `scratch`, both alive
        // until after the call; custom_ptr points at the boxed writer.
        let ok = unsafe { api.encode_picture(&config, &mut picture.picture) };
        if !ok {
            return Err(CodecError::EncodeFailed(format!(
                "WebPEncode failed with error code {}",
                picture.picture.error_code
            )));
        }
        let out = writer.bytes();
        if out.is_empty() {
            return Err(CodecError::EncodeFailed("encoder produced no output".into()));
        }
        tracing::debug!(bytes = out.len(), "native encode");
        Ok(out.to_vec())
    }
}
