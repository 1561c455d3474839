//! In-memory layouts of the libwebp structures the native backend touches.
//!
//! Every struct is `#[repr(C)]` with the library's field order and explicit
//! padding fields wherever the C compiler would insert padding on a 64-bit
//! target, so the `size_of` assertions at the bottom double as a layout
//! check. The layouts correspond to these ABI tags, which are also passed to
//! the `*Internal` initializers so the library can reject a mismatch:
//!
//! | Header | Constant | Value |
//! |---|---|---|
//! | `decode.h` | `WEBP_DECODER_ABI_VERSION` | `0x0209` |
//! | `encode.h` | `WEBP_ENCODER_ABI_VERSION` | `0x020f` |
//! | `demux.h` | `WEBP_DEMUX_ABI_VERSION` | `0x0107` |

#![allow(non_snake_case)]

use std::ffi::{c_int, c_void};

pub const WEBP_DECODER_ABI_VERSION: c_int = 0x0209;
pub const WEBP_ENCODER_ABI_VERSION: c_int = 0x020f;
pub const WEBP_DEMUX_ABI_VERSION: c_int = 0x0107;

/// Oldest library release (`major << 16 | minor << 8 | rev`) whose layouts
/// match the structs below.
pub const MIN_LIBRARY_VERSION: c_int = 0x01_02_00;

// WEBP_CSP_MODE
pub const MODE_RGBA: c_int = 1;
pub const MODE_YUVA: c_int = 12;

// WebPEncCSP
pub const WEBP_YUV420A: c_int = 4;

// WebPPreset
pub const WEBP_PRESET_DEFAULT: c_int = 0;

/// `VP8StatusCode::VP8_STATUS_OK`. The only success value of the status-code
/// entry points.
pub const VP8_STATUS_OK: c_int = 0;

// WebPBitstreamFeatures.format
pub const FORMAT_LOSSLESS: c_int = 2;

// WebPFormatFeature
pub const WEBP_FF_CANVAS_WIDTH: c_int = 1;
pub const WEBP_FF_CANVAS_HEIGHT: c_int = 2;
pub const WEBP_FF_FRAME_COUNT: c_int = 5;

// WebPMuxAnimDispose / WebPMuxAnimBlend
pub const WEBP_MUX_DISPOSE_BACKGROUND: c_int = 1;
pub const WEBP_MUX_NO_BLEND: c_int = 1;

/// Human-readable name of a `VP8StatusCode`.
pub fn status_name(status: c_int) -> &'static str {
    match status {
        0 => "OK",
        1 => "OUT_OF_MEMORY",
        2 => "INVALID_PARAM",
        3 => "BITSTREAM_ERROR",
        4 => "UNSUPPORTED_FEATURE",
        5 => "SUSPENDED",
        6 => "USER_ABORT",
        7 => "NOT_ENOUGH_DATA",
        _ => "UNKNOWN",
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct WebPBitstreamFeatures {
    pub width: c_int,
    pub height: c_int,
    pub has_alpha: c_int,
    pub has_animation: c_int,
    /// 0 = undefined/mixed, 1 = lossy, 2 = lossless.
    pub format: c_int,
    pub pad: [u32; 5],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct WebPRGBABuffer {
    pub rgba: *mut u8,
    pub stride: c_int,
    pub _pad0: u32,
    pub size: usize,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct WebPYUVABuffer {
    pub y: *mut u8,
    pub u: *mut u8,
    pub v: *mut u8,
    pub a: *mut u8,
    pub y_stride: c_int,
    pub u_stride: c_int,
    pub v_stride: c_int,
    pub a_stride: c_int,
    pub y_size: usize,
    pub u_size: usize,
    pub v_size: usize,
    pub a_size: usize,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union WebPDecBufferUnion {
    pub RGBA: WebPRGBABuffer,
    pub YUVA: WebPYUVABuffer,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct WebPDecBuffer {
    pub colorspace: c_int,
    pub width: c_int,
    pub height: c_int,
    pub is_external_memory: c_int,
    pub u: WebPDecBufferUnion,
    pub pad: [u32; 4],
    /// Library-owned allocation behind the planes; released by `WebPFreeDecBuffer`.
    pub private_memory: *mut u8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct WebPDecoderOptions {
    pub bypass_filtering: c_int,
    pub no_fancy_upsampling: c_int,
    pub use_cropping: c_int,
    pub crop_left: c_int,
    pub crop_top: c_int,
    pub crop_width: c_int,
    pub crop_height: c_int,
    pub use_scaling: c_int,
    pub scaled_width: c_int,
    pub scaled_height: c_int,
    pub use_threads: c_int,
    pub dithering_strength: c_int,
    pub flip: c_int,
    pub alpha_dithering_strength: c_int,
    pub pad: [u32; 5],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct WebPDecoderConfig {
    pub input: WebPBitstreamFeatures,
    pub output: WebPDecBuffer,
    pub options: WebPDecoderOptions,
    pub _pad_tail: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct WebPConfig {
    pub lossless: c_int,
    pub quality: f32,
    pub method: c_int,
    pub image_hint: c_int,
    pub target_size: c_int,
    pub target_PSNR: f32,
    pub segments: c_int,
    pub sns_strength: c_int,
    pub filter_strength: c_int,
    pub filter_sharpness: c_int,
    pub filter_type: c_int,
    pub autofilter: c_int,
    pub alpha_compression: c_int,
    pub alpha_filtering: c_int,
    pub alpha_quality: c_int,
    pub pass: c_int,
    pub show_compressed: c_int,
    pub preprocessing: c_int,
    pub partitions: c_int,
    pub partition_limit: c_int,
    pub emulate_jpeg_size: c_int,
    pub thread_level: c_int,
    pub low_memory: c_int,
    pub near_lossless: c_int,
    pub exact: c_int,
    pub use_delta_palette: c_int,
    pub use_sharp_yuv: c_int,
    pub qmin: c_int,
    pub qmax: c_int,
}

pub type WebPWriterFunction =
    unsafe extern "C" fn(data: *const u8, data_size: usize, picture: *const WebPPicture) -> c_int;

pub type WebPProgressHook =
    unsafe extern "C" fn(percent: c_int, picture: *const WebPPicture) -> c_int;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct WebPPicture {
    pub use_argb: c_int,
    pub colorspace: c_int,
    pub width: c_int,
    pub height: c_int,
    pub y: *mut u8,
    pub u: *mut u8,
    pub v: *mut u8,
    pub y_stride: c_int,
    pub uv_stride: c_int,
    pub a: *mut u8,
    pub a_stride: c_int,
    pub pad1: [u32; 2],
    pub _pad_argb: u32,
    pub argb: *mut u32,
    pub argb_stride: c_int,
    pub pad2: [u32; 3],
    pub writer: Option<WebPWriterFunction>,
    pub custom_ptr: *mut c_void,
    pub extra_info_type: c_int,
    pub _pad_extra_info: u32,
    pub extra_info: *mut u8,
    pub stats: *mut c_void,
    pub error_code: c_int,
    pub _pad_progress_hook: u32,
    pub progress_hook: Option<WebPProgressHook>,
    pub user_data: *mut c_void,
    pub pad3: [u32; 3],
    pub _pad_pad4: u32,
    pub pad4: *mut u8,
    pub pad5: *mut u8,
    pub pad6: [u32; 8],
    pub memory_: *mut c_void,
    pub memory_argb_: *mut c_void,
    pub pad7: [*mut c_void; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct WebPMemoryWriter {
    pub mem: *mut u8,
    pub size: usize,
    pub max_size: usize,
    pub pad: [u32; 1],
    pub _pad_tail: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct WebPData {
    pub bytes: *const u8,
    pub size: usize,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct WebPIterator {
    pub frame_num: c_int,
    pub num_frames: c_int,
    pub x_offset: c_int,
    pub y_offset: c_int,
    pub width: c_int,
    pub height: c_int,
    pub duration: c_int,
    pub dispose_method: c_int,
    pub complete: c_int,
    pub _pad_fragment: u32,
    pub fragment: WebPData,
    pub has_alpha: c_int,
    pub blend_method: c_int,
    pub pad: [u32; 2],
    pub private_: *mut c_void,
}

/// Opaque `WebPDemuxer`.
#[repr(C)]
pub struct WebPDemuxer {
    _private: [u8; 0],
}

/// All-zero value of a plain-data ABI struct, the state libwebp's
/// initializers expect to start from.
pub trait Zeroed: Sized {
    fn zeroed() -> Self {
        // SAFETY: implemented only for repr(C) structs of integers, floats,
        // raw pointers and nullable function pointers, for which all-zero
        // bytes is a valid value.
        unsafe { std::mem::zeroed() }
    }
}

impl Zeroed for WebPBitstreamFeatures {}
impl Zeroed for WebPDecoderConfig {}
impl Zeroed for WebPConfig {}
impl Zeroed for WebPPicture {}
impl Zeroed for WebPMemoryWriter {}
impl Zeroed for WebPIterator {}

#[cfg(target_pointer_width = "64")]
const _: () = {
    use std::mem::{offset_of, size_of};
    assert!(size_of::<WebPBitstreamFeatures>() == 40);
    assert!(size_of::<WebPRGBABuffer>() == 24);
    assert!(size_of::<WebPYUVABuffer>() == 80);
    assert!(size_of::<WebPDecBuffer>() == 120);
    assert!(offset_of!(WebPDecBuffer, private_memory) == 112);
    assert!(size_of::<WebPDecoderOptions>() == 76);
    assert!(offset_of!(WebPDecoderConfig, output) == 40);
    assert!(offset_of!(WebPDecoderConfig, options) == 160);
    assert!(size_of::<WebPDecoderConfig>() == 240);
    assert!(size_of::<WebPConfig>() == 116);
    assert!(offset_of!(WebPPicture, a) == 48);
    assert!(offset_of!(WebPPicture, argb) == 72);
    assert!(offset_of!(WebPPicture, writer) == 96);
    assert!(offset_of!(WebPPicture, extra_info) == 120);
    assert!(offset_of!(WebPPicture, error_code) == 136);
    assert!(offset_of!(WebPPicture, progress_hook) == 144);
    assert!(offset_of!(WebPPicture, pad4) == 176);
    assert!(offset_of!(WebPPicture, memory_) == 224);
    assert!(size_of::<WebPPicture>() == 256);
    assert!(size_of::<WebPMemoryWriter>() == 32);
    assert!(size_of::<WebPData>() == 16);
    assert!(offset_of!(WebPIterator, fragment) == 40);
    assert!(offset_of!(WebPIterator, private_) == 72);
    assert!(size_of::<WebPIterator>() == 80);
};
