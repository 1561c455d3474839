//! Dynamic loading of libwebp and libwebpdemux.
//!
//! Both libraries are opened with `libloading`, searched by conventional file
//! name, with optional overrides from the config tried first. The resolved
//! entry points live in a plain table of function pointers, [`WebpApi`], so
//! tests can substitute fake `extern "C"` functions.
//!
//! libwebp does not use one success convention. Each wrapper below turns the
//! raw return value into a `bool` or `Result` and names the convention it
//! follows:
//!
//! | Entry point | Returns | Success |
//! |---|---|---|
//! | `WebPGetFeaturesInternal`, `WebPDecode` | `VP8StatusCode` | `== 0` |
//! | `WebPGetInfo`, `WebPInitDecoderConfigInternal` | `int` | `!= 0` |
//! | `WebPConfigInitInternal`, `WebPValidateConfig` | `int` | `!= 0` |
//! | `WebPPictureInitInternal`, `WebPPictureImportRGBA`, `WebPEncode` | `int` | `!= 0` |
//! | `WebPDemuxGetFrame`, `WebPDemuxNextFrame` | `int` | `!= 0` |
//! | `WebPDecodeRGBA`, `WebPDemuxInternal` | pointer | non-null |

use super::abi::*;
use crate::codec::backend::CodecError;
use libloading::Library;
use std::ffi::{c_int, c_void};

/// Entry points resolved from the two libraries.
#[derive(Clone, Copy)]
pub struct WebpApi {
    pub get_decoder_version: unsafe extern "C" fn() -> c_int,
    pub get_info: unsafe extern "C" fn(*const u8, usize, *mut c_int, *mut c_int) -> c_int,
    pub get_features:
        unsafe extern "C" fn(*const u8, usize, *mut WebPBitstreamFeatures, c_int) -> c_int,
    pub init_decoder_config: unsafe extern "C" fn(*mut WebPDecoderConfig, c_int) -> c_int,
    pub decode: unsafe extern "C" fn(*const u8, usize, *mut WebPDecoderConfig) -> c_int,
    pub free_dec_buffer: unsafe extern "C" fn(*mut WebPDecBuffer),
    pub decode_rgba: unsafe extern "C" fn(*const u8, usize, *mut c_int, *mut c_int) -> *mut u8,
    pub free: unsafe extern "C" fn(*mut c_void),
    pub config_init: unsafe extern "C" fn(*mut WebPConfig, c_int, f32, c_int) -> c_int,
    pub validate_config: unsafe extern "C" fn(*const WebPConfig) -> c_int,
    pub picture_init: unsafe extern "C" fn(*mut WebPPicture, c_int) -> c_int,
    pub picture_import_rgba: unsafe extern "C" fn(*mut WebPPicture, *const u8, c_int) -> c_int,
    pub picture_free: unsafe extern "C" fn(*mut WebPPicture),
    pub encode: unsafe extern "C" fn(*const WebPConfig, *mut WebPPicture) -> c_int,
    pub memory_writer_init: unsafe extern "C" fn(*mut WebPMemoryWriter),
    pub memory_write: WebPWriterFunction,
    pub memory_writer_clear: unsafe extern "C" fn(*mut WebPMemoryWriter),
    pub demux_new:
        unsafe extern "C" fn(*const WebPData, c_int, *mut c_int, c_int) -> *mut WebPDemuxer,
    pub demux_get_i: unsafe extern "C" fn(*const WebPDemuxer, c_int) -> u32,
    pub demux_get_frame:
        unsafe extern "C" fn(*const WebPDemuxer, c_int, *mut WebPIterator) -> c_int,
    pub demux_next_frame: unsafe extern "C" fn(*mut WebPIterator) -> c_int,
    pub demux_release_iterator: unsafe extern "C" fn(*mut WebPIterator),
    pub demux_delete: unsafe extern "C" fn(*mut WebPDemuxer),
}

/// Library search order for the current platform.
pub fn default_candidates() -> (&'static [&'static str], &'static [&'static str]) {
    if cfg!(target_os = "macos") {
        (
            &[
                "libwebp.7.dylib",
                "libwebp.dylib",
                "/opt/homebrew/lib/libwebp.dylib",
                "/usr/local/lib/libwebp.dylib",
            ],
            &[
                "libwebpdemux.2.dylib",
                "libwebpdemux.dylib",
                "/opt/homebrew/lib/libwebpdemux.dylib",
                "/usr/local/lib/libwebpdemux.dylib",
            ],
        )
    } else if cfg!(windows) {
        (&["libwebp.dll", "webp.dll"], &["libwebpdemux.dll", "webpdemux.dll"])
    } else {
        (
            &["libwebp.so.7", "libwebp.so"],
            &["libwebpdemux.so.2", "libwebpdemux.so"],
        )
    }
}

fn open_first(what: &str, candidates: &[&str]) -> Result<Library, CodecError> {
    let mut tried = Vec::with_capacity(candidates.len());
    for name in candidates {
        // SAFETY: loading libwebp runs no initialization code with
        // preconditions on our side.
        match unsafe { Library::new(name) } {
            Ok(lib) => {
                tracing::debug!(library = name, "opened {what}");
                return Ok(lib);
            }
            Err(e) => tried.push(format!("{name}: {e}")),
        }
    }
    Err(CodecError::BackendUnavailable(format!(
        "could not load {what} ({})",
        tried.join("; ")
    )))
}

/// Resolve one entry point.
///
/// # Safety
/// `T` must be the function pointer type matching the C declaration of `name`.
unsafe fn symbol<T: Copy>(lib: &Library, name: &str) -> Result<T, CodecError> {
    let mut cname = Vec::with_capacity(name.len() + 1);
    cname.extend_from_slice(name.as_bytes());
    cname.push(0);
    // SAFETY: forwarded to the caller.
    unsafe { lib.get::<T>(&cname) }
        .map(|sym| *sym)
        .map_err(|e| CodecError::BackendUnavailable(format!("missing symbol {name}: {e}")))
}

/// A loaded library pair and its entry points.
///
/// The function pointers in `api` stay valid while the `Library` handles are
/// held, which is for the lifetime of this value (in practice the process).
pub struct NativeLibrary {
    api: WebpApi,
    _libraries: Option<(Library, Library)>,
}

impl NativeLibrary {
    /// Open libwebp and libwebpdemux, trying `webp_override` /
    /// `demux_override` before the platform defaults.
    pub fn open(
        webp_override: Option<&str>,
        demux_override: Option<&str>,
    ) -> Result<Self, CodecError> {
        let (webp_defaults, demux_defaults) = default_candidates();
        let webp_names: Vec<&str> = webp_override
            .into_iter()
            .chain(webp_defaults.iter().copied())
            .collect();
        let demux_names: Vec<&str> = demux_override
            .into_iter()
            .chain(demux_defaults.iter().copied())
            .collect();

        let webp = open_first("libwebp", &webp_names)?;
        let demux = open_first("libwebpdemux", &demux_names)?;

        // SAFETY: every type below is the fn-pointer form of the matching
        // declaration in decode.h / encode.h / demux.h.
        let api = unsafe {
            WebpApi {
                get_decoder_version: symbol(&webp, "WebPGetDecoderVersion")?,
                get_info: symbol(&webp, "WebPGetInfo")?,
                get_features: symbol(&webp, "WebPGetFeaturesInternal")?,
                init_decoder_config: symbol(&webp, "WebPInitDecoderConfigInternal")?,
                decode: symbol(&webp, "WebPDecode")?,
                free_dec_buffer: symbol(&webp, "WebPFreeDecBuffer")?,
                decode_rgba: symbol(&webp, "WebPDecodeRGBA")?,
                free: symbol(&webp, "WebPFree")?,
                config_init: symbol(&webp, "WebPConfigInitInternal")?,
                validate_config: symbol(&webp, "WebPValidateConfig")?,
                picture_init: symbol(&webp, "WebPPictureInitInternal")?,
                picture_import_rgba: symbol(&webp, "WebPPictureImportRGBA")?,
                picture_free: symbol(&webp, "WebPPictureFree")?,
                encode: symbol(&webp, "WebPEncode")?,
                memory_writer_init: symbol(&webp, "WebPMemoryWriterInit")?,
                memory_write: symbol(&webp, "WebPMemoryWrite")?,
                memory_writer_clear: symbol(&webp, "WebPMemoryWriterClear")?,
                demux_new: symbol(&demux, "WebPDemuxInternal")?,
                demux_get_i: symbol(&demux, "WebPDemuxGetI")?,
                demux_get_frame: symbol(&demux, "WebPDemuxGetFrame")?,
                demux_next_frame: symbol(&demux, "WebPDemuxNextFrame")?,
                demux_release_iterator: symbol(&demux, "WebPDemuxReleaseIterator")?,
                demux_delete: symbol(&demux, "WebPDemuxDelete")?,
            }
        };

        let lib = Self {
            api,
            _libraries: Some((webp, demux)),
        };
        lib.check_version()?;
        Ok(lib)
    }

    /// Wrap an already-resolved table (no library handles to keep alive).
    #[cfg(test)]
    pub(crate) fn from_api(api: WebpApi) -> Self {
        Self {
            api,
            _libraries: None,
        }
    }

    pub fn api(&self) -> &WebpApi {
        &self.api
    }

    /// `major.minor.revision` of the loaded decoder.
    pub fn version(&self) -> (u8, u8, u8) {
        // SAFETY: no arguments, returns a plain int.
        let v = unsafe { (self.api.get_decoder_version)() };
        ((v >> 16) as u8, (v >> 8) as u8, v as u8)
    }

    fn check_version(&self) -> Result<(), CodecError> {
        // SAFETY: no arguments, returns a plain int.
        let v = unsafe { (self.api.get_decoder_version)() };
        if v < MIN_LIBRARY_VERSION {
            return Err(CodecError::BackendUnavailable(format!(
                "libwebp {}.{}.{} is older than the supported {}.{}.{}",
                (v >> 16) & 0xff,
                (v >> 8) & 0xff,
                v & 0xff,
                (MIN_LIBRARY_VERSION >> 16) & 0xff,
                (MIN_LIBRARY_VERSION >> 8) & 0xff,
                MIN_LIBRARY_VERSION & 0xff,
            )));
        }
        Ok(())
    }
}

fn len_as_int(len: usize, what: &str) -> Result<c_int, CodecError> {
    c_int::try_from(len).map_err(|_| CodecError::InvalidInput(format!("{what} too large")))
}

/// Normalized wrappers. Each one is `unsafe`-free for the caller except where
/// the raw pointers it receives must be valid for the call.
impl WebpApi {
    /// `WebPGetInfo`: non-zero is success.
    pub fn info(&self, data: &[u8]) -> Option<(u32, u32)> {
        let (mut w, mut h) = (0, 0);
        // SAFETY: data is a valid slice; w/h are valid out-pointers.
        let ok = unsafe { (self.get_info)(data.as_ptr(), data.len(), &mut w, &mut h) };
        (ok != 0).then_some((w as u32, h as u32))
    }

    /// `WebPGetFeaturesInternal`: `VP8_STATUS_OK` (0) is success; any other
    /// value is the failing status code.
    pub fn features(&self, data: &[u8]) -> Result<WebPBitstreamFeatures, c_int> {
        let mut features = WebPBitstreamFeatures::zeroed();
        // SAFETY: data is a valid slice; features is a valid out-pointer.
        let status = unsafe {
            (self.get_features)(
                data.as_ptr(),
                data.len(),
                &mut features,
                WEBP_DECODER_ABI_VERSION,
            )
        };
        if status == VP8_STATUS_OK {
            Ok(features)
        } else {
            Err(status)
        }
    }

    /// `WebPInitDecoderConfigInternal`: non-zero is success, zero means the
    /// library rejected our ABI version.
    pub fn decoder_config(&self) -> Option<WebPDecoderConfig> {
        let mut config = WebPDecoderConfig::zeroed();
        // SAFETY: config is a valid, writable struct of the declared layout.
        let ok = unsafe { (self.init_decoder_config)(&mut config, WEBP_DECODER_ABI_VERSION) };
        (ok != 0).then_some(config)
    }

    /// `WebPDecode`: `VP8_STATUS_OK` (0) is success.
    ///
    /// The output buffer in `config` may hold library memory afterwards,
    /// whatever the status; release it with `WebPFreeDecBuffer`.
    pub fn decode_into(&self, data: &[u8], config: &mut WebPDecoderConfig) -> Result<(), c_int> {
        // SAFETY: data is a valid slice; config was initialized by
        // `decoder_config`.
        let status = unsafe { (self.decode)(data.as_ptr(), data.len(), config) };
        if status == VP8_STATUS_OK {
            Ok(())
        } else {
            Err(status)
        }
    }

    /// `WebPConfigInitInternal`: non-zero is success.
    pub fn encoder_config(&self, quality: f32) -> Option<WebPConfig> {
        let mut config = WebPConfig::zeroed();
        // SAFETY: config is a valid, writable struct of the declared layout.
        let ok = unsafe {
            (self.config_init)(
                &mut config,
                WEBP_PRESET_DEFAULT,
                quality,
                WEBP_ENCODER_ABI_VERSION,
            )
        };
        (ok != 0).then_some(config)
    }

    /// `WebPValidateConfig`: non-zero means the config is valid.
    pub fn is_valid(&self, config: &WebPConfig) -> bool {
        // SAFETY: config is a valid struct of the declared layout.
        unsafe { (self.validate_config)(config) != 0 }
    }

    /// `WebPPictureInitInternal`: non-zero is success.
    pub fn picture(&self) -> Option<WebPPicture> {
        let mut picture = WebPPicture::zeroed();
        // SAFETY: picture is a valid, writable struct of the declared layout.
        let ok = unsafe { (self.picture_init)(&mut picture, WEBP_ENCODER_ABI_VERSION) };
        (ok != 0).then_some(picture)
    }

    /// `WebPPictureImportRGBA`: non-zero is success. The picture then owns a
    /// library allocation released by `WebPPictureFree`.
    pub fn import_rgba(
        &self,
        picture: &mut WebPPicture,
        rgba: &[u8],
        stride: usize,
    ) -> Result<bool, CodecError> {
        let stride_int = len_as_int(stride, "row stride")?;
        let needed = stride * picture.height.max(0) as usize;
        if rgba.len() < needed {
            return Err(CodecError::InvalidInput(format!(
                "RGBA buffer holds {} bytes, expected {needed}",
                rgba.len()
            )));
        }
        // SAFETY: rgba spans height rows of `stride` bytes; picture was
        // initialized and has width/height set.
        Ok(unsafe { (self.picture_import_rgba)(picture, rgba.as_ptr(), stride_int) != 0 })
    }

    /// `WebPEncode`: non-zero is success; on failure `picture.error_code`
    /// holds the reason.
    ///
    /// # Safety
    /// Every plane pointer in `picture` must be valid for the picture size,
    /// and its writer/custom_ptr pair must be usable for the whole call.
    pub unsafe fn encode_picture(&self, config: &WebPConfig, picture: &mut WebPPicture) -> bool {
        // SAFETY: forwarded to the caller.
        unsafe { (self.encode)(config, picture) != 0 }
    }

    /// `WebPDemuxInternal`: non-null is success. Partial input is refused.
    ///
    /// # Safety
    /// The bytes behind `data` must outlive the returned demuxer.
    pub unsafe fn demux(&self, data: &[u8]) -> *mut WebPDemuxer {
        let wrapped = WebPData {
            bytes: data.as_ptr(),
            size: data.len(),
        };
        // SAFETY: wrapped is only read during the call; the byte lifetime is
        // the caller's obligation.
        unsafe { (self.demux_new)(&wrapped, 0, std::ptr::null_mut(), WEBP_DEMUX_ABI_VERSION) }
    }

    /// `WebPDemuxGetI`: plain value, no failure signal.
    ///
    /// # Safety
    /// `demux` must be a live demuxer.
    pub unsafe fn demux_value(&self, demux: *const WebPDemuxer, feature: c_int) -> u32 {
        // SAFETY: forwarded to the caller.
        unsafe { (self.demux_get_i)(demux, feature) }
    }

    /// `WebPDemuxGetFrame`: non-zero is success. Frames are 1-based.
    ///
    /// # Safety
    /// `demux` must be a live demuxer.
    pub unsafe fn first_frame(&self, demux: *const WebPDemuxer, iter: &mut WebPIterator) -> bool {
        // SAFETY: forwarded to the caller; iter is a valid out-pointer.
        unsafe { (self.demux_get_frame)(demux, 1, iter) != 0 }
    }

    /// `WebPDemuxNextFrame`: non-zero means the iterator moved; zero means
    /// there is no further frame.
    ///
    /// # Safety
    /// `iter` must have been filled by `first_frame` and its demuxer must be live.
    pub unsafe fn advance(&self, iter: &mut WebPIterator) -> bool {
        // SAFETY: forwarded to the caller.
        unsafe { (self.demux_next_frame)(iter) != 0 }
    }
}
