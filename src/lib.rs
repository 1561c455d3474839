//! # webpgate
//!
//! WebP decode and encode through one API, served by whichever of two
//! backends is available: the system libwebp loaded at runtime, or libwebp
//! compiled to WebAssembly and run in a wasmtime sandbox.
//!
//! ```no_run
//! let data = std::fs::read("photo.webp")?;
//! let config = webpgate::probe_config(&data)?;
//! let first = webpgate::decode(&data)?;
//! assert_eq!(first.dimensions(), (config.width, config.height));
//!
//! let again = webpgate::encode(&first, &webpgate::EncodeOptions::lossless())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! public call ─▶ resolver ─▶ Backend (native | sandboxed) ─▶ sequencer ─▶ pixels
//! ```
//!
//! Every entry point asks the [resolver](codec::resolver) for the process's
//! backend, hands it to a [`Sequencer`](codec::Sequencer), and returns the
//! frames through the pixel layout adapter.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`codec::probe`] | Header prober: dimensions from the first 32 bytes |
//! | [`codec::resolver`] | Picks the backend once per process and remembers why |
//! | [`codec::native`] | libwebp via `libloading`: ABI structs, symbol table, RAII guards |
//! | [`codec::sandbox`] | libwebp in wasmtime: guest allocations, decode/encode protocol |
//! | [`codec::sequencer`] | Frame sequencing state machine shared by both backends |
//! | [`codec::pixels`] | Packed RGBA and planar YUVA 4:2:0 images, encoder input selection |
//! | [`codec::compose`] | Animation canvas: frame offsets, disposal, alpha blending |
//! | [`config`] | `webpgate.toml` loading, merging, validation |
//! | [`types`] | `ImageConfig`, `ColorModel`, `DecodedImageSet` |
//! | [`output`] | CLI output formatting |
//!
//! # Backend Selection
//!
//! The first call resolves the backend and the choice holds for the rest of
//! the process. With the default `prefer = "auto"`, libwebp and libwebpdemux
//! are looked up with the platform's library search rules; if either is
//! missing, the sandboxed module is used and [`native_status`] reports why.
//! Call [`configure`] before anything else to change the preference or the
//! library/module locations.
//!
//! # Color Models
//!
//! Still lossy images decode to [`Yuva420Image`], the codec's native layout,
//! so no conversion happens unless the caller asks for RGBA. Lossless and
//! animated images decode to packed RGBA, so lossless round trips are pixel
//! exact and [`decode`] always matches the first frame of [`decode_all`].

pub mod codec;
pub mod config;
pub mod output;
pub mod types;

pub use codec::{
    BackendKind, CodecError, EncodeOptions, EncodeSource, Method, PixelImage, Quality,
    Yuva420Image, is_webp,
};
pub use config::{CodecConfig, ConfigError};
pub use types::{ColorModel, DecodedImageSet, ImageConfig};

use codec::backend::FrameRequest;
use codec::probe::{self, CHUNK_SCAN_LIMIT, MAX_HEADER_SIZE};
use codec::resolver;
use codec::sequencer::Sequencer;
use std::io::{Read, Write};

fn sequencer() -> Sequencer<'static> {
    let resolution = resolver::resolved();
    Sequencer::new(
        resolution.backend(),
        resolution.config().decode.max_dimension,
    )
}

/// Install the process configuration. Must run before the first codec call.
pub fn configure(config: CodecConfig) -> Result<(), ConfigError> {
    resolver::configure(config)
}

/// Why the native backend is not in use, if it is not.
pub fn native_status() -> Result<(), CodecError> {
    resolver::resolved().native_status()
}

/// The backend serving codec calls in this process.
pub fn active_backend() -> BackendKind {
    resolver::resolved().kind()
}

/// Width, height and color model, read from the header alone.
#[tracing::instrument(skip(data), fields(len = data.len()))]
pub fn probe_config(data: &[u8]) -> Result<ImageConfig, CodecError> {
    sequencer().probe_config(data)
}

/// Decode the first frame.
#[tracing::instrument(skip(data), fields(len = data.len()))]
pub fn decode(data: &[u8]) -> Result<PixelImage, CodecError> {
    sequencer()
        .decode(data, FrameRequest::First)?
        .into_first()
        .ok_or_else(|| CodecError::DecodeFailed("no frame decoded".into()))
}

/// Decode every frame with its delay.
#[tracing::instrument(skip(data), fields(len = data.len()))]
pub fn decode_all(data: &[u8]) -> Result<DecodedImageSet, CodecError> {
    sequencer().decode(data, FrameRequest::All)
}

/// Encode one picture into a WebP file.
///
/// Packed RGBA and planar YUVA 4:2:0 sources are passed to the encoder as
/// they are; any other [`image::DynamicImage`] is converted to RGBA first.
#[tracing::instrument(skip_all)]
pub fn encode<'a>(
    image: impl Into<EncodeSource<'a>>,
    options: &EncodeOptions,
) -> Result<Vec<u8>, CodecError> {
    sequencer().encode(image.into(), options)
}

/// [`encode`], writing the file to `writer`.
pub fn encode_to_writer<'a>(
    mut writer: impl Write,
    image: impl Into<EncodeSource<'a>>,
    options: &EncodeOptions,
) -> Result<(), CodecError> {
    let bytes = encode(image, options)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// [`probe_config`] reading only the header prefix from `reader`.
///
/// Simple files need [`MAX_HEADER_SIZE`] bytes. Extended files are read
/// further, up to [`CHUNK_SCAN_LIMIT`], to find the image bitstream.
pub fn probe_config_reader(mut reader: impl Read) -> Result<ImageConfig, CodecError> {
    let mut prefix = Vec::with_capacity(MAX_HEADER_SIZE);
    reader
        .by_ref()
        .take(MAX_HEADER_SIZE as u64)
        .read_to_end(&mut prefix)?;
    if probe::is_extended(&prefix) {
        reader
            .take((CHUNK_SCAN_LIMIT - MAX_HEADER_SIZE) as u64)
            .read_to_end(&mut prefix)?;
    }
    probe_config(&prefix)
}

/// [`decode`] reading the whole stream from `reader`.
pub fn decode_reader(mut reader: impl Read) -> Result<PixelImage, CodecError> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    decode(&data)
}

/// [`decode_all`] reading the whole stream from `reader`.
pub fn decode_all_reader(mut reader: impl Read) -> Result<DecodedImageSet, CodecError> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    decode_all(&data)
}

#[cfg(test)]
pub(crate) mod test_helpers;
