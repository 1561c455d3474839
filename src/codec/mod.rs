//! WebP codec core: two interchangeable backends behind one trait.
//!
//! | Operation | Native | Sandboxed |
//! |---|---|---|
//! | **Probe** | `WebPGetFeatures` + demux | guest `decode`, header-only |
//! | **Decode still** | `WebPDecode` (RGBA or YUVA) | guest `decode` |
//! | **Decode animation** | demux iterator + [`compose`] | guest `decode`, all frames |
//! | **Encode** | `WebPEncode` + memory writer | guest `encode` |
//!
//! The module is split into:
//! - **Pure helpers**: [`probe`] (header parsing), [`params`] (clamped encoder
//!   parameters), [`pixels`] (layout adapter), [`compose`] (animation canvas)
//! - **Backend**: [`Backend`] trait + [`native::NativeBackend`] and
//!   [`sandbox::SandboxBackend`]
//! - **Selection**: [`resolver`] picks one backend per process
//! - **Orchestration**: [`sequencer`] drives a backend through a decode or encode

pub mod backend;
pub mod compose;
pub mod native;
pub mod params;
pub mod pixels;
pub mod probe;
pub mod resolver;
pub mod sandbox;
pub mod sequencer;

pub use backend::{Backend, BackendKind, CodecError, FrameRequest, StreamInfo};
pub use params::{EncodeOptions, Method, Quality};
pub use pixels::{EncodeSource, PixelImage, Yuva420Image};
pub use probe::{MAX_HEADER_SIZE, is_webp};
pub use sequencer::Sequencer;
