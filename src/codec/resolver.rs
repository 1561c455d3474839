//! Backend Capability Resolver.
//!
//! Picks the backend once per process and never revisits the choice. The
//! first codec call (or an explicit [`resolved`]) runs [`resolve`] under a
//! `OnceLock`, so concurrent first use runs it exactly once and every
//! thread sees the same [`Resolution`].
//!
//! | `prefer` | libwebp loads | libwebp fails |
//! |---|---|---|
//! | `auto` | native | sandboxed, cause recorded |
//! | `native` | native | every call fails with `BackendUnavailable` |
//! | `sandboxed` | not attempted | not attempted |
//!
//! The configuration comes from [`configure`] when it ran first, otherwise
//! from the defaults plus `WEBPGATE_BACKEND` / `WEBPGATE_MODULE`.

use super::backend::{Backend, BackendKind, CodecError, FrameRequest, FrameSource, StreamInfo};
use super::native::NativeBackend;
use super::native::library::NativeLibrary;
use super::params::EncodeOptions;
use super::pixels::EncoderInput;
use super::sandbox::SandboxBackend;
use super::sandbox::module::ModuleSource;
use crate::config::{self, BackendConfig, CodecConfig, ConfigError, Prefer};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

static CONFIG: OnceLock<CodecConfig> = OnceLock::new();
static RESOLVED: OnceLock<Resolution> = OnceLock::new();

/// Install the process configuration.
///
/// Must run before the first codec call. Fails with
/// [`ConfigError::AlreadyResolved`] once a configuration is in effect,
/// whether installed here or picked up from the environment.
pub fn configure(config: CodecConfig) -> Result<(), ConfigError> {
    config.validate()?;
    if RESOLVED.get().is_some() {
        return Err(ConfigError::AlreadyResolved);
    }
    CONFIG
        .set(config)
        .map_err(|_| ConfigError::AlreadyResolved)
}

/// The process-wide resolution, computed on first call.
pub fn resolved() -> &'static Resolution {
    RESOLVED.get_or_init(|| resolve(effective_config()))
}

fn effective_config() -> &'static CodecConfig {
    CONFIG.get_or_init(|| {
        config::config_from_env().unwrap_or_else(|e| {
            warn!("ignoring environment overrides: {e}");
            CodecConfig::default()
        })
    })
}

/// The outcome of backend selection.
pub struct Resolution {
    backend: Box<dyn Backend>,
    native_error: Option<String>,
    config: CodecConfig,
}

impl Resolution {
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// `Ok` when the native backend is active; otherwise why it is not.
    pub fn native_status(&self) -> Result<(), CodecError> {
        match &self.native_error {
            None => Ok(()),
            Some(cause) => Err(CodecError::BackendUnavailable(cause.clone())),
        }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }
}

/// Select a backend for `config`, loading libwebp from the system.
pub fn resolve(config: &CodecConfig) -> Resolution {
    resolve_with(config, |backend| {
        NativeLibrary::open(
            backend.native_library.as_deref(),
            backend.native_demux_library.as_deref(),
        )
    })
}

/// [`resolve`] with the library loader supplied by the caller.
pub fn resolve_with(
    config: &CodecConfig,
    open_native: impl FnOnce(&BackendConfig) -> Result<NativeLibrary, CodecError>,
) -> Resolution {
    let prefer = config.backend.prefer;
    debug!(%prefer, "resolving codec backend");

    let native = match prefer {
        Prefer::Sandboxed => Err("disabled by configuration (prefer = \"sandboxed\")".to_string()),
        Prefer::Auto | Prefer::Native => open_native(&config.backend).map_err(|e| e.to_string()),
    };

    let (backend, native_error): (Box<dyn Backend>, _) = match native {
        Ok(lib) => {
            let (major, minor, rev) = lib.version();
            info!(backend = "native", "using system libwebp {major}.{minor}.{rev}");
            (
                Box::new(NativeBackend::new(lib, config.decode.use_threads)),
                None,
            )
        }
        Err(cause) if prefer == Prefer::Native => {
            warn!(%cause, "native backend required but unavailable");
            (
                Box::new(UnavailableBackend {
                    cause: cause.clone(),
                }),
                Some(cause),
            )
        }
        Err(cause) => {
            let source = ModuleSource::pick(config.backend.module_path.as_deref());
            match &source {
                Some(s) => info!(
                    backend = "sandboxed",
                    module = %s,
                    %cause,
                    "native libwebp unavailable"
                ),
                None => warn!(%cause, "native libwebp unavailable and no codec module present"),
            }
            (Box::new(SandboxBackend::new(source)), Some(cause))
        }
    };

    Resolution {
        backend,
        native_error,
        config: config.clone(),
    }
}

/// Stands in for the native backend when it was required but did not load.
struct UnavailableBackend {
    cause: String,
}

impl UnavailableBackend {
    fn error(&self) -> CodecError {
        CodecError::BackendUnavailable(self.cause.clone())
    }
}

impl Backend for UnavailableBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn probe(&self, _data: &[u8]) -> Result<StreamInfo, CodecError> {
        Err(self.error())
    }

    fn frames<'a>(
        &'a self,
        _data: &'a [u8],
        _info: &StreamInfo,
        _request: FrameRequest,
    ) -> Result<Box<dyn FrameSource + 'a>, CodecError> {
        Err(self.error())
    }

    fn encode(
        &self,
        _input: &EncoderInput<'_>,
        _options: &EncodeOptions,
    ) -> Result<Vec<u8>, CodecError> {
        Err(self.error())
    }
}
