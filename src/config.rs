//! Codec configuration.
//!
//! Handles loading and validating `webpgate.toml` files. Every section and
//! key carries a serde default, so a sparse file deserializes directly.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [backend]
//! prefer = "auto"                  # "auto", "native" or "sandboxed"
//! # native_library = "libwebp.so.7"
//! # native_demux_library = "libwebpdemux.so.2"
//! # module_path = "/opt/webpgate/webp.wasm.gz"
//!
//! [decode]
//! use_threads = true
//! max_dimension = 16383
//!
//! [encode]
//! quality = 75
//! method = 4
//! lossless = false
//! exact = false
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse. Override just the values you want:
//!
//! ```toml
//! [backend]
//! prefer = "sandboxed"
//! ```
//!
//! Unknown keys are rejected to catch typos early.
//!
//! ## Environment
//!
//! When no config was installed with [`crate::configure`], the resolver
//! starts from the defaults and applies `WEBPGATE_BACKEND` and
//! `WEBPGATE_MODULE` (see [`apply_env`]).

use crate::codec::params::{EncodeOptions, Method, Quality};
use crate::codec::pixels::MAX_DIMENSION;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the config file the CLI looks for in the working directory.
pub const CONFIG_FILE_NAME: &str = "webpgate.toml";

pub const ENV_BACKEND: &str = "WEBPGATE_BACKEND";
pub const ENV_MODULE: &str = "WEBPGATE_MODULE";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("backend already resolved; configure() must run before the first codec call")]
    AlreadyResolved,
}

/// Codec configuration loaded from `webpgate.toml`.
///
/// All fields have defaults. User config files need only specify the values
/// they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodecConfig {
    /// Backend selection and library/module locations.
    pub backend: BackendConfig,
    /// Decoder limits and threading.
    pub decode: DecodeConfig,
    /// Default encoder parameters (used by the CLI).
    pub encode: EncodeConfig,
}

/// Which backend to resolve to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Prefer {
    /// Native when libwebp loads, otherwise sandboxed.
    #[default]
    Auto,
    /// Native only; a load failure makes every call fail.
    Native,
    /// Never attempt to load libwebp.
    Sandboxed,
}

impl std::str::FromStr for Prefer {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Prefer::Auto),
            "native" => Ok(Prefer::Native),
            "sandboxed" | "sandbox" | "wasm" => Ok(Prefer::Sandboxed),
            other => Err(ConfigError::Validation(format!(
                "unknown backend preference {other:?} (expected auto, native or sandboxed)"
            ))),
        }
    }
}

impl std::fmt::Display for Prefer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Prefer::Auto => write!(f, "auto"),
            Prefer::Native => write!(f, "native"),
            Prefer::Sandboxed => write!(f, "sandboxed"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendConfig {
    pub prefer: Prefer,
    /// Library name or path tried before the platform defaults.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_library: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_demux_library: Option<String>,
    /// External module (gzip'd or raw wasm). Takes precedence over the
    /// embedded one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecodeConfig {
    /// Let the native decoder use its internal worker threads.
    pub use_threads: bool,
    /// Largest width or height accepted before decoding.
    pub max_dimension: u32,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            use_threads: true,
            max_dimension: MAX_DIMENSION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncodeConfig {
    pub quality: u32,
    pub method: u32,
    pub lossless: bool,
    pub exact: bool,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        let defaults = EncodeOptions::default();
        Self {
            quality: defaults.quality.value() as u32,
            method: defaults.method.value() as u32,
            lossless: defaults.lossless,
            exact: defaults.exact,
        }
    }
}

impl EncodeConfig {
    pub fn options(&self) -> EncodeOptions {
        EncodeOptions {
            quality: Quality::new(self.quality as i32),
            method: Method::new(self.method as i32),
            lossless: self.lossless,
            exact: self.exact,
        }
    }
}

impl CodecConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.decode.max_dimension == 0 || self.decode.max_dimension > MAX_DIMENSION {
            return Err(ConfigError::Validation(format!(
                "decode.max_dimension must be 1-{MAX_DIMENSION}"
            )));
        }
        if self.encode.quality > 100 {
            return Err(ConfigError::Validation(
                "encode.quality must be 0-100".into(),
            ));
        }
        if self.encode.method > 6 {
            return Err(ConfigError::Validation("encode.method must be 0-6".into()));
        }
        if let Some(name) = &self.backend.native_library
            && name.trim().is_empty()
        {
            return Err(ConfigError::Validation(
                "backend.native_library must not be empty".into(),
            ));
        }
        if let Some(name) = &self.backend.native_demux_library
            && name.trim().is_empty()
        {
            return Err(ConfigError::Validation(
                "backend.native_demux_library must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Apply `WEBPGATE_BACKEND` / `WEBPGATE_MODULE` from `lookup`.
///
/// `lookup` is `std::env::var` in production; tests pass a closure.
pub fn apply_env(
    mut config: CodecConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<CodecConfig, ConfigError> {
    if let Some(value) = lookup(ENV_BACKEND).filter(|v| !v.trim().is_empty()) {
        config.backend.prefer = value.parse()?;
    }
    if let Some(value) = lookup(ENV_MODULE).filter(|v| !v.trim().is_empty()) {
        config.backend.module_path = Some(PathBuf::from(value));
    }
    Ok(config)
}

/// Defaults plus the process environment.
pub fn config_from_env() -> Result<CodecConfig, ConfigError> {
    apply_env(CodecConfig::default(), |key| std::env::var(key).ok())
}

/// Parse and validate `webpgate.toml` text. Absent keys keep their defaults.
pub fn parse_config(content: &str) -> Result<CodecConfig, ConfigError> {
    let config: CodecConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Load config from the file at `path`. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<CodecConfig, ConfigError> {
    if !path.exists() {
        return Ok(CodecConfig::default());
    }
    parse_config(&fs::read_to_string(path)?)
}

/// Returns a fully-commented stock `webpgate.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# webpgate Configuration
# =====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# The CLI reads ./webpgate.toml, or the file given with --config.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Backend selection
# ---------------------------------------------------------------------------
[backend]
# "auto"      - use the system libwebp when it loads, else the sandboxed module
# "native"    - system libwebp only; calls fail if it cannot be loaded
# "sandboxed" - never load libwebp; always use the sandboxed module
# Overridden by the WEBPGATE_BACKEND environment variable when no config
# is installed programmatically.
prefer = "auto"

# Library names or paths tried before the platform defaults.
# native_library = "libwebp.so.7"
# native_demux_library = "libwebpdemux.so.2"

# External codec module (gzip'd or raw .wasm). Takes precedence over the
# module embedded at build time. Also settable via WEBPGATE_MODULE.
# module_path = "/opt/webpgate/webp.wasm.gz"

# ---------------------------------------------------------------------------
# Decoding
# ---------------------------------------------------------------------------
[decode]
# Let the native decoder use its internal worker threads.
use_threads = true

# Largest width or height accepted (the format's own limit is 16383).
max_dimension = 16383

# ---------------------------------------------------------------------------
# Encoding defaults (CLI encode command)
# ---------------------------------------------------------------------------
[encode]
# Lossy quality, 1-100. 0 selects the default (75).
quality = 75

# Speed/size tradeoff, 0 (fast) to 6 (slow, smaller).
method = 4

# Lossless compression.
lossless = false

# Keep RGB values under fully transparent pixels.
exact = false
"##
}
