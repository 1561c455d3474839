//! Encoder parameter types.
//!
//! These are value objects that describe *how* a picture should be encoded.
//! Both backends receive the same [`EncodeOptions`], already normalized, so
//! clamping happens exactly once at construction time.
//!
//! ## Types
//!
//! - [`Quality`]: lossy quality (1–100, default 75). Values `<= 0` select the
//!   default, values above 100 saturate at 100.
//! - [`Method`]: speed/size tradeoff (0 = fastest, 6 = slowest/smallest,
//!   default 4). Anything outside `0..=6` selects the default.
//! - [`EncodeOptions`]: quality + method + lossless + exact-alpha flags.

use serde::{Deserialize, Serialize};

/// Quality used when none (or a non-positive value) is given.
pub const DEFAULT_QUALITY: u8 = 75;

/// Method used when none (or an out-of-range value) is given.
pub const DEFAULT_METHOD: u8 = 4;

/// Lossy encoding quality (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quality(u8);

impl Quality {
    pub fn new(value: i32) -> Self {
        if value <= 0 {
            Self(DEFAULT_QUALITY)
        } else {
            Self(value.min(100) as u8)
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(DEFAULT_QUALITY)
    }
}

/// Compression method: 0 (fast) to 6 (slower, better).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Method(u8);

impl Method {
    pub fn new(value: i32) -> Self {
        match u8::try_from(value) {
            Ok(m) if m <= 6 => Self(m),
            _ => Self(DEFAULT_METHOD),
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Method {
    fn default() -> Self {
        Self(DEFAULT_METHOD)
    }
}

/// Encoding parameters shared by both backends.
///
/// `lossless` ignores `quality` for pixel fidelity (the codec still uses it as
/// an effort hint). `exact` keeps the RGB values under fully transparent
/// pixels instead of letting the encoder flatten them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeOptions {
    pub quality: Quality,
    pub method: Method,
    pub lossless: bool,
    pub exact: bool,
}

impl EncodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lossless preset with exact alpha, the combination that round-trips.
    pub fn lossless() -> Self {
        Self {
            lossless: true,
            exact: true,
            ..Self::default()
        }
    }

    pub fn with_quality(mut self, quality: i32) -> Self {
        self.quality = Quality::new(quality);
        self
    }

    pub fn with_method(mut self, method: i32) -> Self {
        self.method = Method::new(method);
        self
    }

    pub fn with_lossless(mut self, lossless: bool) -> Self {
        self.lossless = lossless;
        self
    }

    pub fn with_exact(mut self, exact: bool) -> Self {
        self.exact = exact;
        self
    }
}
