//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Info
//!
//! ```text
//! photo.webp
//!     Size: 512x512
//!     Color model: RGBA
//!     Frames: 17 (1.7s total)
//!     Backend: native
//! ```
//!
//! ## Backend
//!
//! ```text
//! Backend: sandboxed
//!     Preference: auto
//!     Native: unavailable (backend unavailable: no libwebp found, tried libwebp.so.7, ...)
//!     Module: embedded
//! ```
//!
//! ## Encode / Decode
//!
//! ```text
//! photo.png → photo.webp (48.2 KB)
//! anim.webp → anim-000.png, anim-001.png, ... (17 frames)
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::codec::BackendKind;
use crate::config::CodecConfig;
use crate::types::{ColorModel, ImageConfig};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// What `webpgate info` reports about one file.
#[derive(Debug, Clone, Serialize)]
pub struct InfoReport {
    pub file: PathBuf,
    pub width: u32,
    pub height: u32,
    pub color_model: ColorModel,
    pub frames: usize,
    /// Sum of frame delays in milliseconds.
    pub duration_ms: u64,
    pub backend: BackendKind,
}

impl InfoReport {
    pub fn new(
        file: &Path,
        config: &ImageConfig,
        delays: &[u32],
        backend: BackendKind,
    ) -> Self {
        Self {
            file: file.to_path_buf(),
            width: config.width,
            height: config.height,
            color_model: config.color_model,
            frames: delays.len(),
            duration_ms: delays.iter().map(|&d| d as u64).sum(),
            backend,
        }
    }
}

fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Human-readable byte count: `512 B`, `48.2 KB`, `3.1 MB`.
fn format_bytes(bytes: usize) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{bytes} B")
    } else if b < KB * KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{:.1} MB", b / (KB * KB))
    }
}

fn format_duration_ms(ms: u64) -> String {
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}

pub fn format_info(report: &InfoReport) -> Vec<String> {
    let mut lines = vec![report.file.display().to_string()];
    lines.push(format!("{}Size: {}x{}", indent(1), report.width, report.height));
    lines.push(format!("{}Color model: {}", indent(1), report.color_model));
    if report.frames > 1 {
        lines.push(format!(
            "{}Frames: {} ({} total)",
            indent(1),
            report.frames,
            format_duration_ms(report.duration_ms)
        ));
    } else {
        lines.push(format!("{}Frames: 1", indent(1)));
    }
    lines.push(format!("{}Backend: {}", indent(1), report.backend));
    lines
}

pub fn format_info_json(report: &InfoReport) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

pub fn print_info(report: &InfoReport) {
    for line in format_info(report) {
        println!("{}", line);
    }
}

/// `native_error` is `None` when the native backend loaded.
pub fn format_backend_status(
    kind: BackendKind,
    native_error: Option<&str>,
    config: &CodecConfig,
    module: Option<&str>,
) -> Vec<String> {
    let mut lines = vec![format!("Backend: {kind}")];
    lines.push(format!("{}Preference: {}", indent(1), config.backend.prefer));
    match native_error {
        None => lines.push(format!("{}Native: loaded", indent(1))),
        Some(cause) => lines.push(format!("{}Native: unavailable ({cause})", indent(1))),
    }
    match module {
        Some(source) => lines.push(format!("{}Module: {source}", indent(1))),
        None => {
            lines.push(format!("{}Module: none", indent(1)));
            lines.push(format!(
                "{}Build lib/webp.wasm.gz with lib/build-module.sh and rebuild, or set \
                 backend.module_path / WEBPGATE_MODULE",
                indent(2)
            ));
            if kind == BackendKind::Sandboxed {
                lines.push(format!(
                    "{}Every codec call will fail with BackendUnavailable",
                    indent(2)
                ));
            }
        }
    }
    lines
}

pub fn print_backend_status(
    kind: BackendKind,
    native_error: Option<&str>,
    config: &CodecConfig,
    module: Option<&str>,
) {
    for line in format_backend_status(kind, native_error, config, module) {
        println!("{}", line);
    }
}

pub fn format_encoded(input: &Path, output: &Path, bytes: usize) -> String {
    format!(
        "{} → {} ({})",
        input.display(),
        output.display(),
        format_bytes(bytes)
    )
}

pub fn format_decoded(input: &Path, outputs: &[PathBuf]) -> String {
    match outputs {
        [] => format!("{} → nothing written", input.display()),
        [one] => format!("{} → {}", input.display(), one.display()),
        [first, second, ..] => format!(
            "{} → {}, {}, ... ({} frames)",
            input.display(),
            first.display(),
            second.display(),
            outputs.len()
        ),
    }
}

pub fn format_failure(input: &Path, error: &dyn std::fmt::Display) -> String {
    format!("{}: {}", input.display(), error)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(frames: usize, delay: u32) -> InfoReport {
        let delays = vec![delay; frames];
        InfoReport::new(
            Path::new("a.webp"),
            &ImageConfig {
                width: 512,
                height: 256,
                color_model: ColorModel::Rgba,
            },
            &delays,
            BackendKind::Native,
        )
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn format_duration_units() {
        assert_eq!(format_duration_ms(40), "40ms");
        assert_eq!(format_duration_ms(1700), "1.7s");
    }

    #[test]
    fn info_report_sums_delays() {
        let r = report(17, 100);
        assert_eq!(r.frames, 17);
        assert_eq!(r.duration_ms, 1700);
    }

    #[test]
    fn format_info_still() {
        let lines = format_info(&report(1, 0));
        assert_eq!(
            lines,
            vec![
                "a.webp",
                "    Size: 512x256",
                "    Color model: RGBA",
                "    Frames: 1",
                "    Backend: native",
            ]
        );
    }

    #[test]
    fn format_info_animated() {
        let lines = format_info(&report(17, 100));
        assert_eq!(lines[3], "    Frames: 17 (1.7s total)");
    }

    #[test]
    fn format_info_json_fields() {
        let json = format_info_json(&report(2, 50)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["width"], 512);
        assert_eq!(value["color_model"], "rgba");
        assert_eq!(value["backend"], "native");
        assert_eq!(value["duration_ms"], 100);
    }

    #[test]
    fn format_backend_status_native() {
        let lines = format_backend_status(
            BackendKind::Native,
            None,
            &CodecConfig::default(),
            Some("embedded"),
        );
        assert_eq!(
            lines,
            vec![
                "Backend: native",
                "    Preference: auto",
                "    Native: loaded",
                "    Module: embedded",
            ]
        );
    }

    #[test]
    fn format_backend_status_explains_a_missing_module() {
        let lines =
            format_backend_status(BackendKind::Native, None, &CodecConfig::default(), None);
        assert_eq!(lines[3], "    Module: none");
        assert!(lines[4].contains("lib/build-module.sh"));
        assert_eq!(lines.len(), 5);

        let lines = format_backend_status(
            BackendKind::Sandboxed,
            Some("no libwebp"),
            &CodecConfig::default(),
            None,
        );
        assert!(lines.last().unwrap().contains("BackendUnavailable"));
    }

    #[test]
    fn format_backend_status_sandboxed_shows_cause_and_module() {
        let lines = format_backend_status(
            BackendKind::Sandboxed,
            Some("no libwebp"),
            &CodecConfig::default(),
            Some("embedded"),
        );
        assert_eq!(lines[2], "    Native: unavailable (no libwebp)");
        assert_eq!(lines[3], "    Module: embedded");
    }

    #[test]
    fn format_decoded_variants() {
        let input = Path::new("anim.webp");
        assert_eq!(format_decoded(input, &[]), "anim.webp → nothing written");
        assert_eq!(
            format_decoded(input, &[PathBuf::from("a.png")]),
            "anim.webp → a.png"
        );
        let many: Vec<PathBuf> = (0..3).map(|i| PathBuf::from(format!("f{i}.png"))).collect();
        assert_eq!(
            format_decoded(input, &many),
            "anim.webp → f0.png, f1.png, ... (3 frames)"
        );
    }

    #[test]
    fn format_encoded_line() {
        assert_eq!(
            format_encoded(Path::new("a.png"), Path::new("a.webp"), 2048),
            "a.png → a.webp (2.0 KB)"
        );
    }
}
