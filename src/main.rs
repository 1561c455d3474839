use clap::{Parser, Subcommand};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use webpgate::codec::resolver;
use webpgate::codec::sandbox::module::ModuleSource;
use webpgate::config::{self, CodecConfig};
use webpgate::output::{self, InfoReport};

fn version_string() -> &'static str {
    let hash = env!("GIT_HASH");
    if hash.is_empty() {
        env!("CARGO_PKG_VERSION")
    } else {
        // Leaked once at startup, called exactly once
        Box::leak(format!("{}+{hash}", env!("CARGO_PKG_VERSION")).into_boxed_str())
    }
}

#[derive(Parser)]
#[command(name = "webpgate")]
#[command(about = "Decode and encode WebP with system libwebp or a sandboxed fallback")]
#[command(long_about = "\
Decode and encode WebP with system libwebp or a sandboxed fallback

The system libwebp and libwebpdemux are loaded at runtime when present.
Otherwise libwebp compiled to WebAssembly runs inside wasmtime.

Backend selection:
  --config file / ./webpgate.toml   [backend] prefer = auto | native | sandboxed
  WEBPGATE_BACKEND                  same values, overrides the config file
  WEBPGATE_MODULE                   path to an external webp.wasm(.gz)

Logging is controlled with RUST_LOG (e.g. RUST_LOG=webpgate=debug).

Run 'webpgate gen-config' to generate a documented webpgate.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Config file (defaults to ./webpgate.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show dimensions, color model and frame count
    Info {
        file: PathBuf,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Decode to PNG
    Decode {
        input: PathBuf,
        output: PathBuf,
        /// Write every frame as <output-stem>-NNN.png
        #[arg(long)]
        all: bool,
    },
    /// Encode images to WebP
    Encode {
        /// Input images (PNG, JPEG or WebP)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Output file (one input) or directory (several inputs).
        /// Defaults to the input path with a .webp extension.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Lossy quality 1-100
        #[arg(long)]
        quality: Option<i32>,
        /// Speed/size tradeoff 0-6
        #[arg(long)]
        method: Option<i32>,
        #[arg(long)]
        lossless: bool,
        /// Keep RGB under fully transparent pixels
        #[arg(long)]
        exact: bool,
    },
    /// Show which backend is active and why
    Backend,
    /// Print a stock webpgate.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
        Command::Info { file, json } => {
            init_codec(config_path)?;
            let data = std::fs::read(&file)?;
            let image_config = webpgate::probe_config(&data)?;
            let set = webpgate::decode_all(&data)?;
            let report = InfoReport::new(
                &file,
                &image_config,
                set.delays(),
                webpgate::active_backend(),
            );
            if json {
                println!("{}", output::format_info_json(&report)?);
            } else {
                output::print_info(&report);
            }
        }
        Command::Decode { input, output, all } => {
            init_codec(config_path)?;
            let data = std::fs::read(&input)?;
            let written = if all {
                let set = webpgate::decode_all(&data)?;
                let (frames, _) = set.into_parts();
                let mut written = Vec::with_capacity(frames.len());
                for (index, frame) in frames.into_iter().enumerate() {
                    let path = numbered_path(&output, index);
                    frame.into_rgba8().save(&path)?;
                    written.push(path);
                }
                written
            } else {
                webpgate::decode(&data)?.into_rgba8().save(&output)?;
                vec![output]
            };
            println!("{}", output::format_decoded(&input, &written));
        }
        Command::Encode {
            inputs,
            output,
            quality,
            method,
            lossless,
            exact,
        } => {
            let codec_config = init_codec(config_path)?;
            let mut options = codec_config.encode.options();
            if let Some(q) = quality {
                options = options.with_quality(q);
            }
            if let Some(m) = method {
                options = options.with_method(m);
            }
            options = options
                .with_lossless(lossless || options.lossless)
                .with_exact(exact || options.exact);

            let targets: Vec<(PathBuf, PathBuf)> = inputs
                .iter()
                .map(|input| (input.clone(), encode_target(input, output.as_deref(), inputs.len())))
                .collect();

            let failures: Vec<String> = targets
                .par_iter()
                .filter_map(|(input, target)| {
                    match encode_file(input, target, &options) {
                        Ok(bytes) => {
                            println!("{}", output::format_encoded(input, target, bytes));
                            None
                        }
                        Err(e) => Some(output::format_failure(input, &e)),
                    }
                })
                .collect();

            if !failures.is_empty() {
                for line in &failures {
                    eprintln!("{}", line);
                }
                return Err(format!("{} of {} inputs failed", failures.len(), targets.len()).into());
            }
        }
        Command::Backend => {
            init_codec(config_path)?;
            let resolution = resolver::resolved();
            let native_error = resolution.native_status().err().map(|e| e.to_string());
            let module = ModuleSource::pick(resolution.config().backend.module_path.as_deref())
                .map(|s| s.to_string());
            output::print_backend_status(
                resolution.kind(),
                native_error.as_deref(),
                resolution.config(),
                module.as_deref(),
            );
        }
    }

    Ok(())
}

/// Load the config and install it before the first codec call.
///
/// An explicit `--config` must exist; the implicit `./webpgate.toml` is
/// optional. Environment overrides apply on top of either.
fn init_codec(path: Option<&Path>) -> Result<CodecConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(p) if !p.exists() => {
            return Err(format!("config file not found: {}", p.display()).into());
        }
        Some(p) => config::load_config(p)?,
        None => config::load_config(Path::new(config::CONFIG_FILE_NAME))?,
    };
    let config = config::apply_env(config, |key| std::env::var(key).ok())?;
    webpgate::configure(config.clone())?;
    Ok(config)
}

fn encode_file(
    input: &Path,
    target: &Path,
    options: &webpgate::EncodeOptions,
) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
    let image = image::open(input)?;
    let bytes = webpgate::encode(&image, options)?;
    std::fs::write(target, &bytes)?;
    Ok(bytes.len())
}

fn encode_target(input: &Path, output: Option<&Path>, count: usize) -> PathBuf {
    match output {
        Some(out) if count == 1 => out.to_path_buf(),
        Some(dir) => {
            let name = input.file_name().map(PathBuf::from).unwrap_or_default();
            dir.join(name).with_extension("webp")
        }
        None => input.with_extension("webp"),
    }
}

/// `frames.png` → `frames-003.png`.
fn numbered_path(output: &Path, index: usize) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "frame".into());
    let ext = output
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "png".into());
    output.with_file_name(format!("{stem}-{index:03}.{ext}"))
}
