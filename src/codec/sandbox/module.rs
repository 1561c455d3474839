//! The codec module: locating, decompressing and compiling it.
//!
//! The module is libwebp built for `wasm32-wasip1` against the ABI in
//! `lib/webp.c`. When `lib/webp.wasm.gz` (from `lib/build-module.sh`) exists
//! at build time it is embedded in the binary; otherwise a path must be
//! configured. Either way the bytes
//! may be gzip'ed or raw wasm.
//!
//! Compilation happens once per backend: the engine, the compiled module and
//! a pre-linked [`InstancePre`] are kept, and each call only instantiates.

use crate::codec::backend::CodecError;
use flate2::read::GzDecoder;
use std::borrow::Cow;
use std::io::Read;
use std::path::{Path, PathBuf};
use wasmtime::{Config, Engine, InstancePre, Linker, Module};
use wasmtime_wasi::preview1::{self, WasiP1Ctx};

#[cfg(webpgate_embedded_module)]
static EMBEDDED: Option<&[u8]> = Some(include_bytes!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/lib/webp.wasm.gz"
)));

#[cfg(not(webpgate_embedded_module))]
static EMBEDDED: Option<&[u8]> = None;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const WASM_MAGIC: [u8; 4] = *b"\0asm";

/// Whether this build carries the module.
pub fn has_embedded_module() -> bool {
    EMBEDDED.is_some()
}

/// Where the module bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
    Embedded,
    Path(PathBuf),
}

impl ModuleSource {
    /// An explicit path wins; otherwise the embedded module, if built in.
    pub fn pick(path: Option<&Path>) -> Option<Self> {
        match path {
            Some(p) => Some(ModuleSource::Path(p.to_path_buf())),
            None if has_embedded_module() => Some(ModuleSource::Embedded),
            None => None,
        }
    }

    fn bytes(&self) -> Result<Cow<'static, [u8]>, CodecError> {
        match self {
            ModuleSource::Embedded => EMBEDDED.map(Cow::Borrowed).ok_or_else(|| {
                CodecError::BackendUnavailable("no codec module embedded in this build".into())
            }),
            ModuleSource::Path(path) => std::fs::read(path).map(Cow::Owned).map_err(|e| {
                CodecError::BackendUnavailable(format!(
                    "cannot read codec module {}: {e}",
                    path.display()
                ))
            }),
        }
    }
}

impl std::fmt::Display for ModuleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleSource::Embedded => write!(f, "embedded"),
            ModuleSource::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

/// Gunzip if needed and check for the wasm magic.
pub fn unpack(bytes: &[u8]) -> Result<Cow<'_, [u8]>, CodecError> {
    let wasm = if bytes.starts_with(&GZIP_MAGIC) {
        let mut out = Vec::with_capacity(bytes.len() * 3);
        GzDecoder::new(bytes)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::BackendUnavailable(format!("corrupt codec module: {e}")))?;
        Cow::Owned(out)
    } else {
        Cow::Borrowed(bytes)
    };
    if !wasm.starts_with(&WASM_MAGIC) {
        return Err(CodecError::BackendUnavailable(
            "codec module is not a WebAssembly binary".into(),
        ));
    }
    Ok(wasm)
}

/// A compiled, pre-linked codec module.
pub struct CompiledModule {
    engine: Engine,
    pre: InstancePre<WasiP1Ctx>,
}

impl CompiledModule {
    pub fn load(source: &ModuleSource) -> Result<Self, CodecError> {
        let raw = source.bytes()?;
        let wasm = unpack(&raw)?;
        tracing::debug!(%source, bytes = wasm.len(), "compiling codec module");
        Self::compile(&wasm)
    }

    pub fn compile(wasm: &[u8]) -> Result<Self, CodecError> {
        let unavailable = |what: &str, e: wasmtime::Error| {
            CodecError::BackendUnavailable(format!("{what}: {e:#}"))
        };
        let engine = Engine::new(&Config::new()).map_err(|e| unavailable("engine", e))?;
        let module = Module::new(&engine, wasm).map_err(|e| unavailable("compile", e))?;
        let mut linker: Linker<WasiP1Ctx> = Linker::new(&engine);
        preview1::add_to_linker_sync(&mut linker, |ctx| ctx)
            .map_err(|e| unavailable("link WASI", e))?;
        let pre = linker
            .instantiate_pre(&module)
            .map_err(|e| unavailable("link", e))?;
        Ok(Self { engine, pre })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn instance_pre(&self) -> &InstancePre<WasiP1Ctx> {
        &self.pre
    }
}
