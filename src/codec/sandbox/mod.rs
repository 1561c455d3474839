//! Sandboxed backend: libwebp compiled to WebAssembly, run in wasmtime.
//!
//! The module is decompressed and compiled at most once per backend, on
//! first use, behind a `OnceLock`; a failed load is remembered and
//! reported on every later call. Each codec call then gets its own
//! instance, so concurrent calls never share guest memory.

pub mod guest;
pub mod module;
pub mod protocol;

#[cfg(test)]
mod fake;

use guest::WasmGuest;
use module::{CompiledModule, ModuleSource};

use super::backend::{
    Backend, BackendKind, BufferedFrames, CodecError, FrameRequest, FrameSource, StreamInfo,
};
use super::params::EncodeOptions;
use super::pixels::EncoderInput;
use std::sync::OnceLock;

pub struct SandboxBackend {
    source: Option<ModuleSource>,
    module: OnceLock<Result<CompiledModule, String>>,
}

impl SandboxBackend {
    /// `source` is `None` when neither an embedded module nor a configured
    /// path exists; every call then fails with `BackendUnavailable`.
    pub fn new(source: Option<ModuleSource>) -> Self {
        Self {
            source,
            module: OnceLock::new(),
        }
    }

    pub fn source(&self) -> Option<&ModuleSource> {
        self.source.as_ref()
    }

    fn module(&self) -> Result<&CompiledModule, CodecError> {
        let loaded = self.module.get_or_init(|| match &self.source {
            Some(source) => CompiledModule::load(source).map_err(|e| e.to_string()),
            None => Err("no codec module: none embedded and none configured".to_string()),
        });
        loaded
            .as_ref()
            .map_err(|msg| CodecError::BackendUnavailable(msg.clone()))
    }

    fn instantiate(&self) -> Result<WasmGuest, CodecError> {
        WasmGuest::instantiate(self.module()?)
    }
}

impl Backend for SandboxBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sandboxed
    }

    fn probe(&self, data: &[u8]) -> Result<StreamInfo, CodecError> {
        protocol::probe(&mut self.instantiate()?, data)
    }

    fn frames<'a>(
        &'a self,
        data: &'a [u8],
        _info: &StreamInfo,
        request: FrameRequest,
    ) -> Result<Box<dyn FrameSource + 'a>, CodecError> {
        let frames = protocol::decode(&mut self.instantiate()?, data, request)?;
        Ok(Box::new(BufferedFrames::new(frames)))
    }

    fn encode(
        &self,
        input: &EncoderInput<'_>,
        options: &EncodeOptions,
    ) -> Result<Vec<u8>, CodecError> {
        protocol::encode(&mut self.instantiate()?, input, options)
    }
}
