//! Guest-side memory access for the sandboxed codec.
//!
//! [`Guest`] is the narrow surface the decode/encode protocol needs from a
//! module instance: the exported allocator, linear-memory reads and writes,
//! and the two codec entry points. [`WasmGuest`] implements it on wasmtime.
//!
//! [`GuestSession`] tracks every guest allocation made during one call and
//! frees whatever is still live when it goes out of scope, in reverse
//! allocation order.

use super::module::CompiledModule;
use crate::codec::backend::CodecError;
use wasmtime::{Memory, Store, TypedFunc};
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::preview1::WasiP1Ctx;

/// Arguments of the guest `decode` export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeArgs {
    pub input: u32,
    pub input_len: u32,
    pub flags: u32,
    pub info: u32,
    pub delays: u32,
    pub output: u32,
}

/// Arguments of the guest `encode` export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeArgs {
    pub input: u32,
    pub width: u32,
    pub height: u32,
    pub size_out: u32,
    pub colorspace: u32,
    pub quality: u32,
    pub method: u32,
    pub lossless: u32,
    pub exact: u32,
}

/// One instantiated codec module.
pub trait Guest {
    /// Guest `malloc`. Returns the guest offset, 0 when the guest is out of memory.
    fn alloc(&mut self, len: u32) -> Result<u32, CodecError>;

    /// Guest `free`.
    fn free(&mut self, ptr: u32) -> Result<(), CodecError>;

    fn write(&mut self, ptr: u32, bytes: &[u8]) -> Result<(), CodecError>;

    fn read(&mut self, ptr: u32, len: u32) -> Result<Vec<u8>, CodecError>;

    /// Guest `decode`. Non-zero is success.
    fn call_decode(&mut self, args: DecodeArgs) -> Result<i32, CodecError>;

    /// Guest `encode`. Returns the output offset, 0 on failure.
    fn call_encode(&mut self, args: EncodeArgs) -> Result<u32, CodecError>;
}

fn runtime(context: &str, err: impl std::fmt::Display) -> CodecError {
    CodecError::Runtime(format!("{context}: {err}"))
}

/// A fresh wasmtime instance of the codec module.
pub struct WasmGuest {
    store: Store<WasiP1Ctx>,
    memory: Memory,
    malloc: TypedFunc<i32, i32>,
    free: TypedFunc<i32, ()>,
    decode: TypedFunc<(i32, i32, i32, i32, i32, i32), i32>,
    encode: TypedFunc<(i32, i32, i32, i32, i32, i32, i32, i32, i32), i32>,
}

impl WasmGuest {
    pub fn instantiate(module: &CompiledModule) -> Result<Self, CodecError> {
        let wasi = WasiCtxBuilder::new().inherit_stderr().build_p1();
        let mut store = Store::new(module.engine(), wasi);
        let instance = module
            .instance_pre()
            .instantiate(&mut store)
            .map_err(|e| runtime("instantiate", e))?;

        // Reactor modules run their constructors from `_initialize`.
        if let Ok(init) = instance.get_typed_func::<(), ()>(&mut store, "_initialize") {
            init.call(&mut store, ())
                .map_err(|e| runtime("_initialize", e))?;
        }

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| CodecError::Runtime("module exports no memory".into()))?;
        let malloc = instance
            .get_typed_func(&mut store, "malloc")
            .map_err(|e| runtime("export malloc", e))?;
        let free = instance
            .get_typed_func(&mut store, "free")
            .map_err(|e| runtime("export free", e))?;
        let decode = instance
            .get_typed_func(&mut store, "decode")
            .map_err(|e| runtime("export decode", e))?;
        let encode = instance
            .get_typed_func(&mut store, "encode")
            .map_err(|e| runtime("export encode", e))?;

        Ok(Self {
            store,
            memory,
            malloc,
            free,
            decode,
            encode,
        })
    }
}

impl Guest for WasmGuest {
    fn alloc(&mut self, len: u32) -> Result<u32, CodecError> {
        let ptr = self
            .malloc
            .call(&mut self.store, len as i32)
            .map_err(|e| runtime("malloc", e))?;
        Ok(ptr as u32)
    }

    fn free(&mut self, ptr: u32) -> Result<(), CodecError> {
        self.free
            .call(&mut self.store, ptr as i32)
            .map_err(|e| runtime("free", e))
    }

    fn write(&mut self, ptr: u32, bytes: &[u8]) -> Result<(), CodecError> {
        self.memory
            .write(&mut self.store, ptr as usize, bytes)
            .map_err(|_| CodecError::MemoryWriteFailed {
                offset: ptr,
                len: bytes.len() as u32,
            })
    }

    fn read(&mut self, ptr: u32, len: u32) -> Result<Vec<u8>, CodecError> {
        let mut buf = vec![0u8; len as usize];
        self.memory
            .read(&self.store, ptr as usize, &mut buf)
            .map_err(|_| CodecError::MemoryReadFailed { offset: ptr, len })?;
        Ok(buf)
    }

    fn call_decode(&mut self, a: DecodeArgs) -> Result<i32, CodecError> {
        self.decode
            .call(
                &mut self.store,
                (
                    a.input as i32,
                    a.input_len as i32,
                    a.flags as i32,
                    a.info as i32,
                    a.delays as i32,
                    a.output as i32,
                ),
            )
            .map_err(|e| runtime("decode", e))
    }

    fn call_encode(&mut self, a: EncodeArgs) -> Result<u32, CodecError> {
        let ptr = self
            .encode
            .call(
                &mut self.store,
                (
                    a.input as i32,
                    a.width as i32,
                    a.height as i32,
                    a.size_out as i32,
                    a.colorspace as i32,
                    a.quality as i32,
                    a.method as i32,
                    a.lossless as i32,
                    a.exact as i32,
                ),
            )
            .map_err(|e| runtime("encode", e))?;
        Ok(ptr as u32)
    }
}

/// Which operation a session serves; picks the error kind for failed steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Decode,
    Encode,
}

impl Operation {
    pub fn failed(self, msg: impl Into<String>) -> CodecError {
        match self {
            Operation::Decode => CodecError::DecodeFailed(msg.into()),
            Operation::Encode => CodecError::EncodeFailed(msg.into()),
        }
    }
}

/// Allocation tracker for one call against a guest.
pub struct GuestSession<'g, G: Guest> {
    guest: &'g mut G,
    op: Operation,
    live: Vec<u32>,
}

impl<'g, G: Guest> GuestSession<'g, G> {
    pub fn new(guest: &'g mut G, op: Operation) -> Self {
        Self {
            guest,
            op,
            live: Vec::new(),
        }
    }

    pub fn op(&self) -> Operation {
        self.op
    }

    /// Allocate `len` bytes; freed when the session ends.
    pub fn alloc(&mut self, len: u32) -> Result<u32, CodecError> {
        let ptr = self.guest.alloc(len)?;
        if ptr == 0 {
            return Err(self.op.failed(format!("guest malloc({len}) returned null")));
        }
        self.live.push(ptr);
        Ok(ptr)
    }

    /// Allocate and fill with `bytes`.
    pub fn alloc_bytes(&mut self, bytes: &[u8]) -> Result<u32, CodecError> {
        let len = u32::try_from(bytes.len()).map_err(|_| {
            CodecError::InvalidInput(format!("{} bytes exceed guest address space", bytes.len()))
        })?;
        let ptr = self.alloc(len)?;
        self.guest.write(ptr, bytes)?;
        Ok(ptr)
    }

    /// Take ownership of a buffer the guest allocated for us.
    pub fn adopt(&mut self, ptr: u32) {
        if ptr != 0 {
            self.live.push(ptr);
        }
    }

    /// Free one tracked allocation now.
    pub fn release(&mut self, ptr: u32) -> Result<(), CodecError> {
        if let Some(pos) = self.live.iter().rposition(|&p| p == ptr) {
            self.live.remove(pos);
            self.guest.free(ptr)?;
        }
        Ok(())
    }

    pub fn read(&mut self, ptr: u32, len: u32) -> Result<Vec<u8>, CodecError> {
        self.guest.read(ptr, len)
    }

    /// Read `count` little-endian u32 values.
    pub fn read_u32s(&mut self, ptr: u32, count: u32) -> Result<Vec<u32>, CodecError> {
        let len = count
            .checked_mul(4)
            .ok_or(CodecError::MemoryReadFailed { offset: ptr, len: u32::MAX })?;
        let bytes = self.guest.read(ptr, len)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    pub fn read_u64(&mut self, ptr: u32) -> Result<u64, CodecError> {
        let bytes = self.guest.read(ptr, 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn call_decode(&mut self, args: DecodeArgs) -> Result<i32, CodecError> {
        self.guest.call_decode(args)
    }

    pub fn call_encode(&mut self, args: EncodeArgs) -> Result<u32, CodecError> {
        self.guest.call_encode(args)
    }

    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }
}

impl<G: Guest> Drop for GuestSession<'_, G> {
    fn drop(&mut self) {
        while let Some(ptr) = self.live.pop() {
            if let Err(e) = self.guest.free(ptr) {
                tracing::warn!(ptr, error = %e, "failed to free guest allocation");
            }
        }
    }
}
