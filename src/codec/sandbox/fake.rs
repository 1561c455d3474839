//! Pure-Rust guest used to exercise the sandbox protocol.
//!
//! Memory is a flat `Vec<u8>` with a bump allocator. Inputs use the same
//! 10-byte fake stream as the native fakes: width, height (u32 LE), flags
//! (bit0 animated, bit1 lossless), frame count.

use super::guest::{DecodeArgs, EncodeArgs, Guest};
use super::protocol::{FLAG_ALL_FRAMES, FLAG_HEADER_ONLY, FLAG_PLANAR};
use crate::codec::backend::CodecError;
use crate::codec::pixels::yuva420_len;
use std::collections::HashMap;

const MEMORY_SIZE: usize = 1 << 20;

#[derive(Debug)]
pub struct FakeGuest {
    memory: Vec<u8>,
    next: u32,
    live: HashMap<u32, u32>,
    alloc_calls: usize,
    pub allocs: usize,
    pub frees: usize,
    pub free_order: Vec<u32>,
    pub decode_calls: Vec<DecodeArgs>,
    pub encode_calls: Vec<EncodeArgs>,
    /// Index of the alloc call that returns null.
    pub fail_alloc_at: Option<usize>,
    pub fail_write: bool,
    pub fail_read: bool,
    /// Index of the decode call that returns 0.
    pub fail_decode_at: Option<usize>,
    pub fail_encode: bool,
    /// Encoder reports success with zero output bytes.
    pub empty_encode: bool,
}

impl FakeGuest {
    pub fn new() -> Self {
        Self {
            memory: vec![0; MEMORY_SIZE],
            next: 16,
            live: HashMap::new(),
            alloc_calls: 0,
            allocs: 0,
            frees: 0,
            free_order: Vec::new(),
            decode_calls: Vec::new(),
            encode_calls: Vec::new(),
            fail_alloc_at: None,
            fail_write: false,
            fail_read: false,
            fail_decode_at: None,
            fail_encode: false,
            empty_encode: false,
        }
    }

    pub fn assert_balanced(&self) {
        assert_eq!(self.allocs, self.frees, "allocs vs frees");
        assert!(self.live.is_empty(), "live guest allocations: {:?}", self.live);
    }

    fn range(&self, ptr: u32, len: u32) -> Option<std::ops::Range<usize>> {
        let start = ptr as usize;
        let end = start.checked_add(len as usize)?;
        (end <= self.memory.len()).then_some(start..end)
    }

    fn put(&mut self, ptr: u32, bytes: &[u8]) {
        let start = ptr as usize;
        self.memory[start..start + bytes.len()].copy_from_slice(bytes);
    }

    fn put_u32s(&mut self, ptr: u32, values: &[u32]) {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.put(ptr, &bytes);
    }
}

impl Guest for FakeGuest {
    fn alloc(&mut self, len: u32) -> Result<u32, CodecError> {
        let index = self.alloc_calls;
        self.alloc_calls += 1;
        if self.fail_alloc_at == Some(index) {
            self.fail_alloc_at = None;
            return Ok(0);
        }
        let ptr = self.next;
        let end = ptr as usize + len.max(1) as usize;
        if end > self.memory.len() {
            return Ok(0);
        }
        self.next = (end as u32 + 7) & !7;
        self.live.insert(ptr, len);
        self.allocs += 1;
        Ok(ptr)
    }

    fn free(&mut self, ptr: u32) -> Result<(), CodecError> {
        if self.live.remove(&ptr).is_none() {
            panic!("guest free of unknown or already freed pointer {ptr}");
        }
        self.frees += 1;
        self.free_order.push(ptr);
        Ok(())
    }

    fn write(&mut self, ptr: u32, bytes: &[u8]) -> Result<(), CodecError> {
        let err = CodecError::MemoryWriteFailed {
            offset: ptr,
            len: bytes.len() as u32,
        };
        if self.fail_write {
            return Err(err);
        }
        let range = self.range(ptr, bytes.len() as u32).ok_or(err)?;
        self.memory[range].copy_from_slice(bytes);
        Ok(())
    }

    fn read(&mut self, ptr: u32, len: u32) -> Result<Vec<u8>, CodecError> {
        let err = CodecError::MemoryReadFailed { offset: ptr, len };
        if self.fail_read {
            return Err(err);
        }
        let range = self.range(ptr, len).ok_or(err)?;
        Ok(self.memory[range].to_vec())
    }

    fn call_decode(&mut self, args: DecodeArgs) -> Result<i32, CodecError> {
        let index = self.decode_calls.len();
        self.decode_calls.push(args);
        if self.fail_decode_at == Some(index) || args.input_len < 10 {
            return Ok(0);
        }
        let input = self.read(args.input, 10)?;
        let width = u32::from_le_bytes([input[0], input[1], input[2], input[3]]);
        let height = u32::from_le_bytes([input[4], input[5], input[6], input[7]]);
        let animated = input[8] & 1 != 0;
        let lossless = input[8] & 2 != 0;
        let total = input[9] as u32;

        let frames = if args.flags & (FLAG_HEADER_ONLY | FLAG_ALL_FRAMES) != 0 {
            total
        } else {
            1
        };
        self.put_u32s(
            args.info,
            &[width, height, frames, animated as u32, lossless as u32, 1],
        );
        if args.flags & FLAG_HEADER_ONLY != 0 {
            return Ok(1);
        }

        let delays: Vec<u32> = (0..frames).map(|i| 10 * (i + 1)).collect();
        self.put_u32s(args.delays, &delays);
        let frame_len = if args.flags & FLAG_PLANAR != 0 {
            yuva420_len(width, height)
        } else {
            (width * height * 4) as usize
        };
        for i in 0..frames as usize {
            let fill = vec![i as u8; frame_len];
            self.put(args.output + (i * frame_len) as u32, &fill);
        }
        Ok(1)
    }

    fn call_encode(&mut self, args: EncodeArgs) -> Result<u32, CodecError> {
        self.encode_calls.push(args);
        if self.fail_encode {
            return Ok(0);
        }
        let body: &[u8] = if self.empty_encode {
            b""
        } else {
            b"RIFF\x0c\0\0\0WEBPVP8L"
        };
        let out = self.alloc(body.len() as u32)?;
        if out == 0 {
            return Ok(0);
        }
        self.put(out, body);
        self.put(args.size_out, &(body.len() as u64).to_le_bytes());
        Ok(out)
    }
}
