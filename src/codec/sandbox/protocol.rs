//! Host side of the guest decode/encode calls.
//!
//! Decode makes two guest calls on one instance. The first is header-only
//! and fills the info block. Its dimensions and frame count size the
//! delay and pixel buffers for the second call. Encode writes the pixels,
//! calls `encode`, then copies out the guest-allocated result. Every guest
//! allocation goes through a [`GuestSession`], so all of them are freed on
//! every exit path.
//!
//! Info block: `width, height, frame_count, has_animation, is_lossless,
//! has_alpha`, each a little-endian u32.

use super::guest::{DecodeArgs, EncodeArgs, Guest, GuestSession, Operation};
use crate::codec::backend::{CodecError, DecodedFrame, FrameRequest, StreamInfo};
use crate::codec::params::EncodeOptions;
use crate::codec::pixels::{EncoderInput, PixelImage, Yuva420Image, yuva420_len};
use crate::types::ColorModel;
use image::RgbaImage;

pub const FLAG_HEADER_ONLY: u32 = 1;
pub const FLAG_ALL_FRAMES: u32 = 1 << 1;
pub const FLAG_PLANAR: u32 = 1 << 2;

pub const COLORSPACE_RGBA: u32 = 0;
pub const COLORSPACE_YUVA420: u32 = 1;

const INFO_FIELDS: u32 = 6;

fn guest_len(len: usize, op: Operation) -> Result<u32, CodecError> {
    u32::try_from(len).map_err(|_| op.failed(format!("{len} bytes exceed guest address space")))
}

fn read_info<G: Guest>(
    session: &mut GuestSession<'_, G>,
    ptr: u32,
) -> Result<StreamInfo, CodecError> {
    let v = session.read_u32s(ptr, INFO_FIELDS)?;
    Ok(StreamInfo {
        width: v[0],
        height: v[1],
        frame_count: v[2],
        has_animation: v[3] != 0,
        is_lossless: v[4] != 0,
        has_alpha: v[5] != 0,
    })
}

/// Header-only call against an input already in guest memory.
fn header<G: Guest>(
    session: &mut GuestSession<'_, G>,
    input: u32,
    input_len: u32,
    info: u32,
) -> Result<StreamInfo, CodecError> {
    let ok = session.call_decode(DecodeArgs {
        input,
        input_len,
        flags: FLAG_HEADER_ONLY,
        info,
        ..DecodeArgs::default()
    })?;
    if ok == 0 {
        return Err(CodecError::DecodeFailed("guest rejected the header".into()));
    }
    let info = read_info(session, info)?;
    if info.width == 0 || info.height == 0 {
        return Err(CodecError::DecodeFailed("guest reported a zero dimension".into()));
    }
    Ok(info)
}

#[tracing::instrument(skip_all, fields(len = data.len()))]
pub fn probe<G: Guest>(guest: &mut G, data: &[u8]) -> Result<StreamInfo, CodecError> {
    let mut session = GuestSession::new(guest, Operation::Decode);
    let input_len = guest_len(data.len(), Operation::Decode)?;
    let input = session.alloc_bytes(data)?;
    let info = session.alloc(INFO_FIELDS * 4)?;
    header(&mut session, input, input_len, info)
}

#[tracing::instrument(skip_all, fields(len = data.len(), ?request))]
pub fn decode<G: Guest>(
    guest: &mut G,
    data: &[u8],
    request: FrameRequest,
) -> Result<Vec<DecodedFrame>, CodecError> {
    let mut session = GuestSession::new(guest, Operation::Decode);
    let input_len = guest_len(data.len(), Operation::Decode)?;
    let input = session.alloc_bytes(data)?;
    let info_ptr = session.alloc(INFO_FIELDS * 4)?;
    let info = header(&mut session, input, input_len, info_ptr)?;

    let planar = info.color_model() == ColorModel::Yuva420;
    let wanted = match request {
        FrameRequest::First => 1,
        FrameRequest::All => info.frame_count.max(1),
    };
    let frame_len = if planar {
        yuva420_len(info.width, info.height)
    } else {
        info.width as usize * info.height as usize * 4
    };
    let frame_len32 = guest_len(frame_len, Operation::Decode)?;
    let total = frame_len
        .checked_mul(wanted as usize)
        .ok_or_else(|| CodecError::DecodeFailed("frame buffer size overflows".into()))?;
    let delays_ptr = session.alloc(wanted * 4)?;
    let out_ptr = session.alloc(guest_len(total, Operation::Decode)?)?;

    let mut flags = 0;
    if request == FrameRequest::All {
        flags |= FLAG_ALL_FRAMES;
    }
    if planar {
        flags |= FLAG_PLANAR;
    }
    let ok = session.call_decode(DecodeArgs {
        input,
        input_len,
        flags,
        info: info_ptr,
        delays: delays_ptr,
        output: out_ptr,
    })?;
    if ok == 0 {
        return Err(CodecError::DecodeFailed("guest decode failed".into()));
    }
    // Input is no longer needed; free it before copying pixels out.
    session.release(input)?;

    let decoded = read_info(&mut session, info_ptr)?.frame_count.min(wanted);
    if decoded == 0 {
        return Err(CodecError::DecodeFailed("guest produced no frames".into()));
    }
    let delays = session.read_u32s(delays_ptr, decoded)?;

    let mut frames = Vec::with_capacity(decoded as usize);
    for (i, delay_ms) in delays.into_iter().enumerate() {
        let bytes = session.read(out_ptr + i as u32 * frame_len32, frame_len32)?;
        let image = if planar {
            PixelImage::Yuva420(Yuva420Image::from_contiguous(info.width, info.height, &bytes)?)
        } else {
            PixelImage::Rgba8(RgbaImage::from_raw(info.width, info.height, bytes).ok_or_else(
                || CodecError::DecodeFailed("guest frame size mismatch".into()),
            )?)
        };
        frames.push(DecodedFrame { image, delay_ms });
    }
    tracing::debug!(frames = frames.len(), "sandboxed decode");
    Ok(frames)
}

#[tracing::instrument(skip_all, fields(width = input.width(), height = input.height()))]
pub fn encode<G: Guest>(
    guest: &mut G,
    input: &EncoderInput<'_>,
    options: &EncodeOptions,
) -> Result<Vec<u8>, CodecError> {
    let mut session = GuestSession::new(guest, Operation::Encode);
    let pixels = input.tight_bytes();
    let in_ptr = session.alloc_bytes(&pixels)?;
    let size_ptr = session.alloc(8)?;

    let out_ptr = session.call_encode(EncodeArgs {
        input: in_ptr,
        width: input.width(),
        height: input.height(),
        size_out: size_ptr,
        colorspace: if input.is_planar() {
            COLORSPACE_YUVA420
        } else {
            COLORSPACE_RGBA
        },
        quality: options.quality.value() as u32,
        method: options.method.value() as u32,
        lossless: options.lossless as u32,
        exact: options.exact as u32,
    })?;
    if out_ptr == 0 {
        return Err(CodecError::EncodeFailed("guest encoder failed".into()));
    }
    session.adopt(out_ptr);
    session.release(in_ptr)?;

    let size = session.read_u64(size_ptr)?;
    if size == 0 {
        return Err(CodecError::EncodeFailed("encoder produced no output".into()));
    }
    let len = u32::try_from(size)
        .map_err(|_| CodecError::EncodeFailed(format!("guest reported {size} output bytes")))?;
    session.read(out_ptr, len)
}
