//! Instrumented stand-in for libwebp.
//!
//! Every entry point of [`WebpApi`] is replaced by an `extern "C"` function
//! that allocates from a per-thread ledger, so tests can check that every
//! allocation was released exactly once. The "bitstream" is a 10-byte
//! record built by `crate::test_helpers::fake_stream`.

use super::abi::*;
use super::library::WebpApi;
use crate::codec::pixels::chroma_dimensions;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{c_int, c_void};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Features,
    DecodeAfterAlloc,
    Fragment,
    Demux,
    Validate,
    Encode,
}

#[derive(Debug, Default, Clone)]
pub struct Counters {
    pub allocations: usize,
    pub releases: usize,
    pub live: usize,
    pub iterators_acquired: usize,
    pub iterators_released: usize,
    pub imports: usize,
    pub last_plane_ptr: usize,
}

impl Counters {
    pub fn assert_balanced(&self) {
        assert_eq!(self.allocations, self.releases, "allocations vs releases: {self:?}");
        assert_eq!(self.live, 0, "live allocations: {self:?}");
        assert_eq!(
            self.iterators_acquired, self.iterators_released,
            "iterators: {self:?}"
        );
    }
}

#[derive(Default)]
struct Ledger {
    live: HashMap<usize, usize>,
    counters: Counters,
    fail: Option<FailPoint>,
}

thread_local! {
    static LEDGER: RefCell<Ledger> = RefCell::new(Ledger::default());
}

pub fn counters() -> Counters {
    LEDGER.with(|l| {
        let l = l.borrow();
        Counters {
            live: l.live.len(),
            ..l.counters.clone()
        }
    })
}

/// Make the next call through `point` fail.
pub fn fail_at(point: FailPoint) {
    LEDGER.with(|l| l.borrow_mut().fail = Some(point));
}

fn should_fail(point: FailPoint) -> bool {
    LEDGER.with(|l| {
        let mut l = l.borrow_mut();
        if l.fail == Some(point) {
            l.fail = None;
            true
        } else {
            false
        }
    })
}

fn track(ptr: usize, len: usize) {
    LEDGER.with(|l| {
        let mut l = l.borrow_mut();
        l.live.insert(ptr, len);
        l.counters.allocations += 1;
    });
}

fn untrack(ptr: usize) -> usize {
    LEDGER.with(|l| {
        let mut l = l.borrow_mut();
        let len = l
            .live
            .remove(&ptr)
            .unwrap_or_else(|| panic!("release of unknown or already freed pointer {ptr:#x}"));
        l.counters.releases += 1;
        len
    })
}

fn alloc(len: usize) -> *mut u8 {
    let len = len.max(1);
    let ptr = Box::into_raw(vec![0u8; len].into_boxed_slice()).cast::<u8>();
    track(ptr as usize, len);
    ptr
}

fn release(ptr: *mut u8) {
    let len = untrack(ptr as usize);
    // SAFETY: ptr/len came from `alloc`.
    drop(unsafe { Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr, len)) });
}

struct Parsed {
    width: u32,
    height: u32,
    animated: bool,
    lossless: bool,
    frames: u8,
}

fn parse(data: *const u8, size: usize) -> Option<Parsed> {
    if data.is_null() || size < 10 {
        return None;
    }
    // SAFETY: caller passes a valid slice.
    let b = unsafe { std::slice::from_raw_parts(data, size) };
    Some(Parsed {
        width: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        height: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
        animated: b[8] & 1 != 0,
        lossless: b[8] & 2 != 0,
        frames: b[9],
    })
}

unsafe extern "C" fn get_decoder_version() -> c_int {
    0x01_04_00
}

unsafe extern "C" fn get_info(data: *const u8, size: usize, w: *mut c_int, h: *mut c_int) -> c_int {
    match parse(data, size) {
        Some(p) => {
            // SAFETY: valid out-pointers from the caller.
            unsafe {
                *w = p.width as c_int;
                *h = p.height as c_int;
            }
            1
        }
        None => 0,
    }
}

unsafe extern "C" fn get_features(
    data: *const u8,
    size: usize,
    features: *mut WebPBitstreamFeatures,
    _version: c_int,
) -> c_int {
    if should_fail(FailPoint::Features) {
        return 3;
    }
    let Some(p) = parse(data, size) else {
        return 3;
    };
    // SAFETY: valid out-pointer from the caller.
    let f = unsafe { &mut *features };
    f.width = p.width as c_int;
    f.height = p.height as c_int;
    f.has_alpha = 1;
    f.has_animation = p.animated as c_int;
    f.format = if p.lossless { FORMAT_LOSSLESS } else { 1 };
    0
}

unsafe extern "C" fn init_decoder_config(config: *mut WebPDecoderConfig, _version: c_int) -> c_int {
    // SAFETY: valid out-pointer from the caller.
    unsafe { *config = WebPDecoderConfig::zeroed() };
    1
}

unsafe extern "C" fn decode(data: *const u8, size: usize, config: *mut WebPDecoderConfig) -> c_int {
    let Some(p) = parse(data, size) else {
        return 3;
    };
    // SAFETY: valid config from the caller.
    let out = unsafe { &mut (*config).output };
    let (w, h) = (p.width as usize, p.height as usize);
    out.width = p.width as c_int;
    out.height = p.height as c_int;
    if out.colorspace == MODE_RGBA {
        let ptr = alloc(w * h * 4);
        out.u.RGBA = WebPRGBABuffer {
            rgba: ptr,
            stride: (w * 4) as c_int,
            _pad0: 0,
            size: w * h * 4,
        };
        out.private_memory = ptr;
    } else {
        let (cw, ch) = chroma_dimensions(p.width, p.height);
        let (cw, ch) = (cw as usize, ch as usize);
        let ptr = alloc(2 * w * h + 2 * cw * ch);
        // SAFETY: offsets stay within the allocation above.
        out.u.YUVA = unsafe {
            WebPYUVABuffer {
                y: ptr,
                u: ptr.add(w * h),
                v: ptr.add(w * h + cw * ch),
                a: ptr.add(w * h + 2 * cw * ch),
                y_stride: w as c_int,
                u_stride: cw as c_int,
                v_stride: cw as c_int,
                a_stride: w as c_int,
                y_size: w * h,
                u_size: cw * ch,
                v_size: cw * ch,
                a_size: w * h,
            }
        };
        out.private_memory = ptr;
    }
    if should_fail(FailPoint::DecodeAfterAlloc) {
        return 3;
    }
    0
}

unsafe extern "C" fn free_dec_buffer(buffer: *mut WebPDecBuffer) {
    // SAFETY: valid buffer from the caller.
    let buffer = unsafe { &mut *buffer };
    if !buffer.private_memory.is_null() {
        release(buffer.private_memory);
        buffer.private_memory = std::ptr::null_mut();
    }
}

unsafe extern "C" fn decode_rgba(
    data: *const u8,
    size: usize,
    w: *mut c_int,
    h: *mut c_int,
) -> *mut u8 {
    if should_fail(FailPoint::Fragment) || size < 9 {
        return std::ptr::null_mut();
    }
    // SAFETY: caller passes a valid slice.
    let b = unsafe { std::slice::from_raw_parts(data, size) };
    let fw = u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize;
    let fh = u32::from_le_bytes([b[4], b[5], b[6], b[7]]) as usize;
    let ptr = alloc(fw * fh * 4);
    // SAFETY: ptr holds fw * fh * 4 bytes.
    let px = unsafe { std::slice::from_raw_parts_mut(ptr, fw * fh * 4) };
    for chunk in px.chunks_exact_mut(4) {
        chunk.copy_from_slice(&[b[8], b[8], b[8], 255]);
    }
    // SAFETY: valid out-pointers from the caller.
    unsafe {
        *w = fw as c_int;
        *h = fh as c_int;
    }
    ptr
}

unsafe extern "C" fn free(ptr: *mut c_void) {
    if !ptr.is_null() {
        release(ptr.cast());
    }
}

unsafe extern "C" fn config_init(
    config: *mut WebPConfig,
    _preset: c_int,
    quality: f32,
    _v: c_int,
) -> c_int {
    // SAFETY: valid out-pointer from the caller.
    unsafe {
        *config = WebPConfig {
            quality,
            method: 4,
            ..WebPConfig::zeroed()
        };
    }
    1
}

unsafe extern "C" fn validate_config(_config: *const WebPConfig) -> c_int {
    !should_fail(FailPoint::Validate) as c_int
}

unsafe extern "C" fn picture_init(picture: *mut WebPPicture, _version: c_int) -> c_int {
    // SAFETY: valid out-pointer from the caller.
    unsafe { *picture = WebPPicture::zeroed() };
    1
}

unsafe extern "C" fn picture_import_rgba(
    picture: *mut WebPPicture,
    _rgba: *const u8,
    _stride: c_int,
) -> c_int {
    // SAFETY: valid picture from the caller.
    let pic = unsafe { &mut *picture };
    let ptr = alloc(pic.width as usize * pic.height as usize * 4);
    pic.memory_argb_ = ptr.cast();
    pic.argb = ptr.cast();
    LEDGER.with(|l| l.borrow_mut().counters.imports += 1);
    1
}

unsafe extern "C" fn picture_free(picture: *mut WebPPicture) {
    // SAFETY: valid picture from the caller.
    let pic = unsafe { &mut *picture };
    if !pic.memory_argb_.is_null() {
        release(pic.memory_argb_.cast());
        pic.memory_argb_ = std::ptr::null_mut();
        pic.argb = std::ptr::null_mut();
    }
}

unsafe extern "C" fn encode(_config: *const WebPConfig, picture: *mut WebPPicture) -> c_int {
    // SAFETY: valid picture from the caller.
    let pic = unsafe { &mut *picture };
    if should_fail(FailPoint::Encode) {
        pic.error_code = 1;
        return 0;
    }
    if pic.use_argb == 0 {
        LEDGER.with(|l| l.borrow_mut().counters.last_plane_ptr = pic.y as usize);
    }
    let Some(writer) = pic.writer else {
        return 0;
    };
    for chunk in [&b"RIFF\x0c\0\0\0"[..], &b"WEBPVP8L"[..]] {
        // SAFETY: chunk is a valid slice; pic carries the writer's custom_ptr.
        if unsafe { writer(chunk.as_ptr(), chunk.len(), pic) } == 0 {
            return 0;
        }
    }
    1
}

unsafe extern "C" fn memory_writer_init(writer: *mut WebPMemoryWriter) {
    // SAFETY: valid out-pointer from the caller.
    unsafe { *writer = WebPMemoryWriter::zeroed() };
}

unsafe extern "C" fn memory_write(
    data: *const u8,
    size: usize,
    picture: *const WebPPicture,
) -> c_int {
    // SAFETY: custom_ptr was set to a live WebPMemoryWriter by the caller.
    let w = unsafe { &mut *((*picture).custom_ptr as *mut WebPMemoryWriter) };
    let grown = alloc(w.size + size);
    // SAFETY: grown holds w.size + size bytes; old mem holds w.size bytes.
    unsafe {
        if !w.mem.is_null() {
            std::ptr::copy_nonoverlapping(w.mem, grown, w.size);
        }
        std::ptr::copy_nonoverlapping(data, grown.add(w.size), size);
    }
    if !w.mem.is_null() {
        release(w.mem);
    }
    w.mem = grown;
    w.size += size;
    w.max_size = w.size;
    1
}

unsafe extern "C" fn memory_writer_clear(writer: *mut WebPMemoryWriter) {
    // SAFETY: valid writer from the caller.
    let w = unsafe { &mut *writer };
    if !w.mem.is_null() {
        release(w.mem);
    }
    *w = WebPMemoryWriter::zeroed();
}

struct FakeDemux {
    width: u32,
    height: u32,
    fragments: Vec<Vec<u8>>,
}

unsafe extern "C" fn demux_new(
    data: *const WebPData,
    _partial: c_int,
    _state: *mut c_int,
    _v: c_int,
) -> *mut WebPDemuxer {
    if should_fail(FailPoint::Demux) {
        return std::ptr::null_mut();
    }
    // SAFETY: valid WebPData from the caller.
    let data = unsafe { *data };
    let Some(p) = parse(data.bytes, data.size) else {
        return std::ptr::null_mut();
    };
    let fw = (p.width / 2).max(1);
    let fragments = (0..p.frames)
        .map(|i| {
            let mut f = Vec::with_capacity(9);
            f.extend_from_slice(&fw.to_le_bytes());
            f.extend_from_slice(&p.height.to_le_bytes());
            f.push(i.wrapping_mul(10));
            f
        })
        .collect();
    let demux = Box::into_raw(Box::new(FakeDemux {
        width: p.width,
        height: p.height,
        fragments,
    }));
    track(demux as usize, 0);
    demux.cast()
}

unsafe extern "C" fn demux_get_i(demux: *const WebPDemuxer, feature: c_int) -> u32 {
    // SAFETY: live demuxer from demux_new.
    let d = unsafe { &*demux.cast::<FakeDemux>() };
    match feature {
        WEBP_FF_CANVAS_WIDTH => d.width,
        WEBP_FF_CANVAS_HEIGHT => d.height,
        WEBP_FF_FRAME_COUNT => d.fragments.len() as u32,
        _ => 0,
    }
}

fn fill_iter(demux: *const FakeDemux, n: usize, iter: &mut WebPIterator) -> bool {
    // SAFETY: live demuxer from demux_new.
    let d = unsafe { &*demux };
    if n == 0 || n > d.fragments.len() {
        return false;
    }
    let frag = &d.fragments[n - 1];
    let fw = (d.width / 2).max(1);
    *iter = WebPIterator {
        frame_num: n as c_int,
        num_frames: d.fragments.len() as c_int,
        x_offset: if n % 2 == 0 { (d.width - fw) as c_int } else { 0 },
        y_offset: 0,
        width: fw as c_int,
        height: d.height as c_int,
        duration: 10 * n as c_int,
        dispose_method: 0,
        complete: 1,
        fragment: WebPData {
            bytes: frag.as_ptr(),
            size: frag.len(),
        },
        has_alpha: 1,
        blend_method: if n == 1 { WEBP_MUX_NO_BLEND } else { 0 },
        private_: demux.cast_mut().cast(),
        ..WebPIterator::zeroed()
    };
    true
}

unsafe extern "C" fn demux_get_frame(
    demux: *const WebPDemuxer,
    frame: c_int,
    iter: *mut WebPIterator,
) -> c_int {
    // SAFETY: valid out-pointer from the caller.
    let iter = unsafe { &mut *iter };
    if frame < 1 || !fill_iter(demux.cast(), frame as usize, iter) {
        return 0;
    }
    LEDGER.with(|l| l.borrow_mut().counters.iterators_acquired += 1);
    1
}

unsafe extern "C" fn demux_next_frame(iter: *mut WebPIterator) -> c_int {
    // SAFETY: iterator filled by demux_get_frame.
    let iter = unsafe { &mut *iter };
    let demux = iter.private_.cast::<FakeDemux>().cast_const();
    let next = iter.frame_num as usize + 1;
    fill_iter(demux, next, iter) as c_int
}

unsafe extern "C" fn demux_release_iterator(_iter: *mut WebPIterator) {
    LEDGER.with(|l| l.borrow_mut().counters.iterators_released += 1);
}

unsafe extern "C" fn demux_delete(demux: *mut WebPDemuxer) {
    if demux.is_null() {
        return;
    }
    untrack(demux as usize);
    // SAFETY: demux came from Box::into_raw in demux_new.
    drop(unsafe { Box::from_raw(demux.cast::<FakeDemux>()) });
}

/// Fresh fake table; also resets this thread's ledger.
pub fn fake_api() -> WebpApi {
    LEDGER.with(|l| *l.borrow_mut() = Ledger::default());
    WebpApi {
        get_decoder_version,
        get_info,
        get_features,
        init_decoder_config,
        decode,
        free_dec_buffer,
        decode_rgba,
        free,
        config_init,
        validate_config,
        picture_init,
        picture_import_rgba,
        picture_free,
        encode,
        memory_writer_init,
        memory_write,
        memory_writer_clear,
        demux_new,
        demux_get_i,
        demux_get_frame,
        demux_next_frame,
        demux_release_iterator,
        demux_delete,
    }
}
