//! The custom `AVIOContext` read/seek callbacks that let the demuxer pull bytes out of
//! a session's [`UploadBuffer`] instead of a real file.
//!
//! Ported from the read/seek callback pair in the decoder this system replaces: a
//! small buffer handed to `avio_alloc_context`, backed here by an `Arc<Mutex<..>>`
//! instead of a raw `this` pointer.

use std::ffi::c_void;
use std::os::raw::c_int;
use std::sync::{Arc, Mutex};

use ffmpeg_sys_next as ff;

use crate::upload_buffer::{SeekOutcome, SeekWhence, UploadBuffer};

pub const CUSTOM_IO_BUFFER_SIZE: usize = 32 * 1024;

/// Shared state the read/seek callbacks close over via an opaque pointer.
///
/// `on_need_fill` is invoked (without the buffer lock held) whenever a seek lands
/// outside the buffered window, so the session can send the client a `requestData`
/// message.
pub struct IoBridgeState {
    pub buffer: Arc<Mutex<UploadBuffer>>,
    pub on_need_fill: Box<dyn Fn(i64, i64) + Send + Sync>,
}

impl IoBridgeState {
    pub fn new(
        buffer: Arc<Mutex<UploadBuffer>>,
        on_need_fill: impl Fn(i64, i64) + Send + Sync + 'static,
    ) -> Self {
        Self {
            buffer,
            on_need_fill: Box::new(on_need_fill),
        }
    }
}

/// `avio_alloc_context` read callback.
///
/// # Safety
/// `opaque` must point to a live `IoBridgeState` for the duration of the call, and
/// `buf`/`buf_size` must describe a valid writable buffer — guaranteed by FFmpeg's own
/// `AVIOContext` contract.
pub unsafe extern "C" fn read_packet(opaque: *mut c_void, buf: *mut u8, buf_size: c_int) -> c_int {
    if opaque.is_null() || buf.is_null() || buf_size <= 0 {
        return ff::AVERROR_EINVAL;
    }
    let state = &*(opaque as *const IoBridgeState);
    let slice = std::slice::from_raw_parts_mut(buf, buf_size as usize);

    let mut guard = match state.buffer.lock() {
        Ok(g) => g,
        Err(_) => return ff::AVERROR_UNKNOWN,
    };
    let n = guard.read(slice);
    if n > 0 {
        return n;
    }
    if !guard.is_stream() && guard.available() <= 0 {
        return ff::AVERROR_EOF;
    }
    ff::AVERROR(ff::EAGAIN)
}

/// `avio_alloc_context` seek callback.
///
/// # Safety
/// Same contract as [`read_packet`].
pub unsafe extern "C" fn seek(opaque: *mut c_void, offset: i64, whence: c_int) -> i64 {
    if opaque.is_null() {
        return ff::AVERROR_EINVAL as i64;
    }
    let state = &*(opaque as *const IoBridgeState);

    let resolved = match whence & !ff::AVSEEK_FORCE {
        libc_seek_set if libc_seek_set == ff::SEEK_SET as c_int => SeekWhence::Start,
        libc_seek_cur if libc_seek_cur == ff::SEEK_CUR as c_int => SeekWhence::Current,
        libc_seek_end if libc_seek_end == ff::SEEK_END as c_int => SeekWhence::End,
        w if w == ff::AVSEEK_SIZE as c_int => SeekWhence::Size,
        _ => return ff::AVERROR_EINVAL as i64,
    };

    let mut guard = match state.buffer.lock() {
        Ok(g) => g,
        Err(_) => return ff::AVERROR_UNKNOWN as i64,
    };

    match guard.seek(offset, resolved) {
        SeekOutcome::Ok(pos) => pos,
        SeekOutcome::NeedFill { offset, available } => {
            drop(guard);
            (state.on_need_fill)(offset, available);
            ff::AVERROR(ff::EAGAIN) as i64
        }
        SeekOutcome::Rejected => ff::AVERROR_EINVAL as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload_buffer::RingBuffer;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn seek_cur_on_stream_reports_need_fill_path_is_unreachable_and_rejects() {
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        let state = IoBridgeState::new(
            Arc::new(Mutex::new(UploadBuffer::Stream(RingBuffer::new()))),
            move |_, _| flag.store(true, Ordering::SeqCst),
        );

        let ret = unsafe { seek(&state as *const _ as *mut c_void, 0, ff::SEEK_CUR as c_int) };
        assert_eq!(ret, ff::AVERROR_EINVAL as i64);
        assert!(!called.load(Ordering::SeqCst));
    }

    #[test]
    fn read_packet_on_empty_stream_is_eagain() {
        let state = IoBridgeState::new(
            Arc::new(Mutex::new(UploadBuffer::Stream(RingBuffer::new()))),
            |_, _| {},
        );
        let mut out = [0u8; 4];
        let ret = unsafe {
            read_packet(&state as *const _ as *mut c_void, out.as_mut_ptr(), out.len() as c_int)
        };
        assert_eq!(ret, ff::AVERROR(ff::EAGAIN));
    }
}
