//! Thin, unsafe-at-the-edges wrapper around `ffmpeg-sys-next`: demuxer setup over a
//! custom `AVIOContext`, per-stream codec opening, packet pump, seek, and the
//! plane-copy helpers that turn an `AVFrame` into the bytes the wire envelope carries.
//!
//! Every `unsafe` block here corresponds to one FFmpeg call; the surrounding types
//! (`Demuxer`, `StreamDecoder`) own their pointers and free them in `Drop`, so a
//! caller never has to remember a matching `av_*_free`.

use std::ffi::c_void;
use std::os::raw::c_int;
use std::ptr;

use ffmpeg_sys_next as ff;

use crate::error::DecodeError;
use crate::io_bridge::{self, IoBridgeState, CUSTOM_IO_BUFFER_SIZE};

pub struct DecodedVideoFrame {
    pub pts_seconds: f64,
    pub width: i32,
    pub height: i32,
    /// Tightly packed Y, then U, then V planes (4:2:0 only — anything else is an
    /// `InvalidFormat` error before a frame is ever handed back).
    pub y: Vec<u8>,
    pub u: Vec<u8>,
    pub v: Vec<u8>,
}

pub struct DecodedAudioFrame {
    pub pts_seconds: f64,
    /// Interleaved PCM in the codec's native sample format (packed equivalent of a
    /// planar source).
    pub pcm: Vec<u8>,
}

pub enum DecodedFrame {
    Video(DecodedVideoFrame),
    Audio(DecodedAudioFrame),
}

pub struct CodecInfo {
    pub duration_ms: i64,
    pub video_pix_fmt: i32,
    pub video_width: i32,
    pub video_height: i32,
    pub audio_sample_fmt: i32,
    pub audio_channels: i32,
    pub audio_sample_rate: i32,
}

unsafe extern "C" fn av_log_to_tracing(
    _avcl: *mut c_void,
    level: c_int,
    fmt: *const std::os::raw::c_char,
    args: *mut ff::__va_list_tag,
) {
    let mut buf = [0i8; 1024];
    let n = ff::vsnprintf(buf.as_mut_ptr(), buf.len(), fmt, args);
    if n <= 0 {
        return;
    }
    let text = std::ffi::CStr::from_ptr(buf.as_ptr()).to_string_lossy();
    let text = text.trim_end();
    if text.is_empty() {
        return;
    }
    match level {
        l if l <= ff::AV_LOG_ERROR => tracing::error!(target: "ffmpeg", "{text}"),
        l if l <= ff::AV_LOG_WARNING => tracing::warn!(target: "ffmpeg", "{text}"),
        l if l <= ff::AV_LOG_INFO => tracing::info!(target: "ffmpeg", "{text}"),
        _ => tracing::debug!(target: "ffmpeg", "{text}"),
    }
}

/// Routes FFmpeg's internal `av_log` output through `tracing` instead of stderr.
pub fn install_log_bridge() {
    unsafe { ff::av_log_set_callback(Some(av_log_to_tracing)) };
}

fn ff_err(context: &str, code: c_int) -> DecodeError {
    let mut buf = [0i8; 256];
    unsafe { ff::av_strerror(code, buf.as_mut_ptr(), buf.len()) };
    let msg = unsafe { std::ffi::CStr::from_ptr(buf.as_ptr()) }
        .to_string_lossy()
        .into_owned();
    DecodeError::codec_error(format!("{context}: {msg} ({code})"))
}

/// Owns the custom `AVIOContext`/`AVFormatContext` pair and the leaked `IoBridgeState`
/// they point into.
pub struct Demuxer {
    fmt_ctx: *mut ff::AVFormatContext,
    io_ctx: *mut ff::AVIOContext,
    bridge_state: *mut IoBridgeState,
}

unsafe impl Send for Demuxer {}

impl Demuxer {
    /// Opens a demuxer whose `AVIOContext` calls back into `bridge_state` instead of
    /// reading a real file.
    pub fn open(bridge_state: Box<IoBridgeState>) -> Result<Self, DecodeError> {
        unsafe {
            let bridge_ptr = Box::into_raw(bridge_state);

            let io_buffer = ff::av_malloc(CUSTOM_IO_BUFFER_SIZE) as *mut u8;
            if io_buffer.is_null() {
                drop(Box::from_raw(bridge_ptr));
                return Err(DecodeError::other("out of memory allocating I/O buffer"));
            }

            let io_ctx = ff::avio_alloc_context(
                io_buffer,
                CUSTOM_IO_BUFFER_SIZE as c_int,
                0,
                bridge_ptr as *mut c_void,
                Some(io_bridge::read_packet),
                None,
                Some(io_bridge::seek),
            );
            if io_ctx.is_null() {
                ff::av_free(io_buffer as *mut c_void);
                drop(Box::from_raw(bridge_ptr));
                return Err(DecodeError::other("out of memory allocating AVIOContext"));
            }

            let mut fmt_ctx = ff::avformat_alloc_context();
            if fmt_ctx.is_null() {
                ff::avio_context_free(&mut (io_ctx as *mut _));
                drop(Box::from_raw(bridge_ptr));
                return Err(DecodeError::other("out of memory allocating AVFormatContext"));
            }
            (*fmt_ctx).pb = io_ctx;
            (*fmt_ctx).flags |= ff::AVFMT_FLAG_CUSTOM_IO;

            let ret = ff::avformat_open_input(
                &mut fmt_ctx,
                ptr::null(),
                ptr::null_mut(),
                ptr::null_mut(),
            );
            if ret < 0 {
                ff::avformat_close_input(&mut fmt_ctx);
                ff::avio_context_free(&mut (io_ctx as *mut _));
                drop(Box::from_raw(bridge_ptr));
                return Err(ff_err("avformat_open_input", ret));
            }

            let ret = ff::avformat_find_stream_info(fmt_ctx, ptr::null_mut());
            if ret < 0 {
                ff::avformat_close_input(&mut fmt_ctx);
                drop(Box::from_raw(bridge_ptr));
                return Err(ff_err("avformat_find_stream_info", ret));
            }

            Ok(Self {
                fmt_ctx,
                io_ctx,
                bridge_state: bridge_ptr,
            })
        }
    }

    pub fn find_best_stream(&self, kind: ff::AVMediaType) -> Option<i32> {
        let ret = unsafe {
            ff::av_find_best_stream(self.fmt_ctx, kind, -1, -1, ptr::null_mut(), 0)
        };
        if ret >= 0 {
            Some(ret)
        } else {
            None
        }
    }

    /// Duration in milliseconds, rounded up by 5ms the way the original does (so a
    /// duration that lands just under a millisecond boundary doesn't get truncated
    /// down a whole frame).
    pub fn duration_ms(&self) -> i64 {
        let duration_us = unsafe { (*self.fmt_ctx).duration };
        if duration_us <= 0 {
            0
        } else {
            1000 * (duration_us + 5000) / ff::AV_TIME_BASE as i64
        }
    }

    pub fn open_stream_decoder(&self, stream_index: i32) -> Result<StreamDecoder, DecodeError> {
        unsafe {
            let stream = *(*self.fmt_ctx).streams.offset(stream_index as isize);
            let params = (*stream).codecpar;
            let codec = ff::avcodec_find_decoder((*params).codec_id);
            if codec.is_null() {
                return Err(DecodeError::codec_error("no decoder for stream codec id"));
            }

            let codec_ctx = ff::avcodec_alloc_context3(codec);
            if codec_ctx.is_null() {
                return Err(DecodeError::other("out of memory allocating AVCodecContext"));
            }

            let ret = ff::avcodec_parameters_to_context(codec_ctx, params);
            if ret < 0 {
                ff::avcodec_free_context(&mut (codec_ctx as *mut _));
                return Err(ff_err("avcodec_parameters_to_context", ret));
            }

            let ret = ff::avcodec_open2(codec_ctx, codec, ptr::null_mut());
            if ret < 0 {
                ff::avcodec_free_context(&mut (codec_ctx as *mut _));
                return Err(ff_err("avcodec_open2", ret));
            }

            let time_base = (*stream).time_base;

            Ok(StreamDecoder {
                codec_ctx,
                stream_index,
                time_base,
            })
        }
    }

    /// Reads and decodes one packet's worth of frames, feeding it to whichever of
    /// `video`/`audio` owns its stream index. Returns the decoded frames produced (zero
    /// or more — a packet can yield zero frames, or (rarely) more than one).
    ///
    /// `Ok(None)` means "no data available this tick" (`EAGAIN` from the I/O bridge)
    /// rather than an error — the driver just ticks again. True end of stream is a
    /// distinct, terminal condition: it comes back as `Err(DecodeError::eof(..))` so
    /// the driver can log it once and stop, rather than spinning forever.
    pub fn pump(
        &mut self,
        video: Option<&mut StreamDecoder>,
        audio: Option<&mut StreamDecoder>,
    ) -> Result<Option<Vec<DecodedFrame>>, DecodeError> {
        unsafe {
            let packet = ff::av_packet_alloc();
            if packet.is_null() {
                return Err(DecodeError::other("out of memory allocating AVPacket"));
            }

            let ret = ff::av_read_frame(self.fmt_ctx, packet);
            if ret < 0 {
                ff::av_packet_free(&mut (packet as *mut _));
                if ret == ff::AVERROR(ff::EAGAIN) {
                    return Ok(None);
                }
                if ret == ff::AVERROR_EOF {
                    return Err(DecodeError::eof("end of stream"));
                }
                return Err(ff_err("av_read_frame", ret));
            }

            let stream_index = (*packet).stream_index;
            let decoder = if video.as_ref().is_some_and(|v| v.stream_index == stream_index) {
                video
            } else if audio.as_ref().is_some_and(|a| a.stream_index == stream_index) {
                audio
            } else {
                None
            };

            let Some(decoder) = decoder else {
                ff::av_packet_unref(packet);
                ff::av_packet_free(&mut (packet as *mut _));
                return Ok(Some(Vec::new()));
            };

            let frames = decoder.decode_packet(packet);
            ff::av_packet_unref(packet);
            ff::av_packet_free(&mut (packet as *mut _));
            frames.map(Some)
        }
    }

    pub fn seek(&mut self, stream_index: i32, timestamp: i64) -> Result<(), DecodeError> {
        let ret = unsafe {
            ff::avformat_seek_file(
                self.fmt_ctx,
                stream_index,
                i64::MIN,
                timestamp,
                i64::MAX,
                0,
            )
        };
        if ret < 0 {
            return Err(ff_err("avformat_seek_file", ret));
        }
        Ok(())
    }
}

impl Drop for Demuxer {
    fn drop(&mut self) {
        unsafe {
            ff::avformat_close_input(&mut self.fmt_ctx);
            // `avformat_close_input` frees the `AVIOContext` buffer via the demuxer's
            // own bookkeeping only when it allocated it; ours is custom, so free it
            // explicitly.
            if !self.io_ctx.is_null() {
                ff::avio_context_free(&mut self.io_ctx);
            }
            if !self.bridge_state.is_null() {
                drop(Box::from_raw(self.bridge_state));
            }
        }
    }
}

pub struct StreamDecoder {
    codec_ctx: *mut ff::AVCodecContext,
    pub stream_index: i32,
    time_base: ff::AVRational,
}

unsafe impl Send for StreamDecoder {}

impl StreamDecoder {
    pub fn media_type(&self) -> ff::AVMediaType {
        unsafe { (*self.codec_ctx).codec_type }
    }

    /// `(video_pix_fmt, width, height, audio_sample_fmt, sample_rate)`. The reported
    /// sample format is always the packed equivalent — clients never see a planar
    /// discriminator since `copy_pcm` always interleaves.
    pub fn info(&self) -> (i32, i32, i32, i32, i32) {
        unsafe {
            let ctx = &*self.codec_ctx;
            let packed_sample_fmt = ff::av_get_packed_sample_fmt(ctx.sample_fmt);
            (
                ctx.pix_fmt as i32,
                ctx.width,
                ctx.height,
                packed_sample_fmt as i32,
                ctx.sample_rate,
            )
        }
    }

    pub fn channels(&self) -> i32 {
        unsafe { (*self.codec_ctx).ch_layout.nb_channels }
    }

    pub fn time_base_pair(&self) -> (i32, i32) {
        (self.time_base.num, self.time_base.den)
    }

    fn pts_seconds(&self, pts: i64) -> f64 {
        if pts == ff::AV_NOPTS_VALUE {
            0.0
        } else {
            pts as f64 * self.time_base.num as f64 / self.time_base.den as f64
        }
    }

    fn decode_packet(&mut self, packet: *mut ff::AVPacket) -> Result<Vec<DecodedFrame>, DecodeError> {
        unsafe {
            let ret = ff::avcodec_send_packet(self.codec_ctx, packet);
            if ret < 0 && ret != ff::AVERROR(ff::EAGAIN) {
                return Err(ff_err("avcodec_send_packet", ret));
            }

            let mut out = Vec::new();
            let frame = ff::av_frame_alloc();
            if frame.is_null() {
                return Err(DecodeError::other("out of memory allocating AVFrame"));
            }

            loop {
                let ret = ff::avcodec_receive_frame(self.codec_ctx, frame);
                if ret == ff::AVERROR(ff::EAGAIN) || ret == ff::AVERROR_EOF {
                    break;
                }
                if ret < 0 {
                    ff::av_frame_free(&mut (frame as *mut _));
                    return Err(ff_err("avcodec_receive_frame", ret));
                }

                let pts = self.pts_seconds((*frame).pts);
                match self.media_type() {
                    ff::AVMediaType::AVMEDIA_TYPE_VIDEO => {
                        out.push(DecodedFrame::Video(copy_yuv420(&*frame, pts)?));
                    }
                    ff::AVMediaType::AVMEDIA_TYPE_AUDIO => {
                        out.push(DecodedFrame::Audio(copy_pcm(&*frame, pts)));
                    }
                    _ => {}
                }
                ff::av_frame_unref(frame);
            }

            ff::av_frame_free(&mut (frame as *mut _));
            Ok(out)
        }
    }

    pub fn flush(&mut self) {
        unsafe { ff::avcodec_flush_buffers(self.codec_ctx) };
    }
}

impl Drop for StreamDecoder {
    fn drop(&mut self) {
        unsafe { ff::avcodec_free_context(&mut self.codec_ctx) };
    }
}

/// Rejects anything that isn't planar 4:2:0 — the wire contract only ever carries
/// `YUV420P`/`YUVJ420P` video (TV-range and JPEG/full-range are both 4:2:0 planar and
/// copy identically; only the color range metadata differs).
fn copy_yuv420(frame: &ff::AVFrame, pts_seconds: f64) -> Result<DecodedVideoFrame, DecodeError> {
    let is_420 = frame.format == ff::AVPixelFormat::AV_PIX_FMT_YUV420P as i32
        || frame.format == ff::AVPixelFormat::AV_PIX_FMT_YUVJ420P as i32;
    if !is_420 {
        return Err(DecodeError::invalid_format(format!(
            "unsupported pixel format {}",
            frame.format
        )));
    }

    let width = frame.width;
    let height = frame.height;
    let chroma_w = (width + 1) / 2;
    let chroma_h = (height + 1) / 2;

    let y = copy_plane(frame.data[0], frame.linesize[0], width, height);
    let u = copy_plane(frame.data[1], frame.linesize[1], chroma_w, chroma_h);
    let v = copy_plane(frame.data[2], frame.linesize[2], chroma_w, chroma_h);

    Ok(DecodedVideoFrame {
        pts_seconds,
        width,
        height,
        y,
        u,
        v,
    })
}

fn copy_plane(data: *const u8, linesize: i32, width: i32, height: i32) -> Vec<u8> {
    let mut out = Vec::with_capacity((width * height) as usize);
    for row in 0..height {
        let src = unsafe { data.offset((row * linesize) as isize) };
        let slice = unsafe { std::slice::from_raw_parts(src, width as usize) };
        out.extend_from_slice(slice);
    }
    out
}

/// Interleaves planar (or copies already-packed) PCM, using the sample size of the
/// frame's own format rather than assuming 16-bit (e.g. AAC decodes to 4-byte `fltp`).
fn copy_pcm(frame: &ff::AVFrame, pts_seconds: f64) -> DecodedAudioFrame {
    let channels = frame.ch_layout.nb_channels;
    let samples = frame.nb_samples;
    let sample_fmt = unsafe { std::mem::transmute::<i32, ff::AVSampleFormat>(frame.format) };
    let bytes_per_sample = unsafe { ff::av_get_bytes_per_sample(sample_fmt) } as usize;
    let mut pcm = Vec::with_capacity((samples as usize) * (channels as usize) * bytes_per_sample);

    let planar = unsafe { ff::av_sample_fmt_is_planar(sample_fmt) != 0 };

    if planar {
        for s in 0..samples {
            for ch in 0..channels {
                let plane = frame.data[ch as usize];
                let sample_ptr = unsafe { plane.offset((s * bytes_per_sample as i32) as isize) };
                let bytes = unsafe { std::slice::from_raw_parts(sample_ptr, bytes_per_sample) };
                pcm.extend_from_slice(bytes);
            }
        }
    } else {
        let total = (samples as usize) * (channels as usize) * bytes_per_sample;
        let bytes = unsafe { std::slice::from_raw_parts(frame.data[0], total) };
        pcm.extend_from_slice(bytes);
    }

    DecodedAudioFrame { pts_seconds, pcm }
}
