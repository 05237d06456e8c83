//! The per-session decode state machine: `Idle -> Initialized -> Opened -> Decoding`,
//! plus the reverse transitions (`stopDecode`, `closeDecoder`, `uninitDecoder`).
//!
//! Every public method checks the current state first and returns
//! `ErrorCode::InvalidState` for an illegal transition rather than panicking — a
//! misbehaving client can throw commands in any order and the worst that happens is an
//! error reply.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ffmpeg_sys_next as ff;

use crate::error::{DecodeError, Result};
use crate::ffi::{CodecInfo, DecodedFrame, Demuxer, StreamDecoder};
use crate::io_bridge::IoBridgeState;
use crate::upload_buffer::{FileBuffer, RingBuffer, UploadBuffer};

const HEADER_WAIT_RETRY_SLEEP: Duration = Duration::from_millis(5);
const HEADER_WAIT_MAX_RETRIES: u32 = 2000; // ~10s

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Initialized,
    Opened,
    Decoding,
}

pub struct CodecEngine {
    state: State,
    buffer: Option<Arc<Mutex<UploadBuffer>>>,
    wait_header_length: u32,
    demuxer: Option<Demuxer>,
    video: Option<StreamDecoder>,
    audio: Option<StreamDecoder>,
    pending_seek_target: Option<f64>,
    pending_frames: VecDeque<DecodedFrame>,
}

impl CodecEngine {
    pub fn new(default_wait_header_length: u32) -> Self {
        Self {
            state: State::Idle,
            buffer: None,
            wait_header_length: default_wait_header_length,
            demuxer: None,
            video: None,
            audio: None,
            pending_seek_target: None,
            pending_frames: VecDeque::new(),
        }
    }

    /// `initDecoder`. `file_size <= 0` selects stream mode (unbounded ring); otherwise
    /// a bounded temp file of exactly `file_size` bytes is created at `temp_path`.
    ///
    /// The `waitHeaderLength` fix: the argument only overrides the default when it is
    /// itself positive. The original checked the *current* field instead of the
    /// argument, so passing 0 explicitly silently zeroed out the real default.
    pub fn init(
        &mut self,
        file_size: i64,
        wait_header_length: Option<u32>,
        temp_path: PathBuf,
        default_wait_header_length: u32,
    ) -> Result<()> {
        if self.state != State::Idle {
            return Err(DecodeError::invalid_state("initDecoder requires Idle state"));
        }

        self.wait_header_length = default_wait_header_length;
        if let Some(n) = wait_header_length {
            if n > 0 {
                self.wait_header_length = n;
            }
        }

        let buffer = if file_size >= 0 {
            UploadBuffer::File(
                FileBuffer::create(temp_path, file_size)
                    .map_err(|e| DecodeError::open_file_error(e.to_string()))?,
            )
        } else {
            UploadBuffer::Stream(RingBuffer::new())
        };

        self.buffer = Some(Arc::new(Mutex::new(buffer)));
        self.state = State::Initialized;
        Ok(())
    }

    pub fn uninit(&mut self) -> Result<()> {
        if self.state == State::Decoding {
            return Err(DecodeError::invalid_state("uninitDecoder requires stopDecode first"));
        }
        self.demuxer = None;
        self.video = None;
        self.audio = None;
        self.buffer = None;
        self.pending_frames.clear();
        self.pending_seek_target = None;
        self.state = State::Idle;
        Ok(())
    }

    pub fn send_data(&self, bytes: &[u8]) -> Result<usize> {
        if self.state == State::Idle {
            return Err(DecodeError::invalid_state("sendData requires an initialized session"));
        }
        let buffer = self.buffer.as_ref().expect("buffer set once Initialized");
        Ok(buffer.lock().unwrap().append(bytes))
    }

    pub fn buffer_handle(&self) -> Option<Arc<Mutex<UploadBuffer>>> {
        self.buffer.clone()
    }

    fn wait_for_header(&self) -> Result<()> {
        let buffer = self.buffer.as_ref().expect("buffer set once Initialized");
        {
            let guard = buffer.lock().unwrap();
            if guard.is_stream() {
                return Ok(());
            }
        }

        for _ in 0..HEADER_WAIT_MAX_RETRIES {
            let available = buffer.lock().unwrap().available();
            if available >= self.wait_header_length as i64 {
                return Ok(());
            }
            thread::sleep(HEADER_WAIT_RETRY_SLEEP);
        }
        Err(DecodeError::eof("timed out waiting for enough header data"))
    }

    /// `openDecoder`. Blocks (briefly) until at least `waitHeaderLength` bytes of a
    /// bounded upload are available; stream-mode sessions proceed immediately and let
    /// probing itself back off via the I/O bridge's `EAGAIN`.
    pub fn open(
        &mut self,
        has_video: bool,
        has_audio: bool,
        on_need_fill: impl Fn(i64, i64) + Send + Sync + 'static,
    ) -> Result<CodecInfo> {
        if self.state != State::Initialized {
            return Err(DecodeError::invalid_state("openDecoder requires Initialized state"));
        }

        self.wait_for_header()?;

        let buffer = self.buffer.as_ref().expect("buffer set once Initialized").clone();
        let bridge = Box::new(IoBridgeState::new(buffer, on_need_fill));
        let mut demuxer = Demuxer::open(bridge)?;

        let video = if has_video {
            demuxer
                .find_best_stream(ff::AVMediaType::AVMEDIA_TYPE_VIDEO)
                .map(|idx| demuxer.open_stream_decoder(idx))
                .transpose()?
        } else {
            None
        };
        let audio = if has_audio {
            demuxer
                .find_best_stream(ff::AVMediaType::AVMEDIA_TYPE_AUDIO)
                .map(|idx| demuxer.open_stream_decoder(idx))
                .transpose()?
        } else {
            None
        };

        if video.is_none() && audio.is_none() {
            return Err(DecodeError::invalid_data("no requested stream found"));
        }

        let (video_pix_fmt, video_width, video_height) = video
            .as_ref()
            .map(|v| {
                let (pix_fmt, w, h, _, _) = v.info();
                (pix_fmt, w, h)
            })
            .unwrap_or((0, 0, 0));
        let (audio_sample_fmt, audio_channels, audio_sample_rate) = audio
            .as_ref()
            .map(|a| {
                let (_, _, _, fmt, rate) = a.info();
                (fmt, a.channels(), rate)
            })
            .unwrap_or((0, 0, 0));

        let info = CodecInfo {
            duration_ms: demuxer.duration_ms(),
            video_pix_fmt,
            video_width,
            video_height,
            audio_sample_fmt,
            audio_channels,
            audio_sample_rate,
        };

        self.demuxer = Some(demuxer);
        self.video = video;
        self.audio = audio;
        self.state = State::Opened;
        Ok(info)
    }

    pub fn close(&mut self) -> Result<()> {
        if self.state == State::Decoding {
            return Err(DecodeError::invalid_state("closeDecoder requires stopDecode first"));
        }
        if self.state != State::Opened {
            return Err(DecodeError::invalid_state("closeDecoder requires Opened state"));
        }
        self.demuxer = None;
        self.video = None;
        self.audio = None;
        self.pending_frames.clear();
        self.pending_seek_target = None;
        self.state = State::Initialized;
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        if self.state != State::Opened {
            return Err(DecodeError::invalid_state("startDecode requires Opened state"));
        }
        self.state = State::Decoding;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        if self.state != State::Decoding {
            return Err(DecodeError::invalid_state("stopDecode requires Decoding state"));
        }
        self.state = State::Opened;
        Ok(())
    }

    pub fn is_decoding(&self) -> bool {
        self.state == State::Decoding
    }

    pub fn seek(&mut self, ms: i64, accurate: bool) -> Result<()> {
        if self.state != State::Opened && self.state != State::Decoding {
            return Err(DecodeError::invalid_state("seek requires an opened session"));
        }

        let (stream_index, time_base) = if let Some(v) = &self.video {
            (v.stream_index, v.time_base_pair())
        } else if let Some(a) = &self.audio {
            (a.stream_index, a.time_base_pair())
        } else {
            return Err(DecodeError::invalid_state("no stream to seek"));
        };

        let target_seconds = ms as f64 / 1000.0;
        let timestamp = (target_seconds * time_base.1 as f64 / time_base.0 as f64) as i64;

        self.demuxer
            .as_mut()
            .expect("demuxer set once Opened")
            .seek(stream_index, timestamp)?;

        if let Some(v) = &mut self.video {
            v.flush();
        }
        if let Some(a) = &mut self.audio {
            a.flush();
        }
        self.pending_frames.clear();
        self.pending_seek_target = if accurate { Some(target_seconds) } else { None };
        Ok(())
    }

    /// Pulls and decodes one packet's worth of frames, applying the accurate-seek drop
    /// filter, and returns the next frame to emit. `Ok(None)` means "nothing ready this
    /// tick" — the driver should just tick again.
    pub fn pull_one(&mut self) -> Result<Option<DecodedFrame>> {
        if self.state != State::Decoding {
            return Err(DecodeError::invalid_state("pullOne requires Decoding state"));
        }

        loop {
            if let Some(frame) = self.pending_frames.pop_front() {
                if self.should_drop(&frame) {
                    continue;
                }
                return Ok(Some(frame));
            }

            let demuxer = self.demuxer.as_mut().expect("demuxer set once Opened");
            let produced = demuxer.pump(self.video.as_mut(), self.audio.as_mut())?;
            match produced {
                None => return Ok(None),
                Some(frames) if frames.is_empty() => return Ok(None),
                Some(frames) => {
                    self.pending_frames.extend(frames);
                }
            }
        }
    }

    fn should_drop(&mut self, frame: &DecodedFrame) -> bool {
        let Some(target) = self.pending_seek_target else {
            return false;
        };
        let pts = match frame {
            DecodedFrame::Video(v) => v.pts_seconds,
            DecodedFrame::Audio(a) => a.pts_seconds,
        };
        if pts + f64::EPSILON < target {
            true
        } else {
            self.pending_seek_target = None;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut engine = CodecEngine::new(512 * 1024);
        assert!(engine.start().is_err());
        assert!(engine.close().is_err());
        assert!(engine.uninit().is_ok());
    }

    #[test]
    fn wait_header_length_zero_argument_keeps_default() {
        let mut engine = CodecEngine::new(512 * 1024);
        let path = std::env::temp_dir().join(format!("decoder-server-test-{}", std::process::id()));
        engine.init(1024, Some(0), path, 512 * 1024).unwrap();
        assert_eq!(engine.wait_header_length, 512 * 1024);
    }

    #[test]
    fn wait_header_length_positive_argument_overrides() {
        let mut engine = CodecEngine::new(512 * 1024);
        let path = std::env::temp_dir().join(format!("decoder-server-test2-{}", std::process::id()));
        engine.init(1024, Some(4096), path, 512 * 1024).unwrap();
        assert_eq!(engine.wait_header_length, 4096);
    }

    #[test]
    fn send_data_before_init_is_invalid_state() {
        let engine = CodecEngine::new(512 * 1024);
        assert!(engine.send_data(b"x").is_err());
    }
}
