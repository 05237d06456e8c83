//! Per-connection command dispatch: reads framed requests off a `TcpStream`, drives a
//! [`CodecEngine`], and writes framed replies/decoded-frame envelopes back.

use std::io::{BufReader, Read};
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use decoder_proto::control::{
    self, AckReply, DecodedEnvelope, DecodedKind, ErrorReply, InitDecoderRequest,
    OpenDecoderRequest, RequestDataMessage, SeekRequest,
};
use decoder_proto::wire::{self, FrameKind};
use serde_json::Value;

use crate::config::ServerConfig;
use crate::driver::Driver;
use crate::engine::CodecEngine;
use crate::error::DecodeError;
use crate::ffi::DecodedFrame;

type Writer = Arc<Mutex<TcpStream>>;

fn write_frame(writer: &Writer, kind: FrameKind, payload: &[u8]) -> std::io::Result<()> {
    let mut w = writer.lock().unwrap();
    wire::write_frame(&mut *w, kind, payload)
}

fn write_json(writer: &Writer, value: &impl serde::Serialize) {
    match serde_json::to_vec(value) {
        Ok(bytes) => {
            if let Err(err) = write_frame(writer, FrameKind::Text, &bytes) {
                tracing::warn!(%err, "failed to write reply frame");
            }
        }
        Err(err) => tracing::warn!(%err, "failed to serialize reply"),
    }
}

fn write_error(writer: &Writer, cmd: &str, err: &DecodeError) {
    write_json(writer, &ErrorReply::new(cmd, err.code, err.msg.clone()));
}

fn write_ack(writer: &Writer, cmd: &str) {
    write_json(writer, &AckReply { cmd });
}

pub fn run_one_client(stream: TcpStream, config: ServerConfig, temp_dir: PathBuf) {
    let peer = stream.peer_addr().ok();
    tracing::info!(?peer, "client connected");

    let mut reader = match stream.try_clone() {
        Ok(s) => BufReader::new(s),
        Err(err) => {
            tracing::warn!(%err, "failed to clone client stream");
            return;
        }
    };
    let writer: Writer = Arc::new(Mutex::new(stream));

    if let Err(err) = wire::write_prelude(&mut *writer.lock().unwrap()) {
        tracing::warn!(%err, "failed to write connection prelude");
        return;
    }
    if let Err(err) = wire::read_prelude(&mut reader) {
        tracing::warn!(%err, "failed to read connection prelude");
        return;
    }

    let engine = Arc::new(Mutex::new(CodecEngine::new(config.default_wait_header_length)));
    let mut driver: Option<Driver> = None;

    loop {
        let (kind, len) = match wire::read_frame_header(&mut reader) {
            Ok(header) => header,
            Err(err) => {
                tracing::debug!(%err, ?peer, "client disconnected");
                break;
            }
        };

        let mut payload = vec![0u8; len as usize];
        if let Err(err) = reader.read_exact(&mut payload) {
            tracing::warn!(%err, "short read on frame payload");
            break;
        }

        match kind {
            FrameKind::Binary => {
                if let Err(err) = engine.lock().unwrap().send_data(&payload) {
                    tracing::warn!(%err, "sendData rejected");
                }
            }
            FrameKind::Text => {
                handle_text_frame(&payload, &engine, &writer, &config, &temp_dir, &mut driver);
            }
        }
    }

    if let Some(mut d) = driver.take() {
        d.stop();
    }
    tracing::info!(?peer, "client disconnected");
}

fn handle_text_frame(
    payload: &[u8],
    engine: &Arc<Mutex<CodecEngine>>,
    writer: &Writer,
    config: &ServerConfig,
    temp_dir: &std::path::Path,
    driver: &mut Option<Driver>,
) {
    let value: Value = match serde_json::from_slice(payload) {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(%err, "malformed control frame, ignoring");
            return;
        }
    };

    let cmd = match control::read_cmd(&value) {
        Ok(cmd) => cmd,
        Err(_) => {
            tracing::warn!("control frame missing cmd, ignoring");
            return;
        }
    };

    let result = match cmd.as_str() {
        "initDecoder" => handle_init(&value, engine, config, temp_dir),
        "uninitDecoder" => engine.lock().unwrap().uninit(),
        "openDecoder" => {
            return handle_open(&value, &cmd, engine, writer);
        }
        "closeDecoder" => {
            if let Some(mut d) = driver.take() {
                d.stop();
            }
            engine.lock().unwrap().close()
        }
        "startDecode" => {
            let r = engine.lock().unwrap().start();
            if r.is_ok() {
                *driver = Some(spawn_driver(engine.clone(), writer.clone()));
            }
            r
        }
        "stopDecode" => {
            if let Some(mut d) = driver.take() {
                d.stop();
            }
            engine.lock().unwrap().stop()
        }
        "seek" => handle_seek(&value, engine),
        other => {
            tracing::warn!(cmd = other, "unknown command, ignoring");
            return;
        }
    };

    match result {
        Ok(()) => write_ack(writer, &cmd),
        Err(err) => write_error(writer, &cmd, &err),
    }
}

fn handle_init(
    value: &Value,
    engine: &Arc<Mutex<CodecEngine>>,
    config: &ServerConfig,
    temp_dir: &std::path::Path,
) -> crate::error::Result<()> {
    let req: InitDecoderRequest =
        control::parse_request(value).map_err(|c| DecodeError::new(c, "bad initDecoder request"))?;
    let temp_path = temp_dir.join(format!("upload-{}.tmp", monotonic_id()));
    engine.lock().unwrap().init(
        req.file_size,
        req.wait_header_length,
        temp_path,
        config.default_wait_header_length,
    )
}

fn handle_open(value: &Value, cmd: &str, engine: &Arc<Mutex<CodecEngine>>, writer: &Writer) {
    let req: OpenDecoderRequest = match control::parse_request(value) {
        Ok(r) => r,
        Err(code) => {
            write_error(writer, cmd, &DecodeError::new(code, "bad openDecoder request"));
            return;
        }
    };

    let writer_for_fill = writer.clone();
    let result = engine.lock().unwrap().open(req.has_video, req.has_audio, move |offset, available| {
        write_json(&writer_for_fill, &RequestDataMessage::new(offset, available));
    });

    match result {
        Ok(info) => {
            let reply = decoder_proto::OpenDecoderResponse::new(
                info.duration_ms,
                info.video_pix_fmt,
                info.video_width,
                info.video_height,
                info.audio_sample_fmt,
                info.audio_channels,
                info.audio_sample_rate,
            );
            write_json(writer, &reply);
        }
        Err(err) => write_error(writer, cmd, &err),
    }
}

fn handle_seek(value: &Value, engine: &Arc<Mutex<CodecEngine>>) -> crate::error::Result<()> {
    let req: SeekRequest =
        control::parse_request(value).map_err(|c| DecodeError::new(c, "bad seek request"))?;
    engine.lock().unwrap().seek(req.ms, req.accurate)
}

fn spawn_driver(engine: Arc<Mutex<CodecEngine>>, writer: Writer) -> Driver {
    let mut scratch = Vec::new();

    Driver::start(engine, move |frame: DecodedFrame| {
        let (kind, pts, payload): (DecodedKind, f64, Vec<u8>) = match frame {
            DecodedFrame::Video(v) => {
                let mut payload = Vec::with_capacity(v.y.len() + v.u.len() + v.v.len());
                payload.extend_from_slice(&v.y);
                payload.extend_from_slice(&v.u);
                payload.extend_from_slice(&v.v);
                (DecodedKind::Video, v.pts_seconds, payload)
            }
            DecodedFrame::Audio(a) => (DecodedKind::Audio, a.pts_seconds, a.pcm),
        };
        DecodedEnvelope::encode(&mut scratch, kind, pts, &payload);
        if let Err(err) = write_frame(&writer, FrameKind::Binary, &scratch) {
            tracing::warn!(%err, "failed to write decoded frame");
        }
    })
}

fn monotonic_id() -> u128 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}
