//! The control protocol: JSON request/response shapes and the binary decoded-frame
//! envelope.
//!
//! Requests arrive as a map of string keys to JSON values with one required field,
//! `cmd`. Unknown fields are ignored; a request missing a field a handler needs is a
//! parse failure (`ErrorCode::InvalidParam`), never a panic.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire error codes. Numeric values are the contract — do not renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0,
    InvalidParam = 1,
    InvalidState = 2,
    InvalidData = 3,
    InvalidFormat = 4,
    NullPointer = 5,
    OpenFileError = 6,
    Eof = 7,
    CodecError = 8,
    /// Internal only: an accurate-seek drop. Never surfaced to a client as an error
    /// reply.
    OldFrame = 9,
    Other = -1,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// `{cmd, code, msg}` — the shape of every error reply.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReply<'a> {
    pub cmd: &'a str,
    pub code: i32,
    pub msg: String,
}

impl<'a> ErrorReply<'a> {
    pub fn new(cmd: &'a str, code: ErrorCode, msg: impl Into<String>) -> Self {
        Self {
            cmd,
            code: code.code(),
            msg: msg.into(),
        }
    }
}

/// `openDecoder` success reply: the seven codec-info fields plus `cmd`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenDecoderResponse {
    pub cmd: &'static str,
    pub duration: i64,
    pub video_pix_fmt: i32,
    pub video_width: i32,
    pub video_height: i32,
    pub audio_sample_fmt: i32,
    pub audio_channels: i32,
    pub audio_sample_rate: i32,
}

impl OpenDecoderResponse {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        duration_ms: i64,
        video_pix_fmt: i32,
        video_width: i32,
        video_height: i32,
        audio_sample_fmt: i32,
        audio_channels: i32,
        audio_sample_rate: i32,
    ) -> Self {
        Self {
            cmd: "openDecoder",
            duration: duration_ms,
            video_pix_fmt,
            video_width,
            video_height,
            audio_sample_fmt,
            audio_channels,
            audio_sample_rate,
        }
    }
}

/// `{cmd:"requestData", offset, available}` — emitted by the server when the upload
/// buffer cannot serve a seek.
#[derive(Debug, Clone, Serialize)]
pub struct RequestDataMessage {
    pub cmd: &'static str,
    pub offset: i64,
    pub available: i64,
}

impl RequestDataMessage {
    pub fn new(offset: i64, available: i64) -> Self {
        Self {
            cmd: "requestData",
            offset,
            available,
        }
    }
}

/// Bare acknowledgement reply used by commands with no payload (`closeDecoder`,
/// `startDecode`, `stopDecode`, `uninitDecoder`).
#[derive(Debug, Clone, Serialize)]
pub struct AckReply<'a> {
    pub cmd: &'a str,
}

/// `initDecoder` request fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitDecoderRequest {
    pub file_size: i64,
    #[serde(default)]
    pub wait_header_length: Option<u32>,
}

/// `openDecoder` request fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenDecoderRequest {
    #[serde(default)]
    pub has_video: bool,
    #[serde(default)]
    pub has_audio: bool,
}

/// `seek` request fields (supplemental to the distilled command table: the engine
/// exposes `seek`, so the control surface must too).
#[derive(Debug, Clone, Deserialize)]
pub struct SeekRequest {
    pub ms: i64,
    #[serde(default)]
    pub accurate: bool,
}

/// Read the required `cmd` field out of a parsed JSON value.
pub fn read_cmd(value: &Value) -> Result<String, ErrorCode> {
    value
        .get("cmd")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(ErrorCode::InvalidParam)
}

/// Parse a request body into `T`, treating any missing/mistyped required field as
/// `InvalidParam` rather than propagating a raw JSON parse error.
pub fn parse_request<T: for<'de> Deserialize<'de>>(value: &Value) -> Result<T, ErrorCode> {
    serde_json::from_value(value.clone()).map_err(|_| ErrorCode::InvalidParam)
}

const TIMESTAMP_WIDTH: usize = 16;

/// Encode a timestamp as the fixed-width ASCII field used by the decoded envelope:
/// `"%.6f"`, then zero-padded (NUL, not space) to 16 bytes.
pub fn encode_timestamp(seconds: f64) -> [u8; TIMESTAMP_WIDTH] {
    let mut out = [0u8; TIMESTAMP_WIDTH];
    let text = format!("{seconds:.6}");
    let bytes = text.as_bytes();
    let n = bytes.len().min(TIMESTAMP_WIDTH);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

/// Parse the fixed-width ASCII timestamp field back into seconds.
pub fn decode_timestamp(field: &[u8; TIMESTAMP_WIDTH]) -> Result<f64, ErrorCode> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(TIMESTAMP_WIDTH);
    std::str::from_utf8(&field[..end])
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .ok_or(ErrorCode::InvalidData)
}

/// The binary decoded-frame envelope: `kind(1) ‖ timestamp_ascii(16) ‖ payload`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedKind {
    Video = 0,
    Audio = 1,
}

pub struct DecodedEnvelope;

impl DecodedEnvelope {
    /// Encode one decoded frame's envelope, appending into `out` (caller-owned, reused
    /// buffer).
    pub fn encode(out: &mut Vec<u8>, kind: DecodedKind, timestamp_seconds: f64, payload: &[u8]) {
        out.clear();
        out.push(kind as u8);
        out.extend_from_slice(&encode_timestamp(timestamp_seconds));
        out.extend_from_slice(payload);
    }

    /// Decode an envelope back into `(kind, timestamp, payload)`, for tests and for
    /// clients written against this crate.
    pub fn decode(bytes: &[u8]) -> Result<(DecodedKind, f64, &[u8]), ErrorCode> {
        if bytes.len() < 1 + TIMESTAMP_WIDTH {
            return Err(ErrorCode::InvalidData);
        }
        let kind = match bytes[0] {
            0 => DecodedKind::Video,
            1 => DecodedKind::Audio,
            _ => return Err(ErrorCode::InvalidData),
        };
        let mut ts_field = [0u8; TIMESTAMP_WIDTH];
        ts_field.copy_from_slice(&bytes[1..1 + TIMESTAMP_WIDTH]);
        let ts = decode_timestamp(&ts_field)?;
        Ok((kind, ts, &bytes[1 + TIMESTAMP_WIDTH..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_match_wire_contract() {
        assert_eq!(ErrorCode::Success.code(), 0);
        assert_eq!(ErrorCode::InvalidParam.code(), 1);
        assert_eq!(ErrorCode::CodecError.code(), 8);
        assert_eq!(ErrorCode::OldFrame.code(), 9);
        assert_eq!(ErrorCode::Other.code(), -1);
    }

    #[test]
    fn read_cmd_requires_field() {
        let v: Value = serde_json::from_str(r#"{"notCmd":1}"#).unwrap();
        assert_eq!(read_cmd(&v), Err(ErrorCode::InvalidParam));
    }

    #[test]
    fn parse_request_missing_field_is_invalid_param() {
        let v: Value = serde_json::from_str(r#"{"cmd":"initDecoder"}"#).unwrap();
        let err = parse_request::<InitDecoderRequest>(&v).unwrap_err();
        assert_eq!(err, ErrorCode::InvalidParam);
    }

    #[test]
    fn parse_request_unknown_fields_are_ignored() {
        let v: Value =
            serde_json::from_str(r#"{"cmd":"initDecoder","fileSize":10,"bogus":true}"#).unwrap();
        let req = parse_request::<InitDecoderRequest>(&v).unwrap();
        assert_eq!(req.file_size, 10);
        assert_eq!(req.wait_header_length, None);
    }

    #[test]
    fn timestamp_round_trips() {
        let field = encode_timestamp(1.5);
        assert_eq!(decode_timestamp(&field).unwrap(), 1.5);
    }

    #[test]
    fn timestamp_matches_printf_width() {
        let field = encode_timestamp(2.0);
        let text = std::str::from_utf8(&field).unwrap();
        assert!(text.starts_with("2.000000"));
    }

    #[test]
    fn envelope_round_trips_video() {
        let mut buf = Vec::new();
        DecodedEnvelope::encode(&mut buf, DecodedKind::Video, 0.5, &[1, 2, 3]);
        let (kind, ts, payload) = DecodedEnvelope::decode(&buf).unwrap();
        assert_eq!(kind, DecodedKind::Video);
        assert_eq!(ts, 0.5);
        assert_eq!(payload, &[1, 2, 3]);
    }

    #[test]
    fn envelope_decode_rejects_short_input() {
        assert_eq!(DecodedEnvelope::decode(&[0u8; 3]), Err(ErrorCode::InvalidData));
    }
}
