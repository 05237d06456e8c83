//! Wire-level primitives shared between the decode server and its clients.
//!
//! Two concerns live here, deliberately kept separate:
//! - [`wire`]: the raw framing that carries frames over a single TCP connection.
//! - [`control`]: the JSON control protocol and the binary decoded-frame envelope.

pub mod control;
pub mod wire;

pub use control::{DecodedEnvelope, ErrorCode, OpenDecoderResponse, RequestDataMessage};
pub use wire::{read_frame_header, read_prelude, write_frame, write_prelude, FrameKind};
