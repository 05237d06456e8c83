//! Domain errors: everything a command handler or the decode engine can fail with,
//! carrying the same numeric code the wire contract expects in an error reply.

use std::fmt;

use decoder_proto::ErrorCode;

#[derive(Debug, Clone)]
pub struct DecodeError {
    pub code: ErrorCode,
    pub msg: String,
}

impl DecodeError {
    pub fn new(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
        }
    }

    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParam, msg)
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidState, msg)
    }

    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidData, msg)
    }

    pub fn invalid_format(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidFormat, msg)
    }

    pub fn open_file_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::OpenFileError, msg)
    }

    pub fn eof(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Eof, msg)
    }

    pub fn codec_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::CodecError, msg)
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Other, msg)
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.msg, self.code.code())
    }
}

impl std::error::Error for DecodeError {}

pub type Result<T> = std::result::Result<T, DecodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code() {
        let err = DecodeError::invalid_state("not opened");
        assert_eq!(err.to_string(), "not opened (code 2)");
    }
}
