//! Connection framing: a magic+version prelude followed by `kind:u8 + len:u32 LE + payload`
//! frames.
//!
//! The two frame kinds carry everything the rest of the system needs: `Text` for JSON
//! control requests/replies, `Binary` for upload payload bytes (client→server) and
//! decoded-frame envelopes (server→client).

use std::io::{self, Read, Write};

pub const MAGIC: [u8; 4] = *b"MDEC";
pub const VERSION: u16 = 1;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text = 0x01,
    Binary = 0x02,
}

impl FrameKind {
    pub fn from_u8(b: u8) -> io::Result<Self> {
        match b {
            0x01 => Ok(FrameKind::Text),
            0x02 => Ok(FrameKind::Binary),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown frame kind {b:#x}"),
            )),
        }
    }
}

/// Connection prelude: magic + version, written once per connection.
pub fn write_prelude(mut w: impl Write) -> io::Result<()> {
    w.write_all(&MAGIC)?;
    w.write_all(&VERSION.to_le_bytes())?;
    Ok(())
}

/// Read and validate the connection prelude.
pub fn read_prelude(mut r: impl Read) -> io::Result<()> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad magic"));
    }

    let mut ver = [0u8; 2];
    r.read_exact(&mut ver)?;
    let version = u16::from_le_bytes(ver);
    if version != VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported version {version}"),
        ));
    }

    Ok(())
}

/// Write a frame header + payload.
pub fn write_frame(mut w: impl Write, kind: FrameKind, payload: &[u8]) -> io::Result<()> {
    w.write_all(&[kind as u8])?;
    let len: u32 = payload
        .len()
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "payload too large"))?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(payload)?;
    Ok(())
}

/// Read a frame header and return `(kind, len)`. The caller reads exactly `len` payload
/// bytes next.
pub fn read_frame_header(mut r: impl Read) -> io::Result<(FrameKind, u32)> {
    let mut kindb = [0u8; 1];
    r.read_exact(&mut kindb)?;
    let kind = FrameKind::from_u8(kindb[0])?;

    let mut lenb = [0u8; 4];
    r.read_exact(&mut lenb)?;
    let len = u32::from_le_bytes(lenb);
    Ok((kind, len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prelude_round_trips() {
        let mut buf = Vec::new();
        write_prelude(&mut buf).unwrap();
        read_prelude(&buf[..]).unwrap();
    }

    #[test]
    fn prelude_rejects_bad_magic() {
        let err = read_prelude(&b"XXXX\x01\x00"[..]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn frame_round_trips() {
        let mut buf = Vec::new();
        write_frame(&mut buf, FrameKind::Binary, b"hello").unwrap();
        let (kind, len) = read_frame_header(&buf[..]).unwrap();
        assert_eq!(kind, FrameKind::Binary);
        assert_eq!(len, 5);
        assert_eq!(&buf[5..], b"hello");
    }

    #[test]
    fn unknown_frame_kind_errors() {
        let err = FrameKind::from_u8(0x7f).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
