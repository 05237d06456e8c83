//! Command-line surface: a single optional positional port argument.

use anyhow::{bail, Context, Result};
use clap::Parser;

use crate::config::DEFAULT_PORT;

#[derive(Parser, Debug)]
#[command(name = "decoder-server", about = "Streaming media decode server")]
pub struct Args {
    /// TCP port to listen on. Defaults to 9002 when omitted.
    pub port: Option<String>,
}

/// Resolve the raw CLI argument into a validated port, defaulting when absent.
///
/// A port is only accepted in `1..=65535`; anything else (non-numeric, zero,
/// out-of-range) is a fatal startup error.
pub fn resolve_port(arg: Option<&str>) -> Result<u16> {
    let Some(raw) = arg else {
        return Ok(DEFAULT_PORT);
    };

    let parsed: i64 = raw
        .parse()
        .with_context(|| format!("invalid port argument {raw:?}"))?;

    if !(1..=65535).contains(&parsed) {
        bail!("port {parsed} out of range (1..65535)");
    }

    Ok(parsed as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_absent() {
        assert_eq!(resolve_port(None).unwrap(), DEFAULT_PORT);
    }

    #[test]
    fn accepts_in_range_port() {
        assert_eq!(resolve_port(Some("8080")).unwrap(), 8080);
    }

    #[test]
    fn rejects_zero() {
        assert!(resolve_port(Some("0")).is_err());
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(resolve_port(Some("70000")).is_err());
    }

    #[test]
    fn rejects_non_numeric() {
        assert!(resolve_port(Some("abc")).is_err());
    }
}
