use std::path::PathBuf;

use clap::Parser;
use decoder_server::cli::{self, Args};
use decoder_server::config::ServerConfig;
use decoder_server::{ffi, server};

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,decoder_server=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn temp_dir() -> anyhow::Result<PathBuf> {
    let dir = std::env::temp_dir().join("decoder-server");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn cleanup_temp_dir(dir: &std::path::Path) {
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let _ = std::fs::remove_file(entry.path());
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    ffi::install_log_bridge();

    let args = Args::parse();
    let port = cli::resolve_port(args.port.as_deref())?;
    let config = ServerConfig::with_port(port);
    let temp_dir = temp_dir()?;

    {
        let cleanup_dir = temp_dir.clone();
        ctrlc::set_handler(move || {
            tracing::info!("received interrupt, cleaning up temp files");
            cleanup_temp_dir(&cleanup_dir);
            std::process::exit(0);
        })?;
    }

    let result = server::run(config, temp_dir.clone());
    cleanup_temp_dir(&temp_dir);
    result
}
