//! TCP accept loop with a fixed-size worker pool: the listener thread hands each
//! accepted connection to a pool of `worker_threads` via a bounded channel, so a burst
//! of connects can't spawn an unbounded number of OS threads.

use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::thread;

use crossbeam_channel::{bounded, Sender};

use crate::config::ServerConfig;
use crate::session;

pub fn run(config: ServerConfig, temp_dir: PathBuf) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", config.port))?;
    tracing::info!(port = config.port, workers = config.worker_threads, "listening");

    let (tx, rx) = bounded::<TcpStream>(config.worker_threads * 2);

    for worker_id in 0..config.worker_threads {
        let rx = rx.clone();
        let config = config.clone();
        let temp_dir = temp_dir.clone();
        thread::spawn(move || {
            tracing::debug!(worker_id, "worker started");
            for stream in rx.iter() {
                session::run_one_client(stream, config.clone(), temp_dir.clone());
            }
        });
    }

    accept_loop(listener, tx)
}

fn accept_loop(listener: TcpListener, tx: Sender<TcpStream>) -> anyhow::Result<()> {
    for incoming in listener.incoming() {
        match incoming {
            Ok(stream) => {
                if tx.send(stream).is_err() {
                    tracing::warn!("worker pool channel closed, stopping accept loop");
                    break;
                }
            }
            Err(err) => tracing::warn!(%err, "failed to accept connection"),
        }
    }
    Ok(())
}
