//! The decode-driver thread: ticks roughly every 5ms while a session is in the
//! `Decoding` state, pulling one frame's worth of work out of the engine per tick and
//! handing it to the session for framing and delivery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use decoder_proto::ErrorCode;

use crate::engine::CodecEngine;
use crate::ffi::DecodedFrame;

const TICK_INTERVAL: Duration = Duration::from_millis(5);

pub struct Driver {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Driver {
    /// Exceptions from `pull_one` are logged and never terminate the tick loop, except
    /// true end-of-stream: that's logged once and halts the driver, since there is
    /// nothing further to pull.
    pub fn start(engine: Arc<Mutex<CodecEngine>>, mut on_frame: impl FnMut(DecodedFrame) + Send + 'static) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = stop.clone();

        let handle = thread::spawn(move || {
            while !stop_for_thread.load(Ordering::Relaxed) {
                let decoding = engine.lock().unwrap().is_decoding();
                if !decoding {
                    break;
                }

                match engine.lock().unwrap().pull_one() {
                    Ok(Some(frame)) => on_frame(frame),
                    Ok(None) => {}
                    Err(err) if err.code == ErrorCode::Eof => {
                        tracing::info!(%err, "decode reached end of stream, stopping driver");
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(%err, "pullOne failed, continuing");
                    }
                }

                thread::sleep(TICK_INTERVAL);
            }
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.stop();
    }
}
