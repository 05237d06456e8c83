//! Plain, non-file configuration: a handful of tunables with sane defaults, set from
//! the command line rather than loaded from a config file.

pub const DEFAULT_PORT: u16 = 9002;
pub const DEFAULT_WORKER_THREADS: usize = 4;
pub const DEFAULT_WAIT_HEADER_LENGTH: u32 = 512 * 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub worker_threads: usize,
    pub default_wait_header_length: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            worker_threads: DEFAULT_WORKER_THREADS,
            default_wait_header_length: DEFAULT_WAIT_HEADER_LENGTH,
        }
    }
}

impl ServerConfig {
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }
}
