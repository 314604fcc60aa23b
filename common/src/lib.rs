use std::sync::OnceLock;

use log::LevelFilter;
use tokio::runtime::Runtime;

pub mod channel;
pub mod net;

pub use channel::{ChannelCloser, ChannelError, ChannelWriter, DuplexByteChannel};

/// Process wide multi-threaded runtime for callers that are not already inside one.
pub fn runtime() -> std::io::Result<&'static Runtime> {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();
    if let Some(rt) = RUNTIME.get() {
        return Ok(rt);
    }
    let rt = Runtime::new()?;
    Ok(RUNTIME.get_or_init(|| rt))
}

pub fn default_log_level() -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}
