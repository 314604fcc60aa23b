use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use common::{ChannelCloser, ChannelWriter};
use log::{debug, warn};

pub(crate) const JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// A capture thread that is stopped by clearing its running flag and closing its channel.
pub(crate) struct Worker {
    name: &'static str,
    running: Arc<AtomicBool>,
    closer: Option<ChannelCloser>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn<F>(name: &'static str, output: ChannelWriter, f: F) -> std::io::Result<Self>
    where
        F: FnOnce(&AtomicBool, ChannelWriter) + Send + 'static,
    {
        let closer = output.closer()?;
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = Arc::clone(&running);

        let handle = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                f(&running_clone, output);
                running_clone.store(false, Ordering::Release);
                debug!("{name} capture thread exited");
            })?;

        Ok(Self {
            name,
            running,
            closer: Some(closer),
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);

        // Unblocks a thread stuck writing to a slow encoder
        if let Some(closer) = self.closer.take() {
            closer.close();
        }

        let Some(handle) = self.handle.take() else {
            return;
        };

        let deadline = Instant::now() + JOIN_TIMEOUT;
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        if handle.is_finished() {
            if handle.join().is_err() {
                warn!("{} capture thread panicked", self.name);
            }
        } else {
            warn!(
                "{} capture thread did not exit within {JOIN_TIMEOUT:?}, detaching it",
                self.name
            );
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}
