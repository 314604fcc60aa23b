use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use common::ChannelWriter;
use log::{debug, error};

use super::{CaptureError, VideoCapturer, Worker};
use crate::{Size, FRAME_RATE};

/// Copies the visible screen into memory.
///
/// Implementations are opened on the capture thread, so they need not be `Send`.
pub trait ScreenGrabber {
    /// Fill `frame` with a packed BGRA image of `size`, scaling when it differs from the
    /// native screen size.
    fn grab(&mut self, size: Size, frame: &mut [u8]) -> Result<(), CaptureError>;
}

pub type OpenGrabber<G> = fn() -> Result<G, CaptureError>;

/// Fixed interval capture loop over a [`ScreenGrabber`].
pub struct SoftwareCapturer<G: ScreenGrabber + 'static> {
    name: &'static str,
    open: OpenGrabber<G>,
    interval: Duration,
    worker: Option<Worker>,
}

impl<G: ScreenGrabber + 'static> SoftwareCapturer<G> {
    /// Opens the grabber once to check that capture works here.
    pub fn new(name: &'static str, open: OpenGrabber<G>) -> Result<Self, CaptureError> {
        drop(open()?);
        Ok(Self {
            name,
            open,
            interval: Duration::from_secs(1) / FRAME_RATE,
            worker: None,
        })
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(Worker::is_running)
    }
}

fn capture_loop<G: ScreenGrabber>(
    open: OpenGrabber<G>,
    size: Size,
    interval: Duration,
    running: &AtomicBool,
    mut output: ChannelWriter,
) {
    let mut grabber = match open() {
        Ok(g) => g,
        Err(err) => {
            error!("Failed to open screen grabber: {err}");
            return;
        }
    };
    let mut frame = vec![0u8; size.frame_len()];

    while running.load(Ordering::Acquire) {
        let start = Instant::now();

        if let Err(err) = grabber.grab(size, &mut frame) {
            error!("Screen grab failed: {err}");
            break;
        }

        if let Err(err) = output.write_all(&frame) {
            debug!("Video channel closed: {err}");
            break;
        }

        let elapsed = start.elapsed();
        if elapsed < interval {
            std::thread::sleep(interval - elapsed);
        }
    }
}

impl<G: ScreenGrabber + 'static> VideoCapturer for SoftwareCapturer<G> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn start(&mut self, size: Size, output: ChannelWriter) -> Result<(), CaptureError> {
        self.stop();

        let open = self.open;
        let interval = self.interval;
        self.worker = Some(Worker::spawn(self.name, output, move |running, output| {
            capture_loop(open, size, interval, running, output)
        })?);

        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
    }
}
