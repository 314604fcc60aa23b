// Copyright (C) 2025 Marcus L. Hanestad <marlhan@proton.me>
//
// This file is part of DLNA Sender.
//
// DLNA Sender is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// DLNA Sender is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with DLNA Sender.  If not, see <https://www.gnu.org/licenses/>.

use common::ChannelWriter;
use log::{info, warn};

use crate::Size;

pub(crate) mod engine;
mod software;
mod worker;

pub use software::{ScreenGrabber, SoftwareCapturer};
pub(crate) use worker::Worker;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
    #[error("failed to initialize {what}: {reason}")]
    Init { what: &'static str, reason: String },
    #[error("no usable screen capturer (hardware: {hardware}; software: {software})")]
    NoCapturer {
        hardware: Box<CaptureError>,
        software: Box<CaptureError>,
    },
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl CaptureError {
    #[cfg(any(target_os = "windows", all(target_os = "linux", feature = "x11")))]
    pub(crate) fn init(what: &'static str, reason: impl ToString) -> Self {
        Self::Init {
            what,
            reason: reason.to_string(),
        }
    }
}

/// Produces packed BGRA frames of a fixed size into a channel.
pub trait VideoCapturer: Send {
    fn name(&self) -> &'static str;

    /// Start writing `size` frames into `output` from a dedicated thread.
    ///
    /// The thread exits when `output` is closed or [`VideoCapturer::stop`] is called.
    fn start(&mut self, size: Size, output: ChannelWriter) -> Result<(), CaptureError>;

    /// Stop the capture thread, waiting a bounded amount of time for it to exit.
    fn stop(&mut self);
}

/// Size of the primary display in physical pixels.
pub fn primary_display_size() -> Result<Size, CaptureError> {
    engine::primary_display_size()
}

/// Start the best available capturer, preferring hardware desktop duplication.
pub fn start_video_capturer(
    size: Size,
    output: ChannelWriter,
) -> Result<Box<dyn VideoCapturer>, CaptureError> {
    let mut capturer = match engine::hardware_capturer() {
        Ok(capturer) => capturer,
        Err(hardware) => {
            warn!("Hardware capture unavailable ({hardware}), falling back to software capture");
            engine::software_capturer().map_err(|software| CaptureError::NoCapturer {
                hardware: Box::new(hardware),
                software: Box::new(software),
            })?
        }
    };

    capturer.start(size, output)?;
    info!("Capturing the screen at {size} with the {} capturer", capturer.name());

    Ok(capturer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(any(target_os = "windows", all(target_os = "linux", feature = "x11")))]
    #[test]
    fn init_error_names_the_step() {
        let err = CaptureError::init("desktop duplication", "access denied");
        assert_eq!(
            err.to_string(),
            "failed to initialize desktop duplication: access denied"
        );
    }

    #[test]
    fn no_capturer_reports_both_failures() {
        let err = CaptureError::NoCapturer {
            hardware: Box::new(CaptureError::Unsupported("desktop duplication")),
            software: Box::new(CaptureError::Unsupported("screen copy")),
        };
        let message = err.to_string();
        assert!(message.contains("desktop duplication is not supported"));
        assert!(message.contains("screen copy is not supported"));
    }
}
