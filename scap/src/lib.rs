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

pub mod audio;
pub mod capturer;
pub mod frame;

pub use audio::AudioLoopbackCapturer;
pub use capturer::{
    primary_display_size, start_video_capturer, CaptureError, ScreenGrabber, SoftwareCapturer,
    VideoCapturer,
};

/// Frames are always delivered at this rate.
pub const FRAME_RATE: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Bytes in one packed BGRA frame.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Encode size for a display of size `native`.
///
/// Anything wider than 1280 or larger than 1080p is captured at 1280x720, everything else at
/// native size rounded down to even dimensions.
pub fn capture_size(native: Size) -> Size {
    if native.width > 1280 || native.height > 1080 {
        Size::new(1280, 720)
    } else {
        Size::new(native.width & !1, native.height & !1)
    }
}
