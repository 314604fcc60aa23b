use super::{CaptureError, VideoCapturer};
use crate::Size;

#[cfg(target_os = "windows")]
mod win;

#[cfg(all(target_os = "linux", feature = "x11"))]
mod linux;

#[cfg(target_os = "windows")]
pub(crate) fn hardware_capturer() -> Result<Box<dyn VideoCapturer>, CaptureError> {
    Ok(Box::new(win::DuplicationCapturer::new()?))
}

#[cfg(not(target_os = "windows"))]
pub(crate) fn hardware_capturer() -> Result<Box<dyn VideoCapturer>, CaptureError> {
    Err(CaptureError::Unsupported("desktop duplication"))
}

#[cfg(target_os = "windows")]
pub(crate) fn software_capturer() -> Result<Box<dyn VideoCapturer>, CaptureError> {
    Ok(Box::new(super::SoftwareCapturer::new(
        "gdi",
        win::GdiGrabber::open,
    )?))
}

#[cfg(all(target_os = "linux", feature = "x11"))]
pub(crate) fn software_capturer() -> Result<Box<dyn VideoCapturer>, CaptureError> {
    Ok(Box::new(super::SoftwareCapturer::new(
        "x11",
        linux::X11Grabber::open,
    )?))
}

#[cfg(not(any(target_os = "windows", all(target_os = "linux", feature = "x11"))))]
pub(crate) fn software_capturer() -> Result<Box<dyn VideoCapturer>, CaptureError> {
    Err(CaptureError::Unsupported("software screen capture"))
}

#[cfg(target_os = "windows")]
pub(crate) fn primary_display_size() -> Result<Size, CaptureError> {
    win::primary_display_size()
}

#[cfg(all(target_os = "linux", feature = "x11"))]
pub(crate) fn primary_display_size() -> Result<Size, CaptureError> {
    linux::primary_display_size()
}

#[cfg(not(any(target_os = "windows", all(target_os = "linux", feature = "x11"))))]
pub(crate) fn primary_display_size() -> Result<Size, CaptureError> {
    Err(CaptureError::Unsupported("display size query"))
}
