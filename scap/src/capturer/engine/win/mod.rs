use std::sync::Once;

use log::debug;
use windows::Win32::UI::HiDpi::{
    SetProcessDpiAwarenessContext, DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2,
};
use windows::Win32::UI::WindowsAndMessaging::{GetSystemMetrics, SM_CXSCREEN, SM_CYSCREEN};

use crate::capturer::CaptureError;
use crate::Size;

mod duplication;
mod gdi;

pub(crate) use duplication::DuplicationCapturer;
pub(crate) use gdi::GdiGrabber;

/// Make screen metrics and GDI copies use physical pixels.
pub(crate) fn ensure_dpi_aware() {
    static DPI_AWARE: Once = Once::new();
    DPI_AWARE.call_once(|| {
        if let Err(err) =
            unsafe { SetProcessDpiAwarenessContext(DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2) }
        {
            // Already set by the manifest or an earlier call
            debug!("SetProcessDpiAwarenessContext failed: {err}");
        }
    });
}

pub(crate) fn native_size() -> Size {
    ensure_dpi_aware();
    let width = unsafe { GetSystemMetrics(SM_CXSCREEN) };
    let height = unsafe { GetSystemMetrics(SM_CYSCREEN) };
    Size::new(width.max(0) as u32, height.max(0) as u32)
}

pub(crate) fn primary_display_size() -> Result<Size, CaptureError> {
    let size = native_size();
    if size.width == 0 || size.height == 0 {
        return Err(CaptureError::init("display size query", "GetSystemMetrics returned 0"));
    }
    Ok(size)
}
