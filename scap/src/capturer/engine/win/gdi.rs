use windows::Win32::Foundation::{HANDLE, HWND};
use windows::Win32::Graphics::Gdi::{
    CreateCompatibleDC, CreateDIBSection, DeleteDC, DeleteObject, GdiFlush, GetDC, ReleaseDC,
    SelectObject, SetStretchBltMode, StretchBlt, BITMAPINFO, BITMAPINFOHEADER, BI_RGB,
    COLORONCOLOR, DIB_RGB_COLORS, HBITMAP, HDC, HGDIOBJ, SRCCOPY,
};

use super::native_size;
use crate::capturer::{CaptureError, ScreenGrabber};
use crate::Size;

/// Target sized DIB section the screen is stretched into.
struct Surface {
    size: Size,
    dc: HDC,
    bitmap: HBITMAP,
    previous: HGDIOBJ,
    bits: *const u8,
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            SelectObject(self.dc, self.previous);
            let _ = DeleteObject(self.bitmap);
            let _ = DeleteDC(self.dc);
        }
    }
}

/// GDI `StretchBlt` screen copy.
pub(crate) struct GdiGrabber {
    screen_dc: HDC,
    native: Size,
    surface: Option<Surface>,
}

impl GdiGrabber {
    pub fn open() -> Result<Self, CaptureError> {
        let native = native_size();
        let screen_dc = unsafe { GetDC(HWND::default()) };
        if screen_dc.is_invalid() {
            return Err(CaptureError::init("GDI screen DC", "GetDC failed"));
        }

        Ok(Self {
            screen_dc,
            native,
            surface: None,
        })
    }

    fn ensure_surface(&mut self, size: Size) -> Result<(), CaptureError> {
        if self.surface.as_ref().is_some_and(|s| s.size == size) {
            return Ok(());
        }
        self.surface = None;

        let dc = unsafe { CreateCompatibleDC(self.screen_dc) };
        if dc.is_invalid() {
            return Err(CaptureError::init("GDI memory DC", "CreateCompatibleDC failed"));
        }

        let info = BITMAPINFO {
            bmiHeader: BITMAPINFOHEADER {
                biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                biWidth: size.width as i32,
                // Negative height gives top-down rows
                biHeight: -(size.height as i32),
                biPlanes: 1,
                biBitCount: 32,
                biCompression: BI_RGB.0,
                ..Default::default()
            },
            ..Default::default()
        };

        let mut bits = std::ptr::null_mut();
        let bitmap = match unsafe {
            CreateDIBSection(
                self.screen_dc,
                &info,
                DIB_RGB_COLORS,
                &mut bits,
                HANDLE::default(),
                0,
            )
        } {
            Ok(bitmap) if !bits.is_null() => bitmap,
            Ok(_) => {
                unsafe {
                    let _ = DeleteDC(dc);
                }
                return Err(CaptureError::init("GDI DIB section", "no pixel buffer"));
            }
            Err(err) => {
                unsafe {
                    let _ = DeleteDC(dc);
                }
                return Err(CaptureError::init("GDI DIB section", err));
            }
        };

        let previous = unsafe { SelectObject(dc, bitmap) };
        unsafe {
            SetStretchBltMode(dc, COLORONCOLOR);
        }

        self.surface = Some(Surface {
            size,
            dc,
            bitmap,
            previous,
            bits: bits as *const u8,
        });

        Ok(())
    }
}

impl ScreenGrabber for GdiGrabber {
    fn grab(&mut self, size: Size, frame: &mut [u8]) -> Result<(), CaptureError> {
        self.ensure_surface(size)?;
        let Some(surface) = self.surface.as_ref() else {
            return Err(CaptureError::init("GDI DIB section", "missing surface"));
        };
        let (native, screen_dc) = (self.native, self.screen_dc);

        let ok = unsafe {
            StretchBlt(
                surface.dc,
                0,
                0,
                size.width as i32,
                size.height as i32,
                screen_dc,
                0,
                0,
                native.width as i32,
                native.height as i32,
                SRCCOPY,
            )
        };
        if !ok.as_bool() {
            return Err(CaptureError::init("GDI screen copy", "StretchBlt failed"));
        }

        unsafe {
            let _ = GdiFlush();
            let pixels = std::slice::from_raw_parts(surface.bits, size.frame_len());
            frame.copy_from_slice(pixels);
        }

        Ok(())
    }
}

impl Drop for GdiGrabber {
    fn drop(&mut self) {
        self.surface = None;
        unsafe {
            ReleaseDC(HWND::default(), self.screen_dc);
        }
    }
}
