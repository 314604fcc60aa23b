use xcb::x;

use crate::capturer::{CaptureError, ScreenGrabber};
use crate::frame::scale_nearest;
use crate::Size;

/// Grabs the root window with `GetImage`.
pub(crate) struct X11Grabber {
    conn: xcb::Connection,
    root: x::Window,
    native: Size,
}

impl X11Grabber {
    pub fn open() -> Result<Self, CaptureError> {
        let (conn, screen_num) =
            xcb::Connection::connect(None).map_err(|e| CaptureError::init("X11 connection", e))?;
        let setup = conn.get_setup();
        let Some(screen) = setup.roots().nth(screen_num as usize) else {
            return Err(CaptureError::init("X11 screen", "no root screen"));
        };

        let root = screen.root();
        let native = Size::new(
            screen.width_in_pixels() as u32,
            screen.height_in_pixels() as u32,
        );

        Ok(Self { conn, root, native })
    }
}

impl ScreenGrabber for X11Grabber {
    fn grab(&mut self, size: Size, frame: &mut [u8]) -> Result<(), CaptureError> {
        let cookie = self.conn.send_request(&x::GetImage {
            format: x::ImageFormat::ZPixmap,
            drawable: x::Drawable::Window(self.root),
            x: 0,
            y: 0,
            width: self.native.width as u16,
            height: self.native.height as u16,
            plane_mask: u32::MAX,
        });
        let img = self
            .conn
            .wait_for_reply(cookie)
            .map_err(|e| CaptureError::init("X11 GetImage", e))?;

        // 24 bit depth ZPixmaps are BGRx with 4 byte pixels
        let data = img.data();
        if data.len() < self.native.frame_len() {
            return Err(CaptureError::init(
                "X11 GetImage",
                format!("unexpected image size {} (depth {})", data.len(), img.depth()),
            ));
        }

        scale_nearest(
            data,
            self.native,
            self.native.width as usize * 4,
            size,
            frame,
        );

        Ok(())
    }
}

pub(crate) fn primary_display_size() -> Result<Size, CaptureError> {
    Ok(X11Grabber::open()?.native)
}
