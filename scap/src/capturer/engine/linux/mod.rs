mod x11;

pub(crate) use x11::{primary_display_size, X11Grabber};
