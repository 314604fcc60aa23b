//! UPnP/DLNA control point pieces needed to push media to a renderer.

pub mod control;
pub mod description;
pub mod device;
pub mod didl;
pub mod discovery;
pub mod mime;

pub use control::{ControlClient, ControlError, SoapFault};
pub use description::{parse_description, DescriptionError};
pub use device::{Device, Service, AV_TRANSPORT};
pub use discovery::{DeviceFinder, DiscoveryConfig, DiscoveryEvent};

/// Escape the characters that may not appear verbatim in XML text or attribute values.
pub fn xml_escape(s: &str) -> String {
    let mut res = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => res.push_str("&amp;"),
            '<' => res.push_str("&lt;"),
            '>' => res.push_str("&gt;"),
            '"' => res.push_str("&quot;"),
            _ => res.push(ch),
        }
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(xml_escape("Tom & Jerry"), "Tom &amp; Jerry");
        assert_eq!(
            xml_escape(r#"<a href="x">"#),
            "&lt;a href=&quot;x&quot;&gt;"
        );
        assert_eq!(xml_escape("plain"), "plain");
    }
}
