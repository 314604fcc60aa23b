//! DIDL-Lite fragments passed as `CurrentURIMetaData`.

use std::path::Path;

use crate::mime::mime_type;
use crate::xml_escape;

/// Operation and flag fields advertised for seekable files.
pub const FILE_DLNA_FEATURES: &str =
    "DLNA.ORG_OP=01;DLNA.ORG_CI=0;DLNA.ORG_FLAGS=01700000000000000000000000000000";

pub const LIVE_PROTOCOL_INFO: &str =
    "http-get:*:video/mpeg:DLNA.ORG_PN=MPEG_TS_SD_EU_ISO;DLNA.ORG_OP=10;DLNA.ORG_CI=1";
pub const LIVE_TITLE: &str = "Live Screen";
pub const LIVE_CLASS: &str = "object.item.videoItem.videoBroadcast";

/// UPnP item class for a MIME type.
pub fn item_class(mime: &str) -> &'static str {
    if mime.starts_with("audio/") {
        "object.item.audioItem"
    } else if mime.starts_with("image/") {
        "object.item.imageItem"
    } else {
        "object.item.videoItem"
    }
}

fn item(title: &str, class: &str, protocol_info: &str, url: &str) -> String {
    format!(
        "<DIDL-Lite xmlns=\"urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/\" \
         xmlns:dc=\"http://purl.org/dc/elements/1.1/\" \
         xmlns:upnp=\"urn:schemas-upnp-org:metadata-1-0/upnp/\">\
         <item id=\"0\" parentID=\"0\" restricted=\"1\">\
         <dc:title>{}</dc:title>\
         <upnp:class>{}</upnp:class>\
         <res protocolInfo=\"{}\">{}</res>\
         </item></DIDL-Lite>",
        xml_escape(title),
        xml_escape(class),
        xml_escape(protocol_info),
        xml_escape(url),
    )
}

/// Metadata for a local file served at `url`. The title is the file name.
pub fn file_metadata(path: &Path, url: &str) -> String {
    let mime = mime_type(path);
    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let protocol_info = format!("http-get:*:{mime}:{FILE_DLNA_FEATURES}");

    item(&title, item_class(mime), &protocol_info, url)
}

pub fn live_metadata(url: &str) -> String {
    item(LIVE_TITLE, LIVE_CLASS, LIVE_PROTOCOL_INFO, url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_item() {
        let meta = file_metadata(
            Path::new("/media/Tom & Jerry.mp4"),
            "http://192.168.1.3:40000/Tom%20%26%20Jerry.mp4",
        );
        assert!(meta.contains("<dc:title>Tom &amp; Jerry.mp4</dc:title>"));
        assert!(meta.contains("<upnp:class>object.item.videoItem</upnp:class>"));
        assert!(meta.contains(
            "protocolInfo=\"http-get:*:video/mp4:DLNA.ORG_OP=01;DLNA.ORG_CI=0;\
             DLNA.ORG_FLAGS=01700000000000000000000000000000\""
        ));
        assert!(meta.contains(">http://192.168.1.3:40000/Tom%20%26%20Jerry.mp4</res>"));
        assert!(!meta.contains("Tom & Jerry"));
    }

    #[test]
    fn classes() {
        assert_eq!(item_class("audio/mpeg"), "object.item.audioItem");
        assert_eq!(item_class("image/png"), "object.item.imageItem");
        assert_eq!(item_class("video/x-msvideo"), "object.item.videoItem");
        assert_eq!(item_class("application/octet-stream"), "object.item.videoItem");

        let meta = file_metadata(Path::new("a.flac"), "http://h/a.flac");
        assert!(meta.contains("object.item.audioItem"));
        assert!(meta.contains("http-get:*:audio/flac:"));
    }

    #[test]
    fn live_item() {
        let meta = live_metadata("http://192.168.1.3:40001/live.ts");
        assert!(meta.starts_with("<DIDL-Lite xmlns=\"urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/\""));
        assert!(meta.contains("<dc:title>Live Screen</dc:title>"));
        assert!(meta.contains("<upnp:class>object.item.videoItem.videoBroadcast</upnp:class>"));
        assert!(meta.contains(
            "protocolInfo=\"http-get:*:video/mpeg:DLNA.ORG_PN=MPEG_TS_SD_EU_ISO;DLNA.ORG_OP=10;DLNA.ORG_CI=1\""
        ));
        assert!(meta.contains("<item id=\"0\" parentID=\"0\" restricted=\"1\">"));
        assert!(meta.ends_with("</item></DIDL-Lite>"));
    }
}
