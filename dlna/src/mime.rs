use std::path::Path;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Resolve a MIME type from the file extension, case-insensitively.
pub fn mime_type(path: &Path) -> &'static str {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return OCTET_STREAM;
    };

    match ext.to_ascii_lowercase().as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "ts" => "video/mp2t",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        "aac" => "audio/aac",
        "m4a" => "audio/mp4",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        _ => OCTET_STREAM,
    }
}

/// DLNA profile name advertised in `contentFeatures.dlna.org`.
pub fn dlna_profile(mime: &str) -> &'static str {
    if mime.contains("mp4") {
        "AVC_MP4_MP_SD_AAC_MULT5"
    } else {
        "*"
    }
}
