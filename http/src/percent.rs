#[inline]
const fn hex_decode(hex: u8) -> Option<u8> {
    match hex {
        b'0'..=b'9' => Some(hex - b'0'),
        b'A'..=b'F' => Some(hex - b'A' + 0xA),
        b'a'..=b'f' => Some(hex - b'a' + 0xA),
        _ => None,
    }
}

#[inline]
const fn hex_encode(b: u8) -> char {
    match b {
        0x0..=0x9 => (b'0' + b) as char,
        _ => (b'A' + b - 0xA) as char,
    }
}

/// Percent-encode a single path segment.
///
/// Only RFC 3986 unreserved characters are left as is, so the file extension survives and
/// '/' is encoded.
pub fn encode_segment(s: &str) -> String {
    let mut res = String::with_capacity(s.len());

    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                res.push(b as char)
            }
            _ => {
                res.push('%');
                res.push(hex_encode(b >> 4));
                res.push(hex_encode(b & 0x0F));
            }
        }
    }

    res
}

/// Decode a percent-encoded path. Returns `None` for truncated escapes or invalid UTF-8.
pub fn decode_path(s: &str) -> Option<String> {
    let mut res: Vec<u8> = Vec::with_capacity(s.len());
    let s = s.as_bytes();
    let mut i = 0;
    while i < s.len() {
        match s[i] {
            b'%' if i + 2 < s.len() => {
                let hi = hex_decode(s[i + 1])?;
                let lo = hex_decode(s[i + 2])?;
                res.push((hi << 4) | lo);
                i += 3;
            }
            b'%' => return None,
            b => {
                res.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8(res).ok()
}
