use std::{error::Error, fmt::Display};

use tokio::io::{AsyncRead, AsyncReadExt};

mod percent;
mod range;

pub use percent::{decode_path, encode_segment};
pub use range::{ByteRange, RangeError, parse_range};

/// Upper bound on the size of a request head (start line and headers).
pub const MAX_HEAD_LEN: usize = 16 * 1024;

/// Upper bound on a request body read by [`RequestReader`].
pub const MAX_BODY_LEN: usize = 1024 * 1024;

#[derive(Debug, PartialEq, Eq)]
pub enum HttpError {
    StartLineEmpty,
    InvalidRequestMethod,
    StartLineMissingTarget,
    InvalidRequestTarget,
    StartLineMissingVersion,
    StartLineInvalidVersion,
    InvalidHeaderKey,
    InvalidHeaderValue,
    Read,
    InvalidRequest,
    InvalidContentLength,
    HeadTooLarge,
}

impl Error for HttpError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        None
    }
}

impl Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            HttpError::StartLineEmpty => "empty start line",
            HttpError::InvalidRequestMethod => "invalid request method",
            HttpError::StartLineMissingTarget => "start line is missing the target",
            HttpError::InvalidRequestTarget => "invalid request target",
            HttpError::StartLineMissingVersion => "start line is missing the version",
            HttpError::StartLineInvalidVersion => "invalid HTTP version",
            HttpError::InvalidHeaderKey => "invalid header key",
            HttpError::InvalidHeaderValue => "invalid header value",
            HttpError::Read => "failed to read request",
            HttpError::InvalidRequest => "malformed request",
            HttpError::InvalidContentLength => "invalid content length",
            HttpError::HeadTooLarge => "request head too large",
        };
        f.write_str(msg)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RequestMethod {
    Get,
    Post,
    Head,
    Delete,
    Put,
    Connect,
    Options,
    Trace,
    Patch,
}

impl RequestMethod {
    pub fn from_slice(method: &[u8]) -> Option<Self> {
        match method {
            b"GET" => Some(Self::Get),
            b"POST" => Some(Self::Post),
            b"HEAD" => Some(Self::Head),
            b"DELETE" => Some(Self::Delete),
            b"PUT" => Some(Self::Put),
            b"CONNECT" => Some(Self::Connect),
            b"OPTIONS" => Some(Self::Options),
            b"TRACE" => Some(Self::Trace),
            b"PATCH" => Some(Self::Patch),
            _ => None,
        }
    }

    pub fn to_str(&self) -> &'static str {
        match self {
            RequestMethod::Get => "GET",
            RequestMethod::Post => "POST",
            RequestMethod::Head => "HEAD",
            RequestMethod::Delete => "DELETE",
            RequestMethod::Put => "PUT",
            RequestMethod::Connect => "CONNECT",
            RequestMethod::Options => "OPTIONS",
            RequestMethod::Trace => "TRACE",
            RequestMethod::Patch => "PATCH",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum HttpVersion {
    ZeroDotNine,
    One,
    OneDotOne,
    Two,
    Three,
}

impl HttpVersion {
    pub fn from_slice(version: &[u8]) -> Option<Self> {
        match version {
            b"HTTP/0.9" => Some(Self::ZeroDotNine),
            b"HTTP/1.0" => Some(Self::One),
            b"HTTP/1.1" => Some(Self::OneDotOne),
            b"HTTP/2" => Some(Self::Two),
            b"HTTP/3" => Some(Self::Three),
            _ => None,
        }
    }

    pub fn to_str(&self) -> &'static str {
        match self {
            HttpVersion::ZeroDotNine => "HTTP/0.9",
            HttpVersion::One => "HTTP/1.0",
            HttpVersion::OneDotOne => "HTTP/1.1",
            HttpVersion::Two => "HTTP/2",
            HttpVersion::Three => "HTTP/3",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct RequestStartLine {
    pub method: RequestMethod,
    pub target: String,
    pub version: HttpVersion,
}

impl RequestStartLine {
    /// Takes in a start line buffer with the "\r\n" suffix removed and returns the parsed value
    pub fn parse(buf: &[u8]) -> Result<Self, HttpError> {
        if buf.is_empty() {
            return Err(HttpError::StartLineEmpty);
        }

        let mut i = 0;
        // Method
        while i < buf.len() && buf[i] != b' ' {
            i += 1;
        }

        let method =
            RequestMethod::from_slice(&buf[0..i]).ok_or(HttpError::InvalidRequestMethod)?;

        i += 1;

        if i >= buf.len() {
            return Err(HttpError::StartLineMissingTarget);
        }

        let mut j = i;
        // Target
        while j < buf.len() && buf[j] != b' ' {
            j += 1;
        }

        let target =
            String::from_utf8(buf[i..j].to_vec()).map_err(|_| HttpError::InvalidRequestTarget)?;

        j += 1;

        if j >= buf.len() {
            return Err(HttpError::StartLineMissingVersion);
        }

        let version =
            HttpVersion::from_slice(&buf[j..]).ok_or(HttpError::StartLineInvalidVersion)?;

        Ok(Self {
            method,
            target,
            version,
        })
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Header {
    pub key: String,
    pub value: String,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Takes in a header buffer with the "\r\n" suffix removed and returns the parsed value.
    ///
    /// Whitespace around the value is optional, renderers are not consistent about it.
    pub fn parse(header: &[u8]) -> Result<Self, HttpError> {
        let mut i = 0;
        // Key
        while i < header.len() && header[i] != b':' && header[i] != b' ' {
            i += 1;
        }

        if i >= header.len() || header[i] == b' ' {
            return Err(HttpError::InvalidHeaderKey);
        }

        let key =
            String::from_utf8(header[0..i].to_vec()).map_err(|_| HttpError::InvalidHeaderKey)?;

        if key.is_empty() {
            return Err(HttpError::InvalidHeaderKey);
        }

        i += 1;

        let value = std::str::from_utf8(&header[i..])
            .map_err(|_| HttpError::InvalidHeaderValue)?
            .trim();

        Ok(Self {
            key,
            value: value.to_owned(),
        })
    }

    pub fn serialize_with_crlf_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.key.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(self.value.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
}

#[inline]
fn extract_line(buf: &[u8]) -> Option<&[u8]> {
    let mut i = 0;
    while i < buf.len() && buf[i] != b'\r' {
        i += 1;
    }

    if i + 1 >= buf.len() || buf[i + 1] != b'\n' {
        return None;
    }

    Some(&buf[0..i])
}

#[derive(Debug, PartialEq, Eq)]
pub struct Request {
    pub start_line: RequestStartLine,
    pub headers: Vec<Header>,
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn parse(buf: &[u8]) -> Result<Self, HttpError> {
        let (mut request, head_len, content_length) = Self::parse_head(buf)?;

        if content_length > 0 {
            if head_len + content_length > buf.len() {
                return Err(HttpError::InvalidContentLength);
            }

            request.body = Some(buf[head_len..head_len + content_length].to_vec());
        }

        Ok(request)
    }

    /// Parses the start line and headers. Returns the request without its body, the length
    /// of the head including the blank line, and the declared content length.
    fn parse_head(buf: &[u8]) -> Result<(Self, usize, usize), HttpError> {
        let start_line_buf = extract_line(buf).ok_or(HttpError::InvalidRequest)?;
        let start_line = RequestStartLine::parse(start_line_buf)?;

        let mut headers: Vec<Header> = Vec::new();
        let mut content_length = 0;

        let mut i = start_line_buf.len() + 2;
        while i < buf.len() && buf[i] != b'\r' {
            let header_buf = extract_line(&buf[i..]).ok_or(HttpError::InvalidRequest)?;
            let header = Header::parse(header_buf)?;

            if header.key.eq_ignore_ascii_case("Content-Length") {
                content_length = header
                    .value
                    .parse::<usize>()
                    .map_err(|_| HttpError::InvalidContentLength)?;
            }

            headers.push(header);

            i += header_buf.len() + 2;
        }

        if i + 1 >= buf.len() || buf[i + 1] != b'\n' {
            return Err(HttpError::InvalidRequest);
        }

        let request = Self {
            start_line,
            headers,
            body: None,
        };

        Ok((request, i + 2, content_length))
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.key.eq_ignore_ascii_case(key))
            .map(|h| h.value.as_str())
    }
}

/// Index one past the "\r\n\r\n" terminating a request head.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Reads consecutive requests from one connection.
///
/// Bytes received after a request are kept for the next call, so keep-alive clients that send
/// their next request early are handled. A body announced with `Content-Length` is read into
/// [`Request::body`].
pub struct RequestReader {
    buf: Vec<u8>,
}

impl Default for RequestReader {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestReader {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(1024),
        }
    }

    /// Returns `Ok(None)` when the peer closed the connection before sending anything.
    pub async fn read_head<R>(&mut self, reader: &mut R) -> Result<Option<Request>, HttpError>
    where
        R: AsyncRead + Unpin,
    {
        let end = loop {
            if let Some(end) = find_head_end(&self.buf) {
                break end;
            }

            if self.buf.len() > MAX_HEAD_LEN {
                return Err(HttpError::HeadTooLarge);
            }

            if !self.fill(reader).await? {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(HttpError::InvalidRequest)
                };
            }
        };

        let parsed = Request::parse_head(&self.buf[..end]);
        let (mut request, head_len, content_length) = match parsed {
            Ok(parsed) => parsed,
            Err(err) => {
                self.buf.drain(..end);
                return Err(err);
            }
        };

        if content_length > MAX_BODY_LEN {
            return Err(HttpError::InvalidContentLength);
        }

        let total = head_len + content_length;
        while self.buf.len() < total {
            if !self.fill(reader).await? {
                return Err(HttpError::InvalidContentLength);
            }
        }

        if content_length > 0 {
            request.body = Some(self.buf[head_len..total].to_vec());
        }
        self.buf.drain(..total);

        Ok(Some(request))
    }

    /// Appends the next chunk from `reader`. Returns `false` at end of stream.
    async fn fill<R>(&mut self, reader: &mut R) -> Result<bool, HttpError>
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = [0; 4096];
        let bytes_read = reader.read(&mut chunk).await.map_err(|_| HttpError::Read)?;
        self.buf.extend_from_slice(&chunk[0..bytes_read]);
        Ok(bytes_read > 0)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    PartialContent,
    BadRequest,
    NotFound,
    RangeNotSatisfiable,
    InternalServerError,
    NotImplemented,
}

impl StatusCode {
    pub fn to_str(&self) -> &'static str {
        match self {
            StatusCode::Ok => "200 OK",
            StatusCode::PartialContent => "206 Partial Content",
            StatusCode::BadRequest => "400 Bad Request",
            StatusCode::NotFound => "404 Not Found",
            StatusCode::RangeNotSatisfiable => "416 Range Not Satisfiable",
            StatusCode::InternalServerError => "500 Internal Server Error",
            StatusCode::NotImplemented => "501 Not Implemented",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ResponseStartLine {
    pub version: HttpVersion,
    pub status: StatusCode,
}

impl ResponseStartLine {
    pub fn serialize_with_crlf_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.version.to_str().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.status.to_str().as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Response<'a> {
    pub start_line: ResponseStartLine,
    pub headers: Vec<Header>,
    pub body: Option<&'a [u8]>,
}

impl Response<'_> {
    /// A HTTP/1.1 response without a body.
    pub fn head(status: StatusCode, headers: Vec<Header>) -> Self {
        Self {
            start_line: ResponseStartLine {
                version: HttpVersion::OneDotOne,
                status,
            },
            headers,
            body: None,
        }
    }

    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        self.start_line.serialize_with_crlf_into(buf);

        for header in &self.headers {
            header.serialize_with_crlf_into(buf);
        }

        buf.extend_from_slice(b"\r\n");

        if let Some(body) = &self.body {
            buf.extend_from_slice(body);
        }
    }
}
