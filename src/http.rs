//! Simple HTTP/1.1 client for no_std environments
//!
//! One request per connection (`Connection: close`). The transport is supplied
//! by a [`Connector`], which hides whether the bytes go over plain TCP or TLS.
//! The response body can be streamed with [`Response::read`] or collected with
//! [`Response::read_to_end`], which also undoes chunked transfer encoding.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write as FmtWrite;
use core::str;

use embedded_io_async::{Read, Write};
use thiserror::Error;

/// Largest response head we accept (status line plus headers)
const HEADER_BUF_SIZE: usize = 2048;
const USER_AGENT: &str = concat!("dashboard-terminal/", env!("CARGO_PKG_VERSION"));

/// HTTP client error types
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HttpError {
    #[error("failed to connect to server")]
    Connect,
    #[error("failed to write request")]
    Write,
    #[error("failed to read response")]
    Read,
    #[error("invalid URL")]
    InvalidUrl,
    #[error("malformed response")]
    Parse,
    #[error("response too large")]
    TooLarge,
    #[error("TLS error")]
    Tls,
}

/// URL scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

/// Parsed URL components
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Url<'a> {
    pub scheme: Scheme,
    pub host: &'a str,
    pub port: u16,
    pub path: &'a str,
}

impl<'a> Url<'a> {
    /// Parse a URL string into components
    /// Supports: http://host:port/path, https://host:port/path
    pub fn parse(url: &'a str) -> Result<Self, HttpError> {
        let (scheme, rest) = if let Some(rest) = url.strip_prefix("https://") {
            (Scheme::Https, rest)
        } else if let Some(rest) = url.strip_prefix("http://") {
            (Scheme::Http, rest)
        } else {
            return Err(HttpError::InvalidUrl);
        };

        let default_port = match scheme {
            Scheme::Http => 80,
            Scheme::Https => 443,
        };

        // Path starts at the first '/' or '?'
        let (host_port, path) = match rest.find(['/', '?']) {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };

        let (host, port) = match host_port.rfind(':') {
            Some(idx) => {
                let port_str = &host_port[idx + 1..];
                let port = port_str.parse().map_err(|_| HttpError::InvalidUrl)?;
                (&host_port[..idx], port)
            }
            None => (host_port, default_port),
        };

        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(HttpError::InvalidUrl);
        }

        Ok(Url {
            scheme,
            host,
            port,
            path,
        })
    }
}

/// Opens byte streams to HTTP servers.
///
/// The returned connection is released when dropped.
#[allow(async_fn_in_trait)]
pub trait Connector {
    type Connection<'a>: Read + Write
    where
        Self: 'a;

    /// Open a stream to `url`'s host, wrapped in TLS for `https` URLs.
    /// `insecure_tls` skips certificate verification.
    async fn connect<'a>(
        &'a mut self,
        url: &Url<'_>,
        insecure_tls: bool,
    ) -> Result<Self::Connection<'a>, HttpError>;
}

/// HTTP response head plus the connection carrying the body
pub struct Response<C> {
    pub status: u16,
    pub content_length: Option<usize>,
    pub chunked: bool,
    conn: C,
    /// Body bytes that arrived together with the head
    prefetched: Vec<u8>,
    prefetched_pos: usize,
    body_read: usize,
}

impl<C: Read> Response<C> {
    /// Body bytes left according to Content-Length
    pub fn remaining(&self) -> Option<usize> {
        self.content_length
            .map(|len| len.saturating_sub(self.body_read))
    }

    /// Read raw body bytes. Returns 0 once the declared length is reached or
    /// the server closed the stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        if buf.is_empty() || self.remaining() == Some(0) {
            return Ok(0);
        }

        let n = if self.prefetched_pos < self.prefetched.len() {
            let pending = &self.prefetched[self.prefetched_pos..];
            let n = pending.len().min(buf.len());
            buf[..n].copy_from_slice(&pending[..n]);
            self.prefetched_pos += n;
            n
        } else {
            self.conn.read(buf).await.map_err(|_| HttpError::Read)?
        };

        // Never hand out bytes past the declared length
        let n = match self.remaining() {
            Some(left) => n.min(left),
            None => n,
        };
        self.body_read += n;
        Ok(n)
    }

    /// Collect the whole body, undoing chunked encoding.
    ///
    /// Fails with `TooLarge` as soon as more than `limit` bytes arrive.
    pub async fn read_to_end(&mut self, limit: usize) -> Result<Vec<u8>, HttpError> {
        if self.content_length.is_some_and(|len| len > limit) && !self.chunked {
            return Err(HttpError::TooLarge);
        }

        let mut body = Vec::new();
        let mut buf = [0u8; 512];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            if body.len() + n > limit {
                return Err(HttpError::TooLarge);
            }
            body.extend_from_slice(&buf[..n]);
        }

        if self.chunked {
            decode_chunked(&body)
        } else {
            Ok(body)
        }
    }
}

/// Send a GET request over `conn` and parse the response head.
///
/// Any status code is returned as a response; interpreting it is up to the
/// caller. `headers` are sent after the standard ones, in order.
pub async fn get<C>(
    mut conn: C,
    url: &Url<'_>,
    headers: &[(&str, &str)],
) -> Result<Response<C>, HttpError>
where
    C: Read + Write,
{
    // Signed image URLs can be long, so the request is built on the heap
    let mut request = String::with_capacity(256);
    write!(
        &mut request,
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\nUser-Agent: {}\r\n",
        url.path, url.host, USER_AGENT
    )
    .map_err(|_| HttpError::TooLarge)?;
    for (name, value) in headers {
        write!(&mut request, "{}: {}\r\n", name, value).map_err(|_| HttpError::TooLarge)?;
    }
    request.push_str("\r\n");

    conn.write_all(request.as_bytes())
        .await
        .map_err(|_| HttpError::Write)?;
    conn.flush().await.map_err(|_| HttpError::Write)?;

    let mut rx_buf = [0u8; HEADER_BUF_SIZE];
    let mut total_read = 0;

    // Read until we find \r\n\r\n
    let headers_end = loop {
        if total_read >= rx_buf.len() {
            return Err(HttpError::TooLarge);
        }

        let n = conn
            .read(&mut rx_buf[total_read..])
            .await
            .map_err(|_| HttpError::Read)?;

        if n == 0 {
            return Err(HttpError::Read);
        }

        total_read += n;

        if let Some(pos) = find_header_end(&rx_buf[..total_read]) {
            break pos;
        }
    };

    let header_str = str::from_utf8(&rx_buf[..headers_end]).map_err(|_| HttpError::Parse)?;
    let status = parse_status(header_str)?;
    let content_length = match parse_header(header_str, "content-length") {
        Some(v) => Some(v.parse().map_err(|_| HttpError::Parse)?),
        None => None,
    };
    let chunked = parse_header(header_str, "transfer-encoding")
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"));

    log::debug!(
        "HTTP {} (length {:?}, chunked {})",
        status,
        content_length,
        chunked
    );

    let body_start = headers_end + 4;
    Ok(Response {
        status,
        // Content-Length is meaningless alongside chunked encoding
        content_length: if chunked { None } else { content_length },
        chunked,
        conn,
        prefetched: rx_buf[body_start..total_read].to_vec(),
        prefetched_pos: 0,
        body_read: 0,
    })
}

/// Find the position of \r\n\r\n in the buffer
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Parse HTTP status code from status line
pub fn parse_status(headers: &str) -> Result<u16, HttpError> {
    // HTTP/1.1 200 OK
    let line = headers.lines().next().ok_or(HttpError::Parse)?;
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().ok_or(HttpError::Parse)?;
    if !version.starts_with("HTTP/") {
        return Err(HttpError::Parse);
    }
    parts
        .next()
        .ok_or(HttpError::Parse)?
        .parse()
        .map_err(|_| HttpError::Parse)
}

/// Parse a header value (case-insensitive)
pub fn parse_header<'a>(headers: &'a str, name: &str) -> Option<&'a str> {
    headers.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then_some(value.trim())
    })
}

/// Undo chunked transfer encoding
pub fn decode_chunked(raw: &[u8]) -> Result<Vec<u8>, HttpError> {
    let mut out = Vec::with_capacity(raw.len());
    let mut pos = 0;
    loop {
        let line_len = raw[pos..]
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or(HttpError::Parse)?;
        let line = str::from_utf8(&raw[pos..pos + line_len]).map_err(|_| HttpError::Parse)?;
        // Chunk extensions follow a ';'
        let size_str = line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16).map_err(|_| HttpError::Parse)?;
        pos += line_len + 2;

        if size == 0 {
            return Ok(out);
        }
        let end = pos.checked_add(size).ok_or(HttpError::Parse)?;
        if end + 2 > raw.len() || &raw[end..end + 2] != b"\r\n" {
            return Err(HttpError::Parse);
        }
        out.extend_from_slice(&raw[pos..end]);
        pos = end + 2;
    }
}
