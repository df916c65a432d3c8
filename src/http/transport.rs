//! The transmission boundary responses are written through.
//!
//! A [`Transport`] receives the serialized status line and header lines, any
//! cookies (which never travel as raw header lines), and then body bytes.
//! [`BufferTransport`] is the default implementation: it assembles the
//! HTTP/1.1 wire form in memory for a host to write to its socket.

use std::fmt;
use std::io;

use bytes::{BufMut, BytesMut};

/// A cookie handed to [`Transport::set_cookie`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Lifetime in seconds; `None` makes a session cookie.
    pub expiration: Option<u64>,
    pub path: String,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            expiration: None,
            path: "/".to_owned(),
        }
    }

    #[must_use]
    pub fn expires_in(mut self, seconds: u64) -> Self {
        self.expiration = Some(seconds);
        self
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;
        if let Some(seconds) = self.expiration {
            write!(f, "; Max-Age={seconds}")?;
        }
        write!(f, "; Path={}", self.path)
    }
}

/// Output side of one interaction.
pub trait Transport {
    /// Returns `true` once header lines have been transmitted.
    fn headers_sent(&self) -> bool;

    /// Transmits the status line followed by `Name: value` header lines.
    ///
    /// With `replace` set, a line replaces an earlier line of the same header name.
    fn send_headers(&mut self, lines: &[String], replace: bool) -> io::Result<()>;

    fn set_cookie(&mut self, cookie: &Cookie) -> io::Result<()>;

    fn write_body(&mut self, chunk: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Returns `true` when the client has gone away.
    fn is_aborted(&self) -> bool {
        false
    }
}

/// In-memory transport producing HTTP/1.1 wire bytes.
///
/// # Examples
///
/// ```
/// use hmvc::http::{BufferTransport, Cookie, Transport};
///
/// let mut out = BufferTransport::new();
/// out.send_headers(&["HTTP/1.1 200 OK".into(), "Content-Type: text/plain".into()], false).unwrap();
/// out.set_cookie(&Cookie::new("session", "abc")).unwrap();
/// out.write_body(b"hi").unwrap();
///
/// let wire = out.into_bytes();
/// assert_eq!(
///     &wire[..],
///     &b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nSet-Cookie: session=abc; Path=/\r\n\r\nhi"[..]
/// );
/// ```
#[derive(Debug, Default)]
pub struct BufferTransport {
    head: Vec<String>,
    cookies: Vec<Cookie>,
    body: BytesMut,
    sent: bool,
    abort_after: Option<usize>,
}

impl BufferTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a client that disconnects once `bytes` body bytes were written.
    #[must_use]
    pub fn abort_after(mut self, bytes: usize) -> Self {
        self.abort_after = Some(bytes);
        self
    }

    /// Status line and header lines, without cookies.
    pub fn head(&self) -> &[String] {
        &self.head
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Assembles the status line, headers, cookies, blank line and body.
    pub fn into_bytes(self) -> BytesMut {
        let estimated = 64 + self.head.len() * 48 + self.cookies.len() * 48 + self.body.len();
        let mut buf = BytesMut::with_capacity(estimated);

        for line in &self.head {
            buf.put(line.as_bytes());
            buf.put(&b"\r\n"[..]);
        }
        for cookie in &self.cookies {
            buf.put(format!("Set-Cookie: {cookie}\r\n").as_bytes());
        }
        buf.put(&b"\r\n"[..]);
        buf.put(&self.body[..]);

        buf
    }

    /// Wire bytes for a persistent HTTP/1.1 connection: [`into_bytes`](Self::into_bytes)
    /// with `Content-Length` and `Connection` set from the buffered body and `keep_alive`.
    pub fn into_http(mut self, keep_alive: bool) -> BytesMut {
        self.head.retain(|line| {
            !header_name(line).is_some_and(|n| {
                n.eq_ignore_ascii_case("content-length") || n.eq_ignore_ascii_case("connection")
            })
        });
        let connection = if keep_alive { "keep-alive" } else { "close" };
        self.head.push(format!("Connection: {connection}"));
        self.head.push(format!("Content-Length: {}", self.body.len()));
        self.into_bytes()
    }
}

fn header_name(line: &str) -> Option<&str> {
    line.split_once(':').map(|(name, _)| name.trim())
}

impl Transport for BufferTransport {
    fn headers_sent(&self) -> bool {
        self.sent
    }

    fn send_headers(&mut self, lines: &[String], replace: bool) -> io::Result<()> {
        if self.sent {
            return Ok(());
        }

        for line in lines {
            if replace {
                if let Some(name) = header_name(line) {
                    self.head
                        .retain(|existing| !header_name(existing).is_some_and(|n| n.eq_ignore_ascii_case(name)));
                }
            }
            self.head.push(line.clone());
        }

        self.sent = true;
        Ok(())
    }

    fn set_cookie(&mut self, cookie: &Cookie) -> io::Result<()> {
        self.cookies.retain(|existing| existing.name != cookie.name);
        self.cookies.push(cookie.clone());
        Ok(())
    }

    fn write_body(&mut self, chunk: &[u8]) -> io::Result<()> {
        if self.is_aborted() {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "client disconnected",
            ));
        }
        self.body.put(chunk);
        Ok(())
    }

    fn is_aborted(&self) -> bool {
        self.abort_after
            .is_some_and(|limit| self.body.len() >= limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_sent_once() {
        let mut t = BufferTransport::new();
        t.send_headers(&["HTTP/1.1 200 OK".into()], false).unwrap();
        t.send_headers(&["HTTP/1.1 500 Internal Server Error".into()], false)
            .unwrap();
        assert!(t.headers_sent());
        assert_eq!(t.head(), &["HTTP/1.1 200 OK".to_owned()]);
    }

    #[test]
    fn replace_drops_earlier_line_with_same_name() {
        let mut t = BufferTransport::new();
        let lines = vec![
            "HTTP/1.1 200 OK".to_owned(),
            "X-Id: 1".to_owned(),
            "x-id: 2".to_owned(),
        ];
        t.send_headers(&lines, true).unwrap();
        assert_eq!(t.head(), &["HTTP/1.1 200 OK".to_owned(), "x-id: 2".to_owned()]);
    }

    #[test]
    fn cookie_rendering() {
        let c = Cookie::new("lang", "en").expires_in(3600);
        assert_eq!(c.to_string(), "lang=en; Max-Age=3600; Path=/");
    }

    #[test]
    fn http_framing_replaces_length_and_connection() {
        let mut t = BufferTransport::new();
        let lines = ["HTTP/1.1 200 OK".to_owned(), "Content-Length: 99".to_owned()];
        t.send_headers(&lines, true).unwrap();
        t.write_body(b"abc").unwrap();

        let wire = t.into_http(false);
        assert_eq!(
            &wire[..],
            &b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 3\r\n\r\nabc"[..]
        );
    }

    #[test]
    fn abort_stops_body_writes() {
        let mut t = BufferTransport::new().abort_after(4);
        t.write_body(b"abcd").unwrap();
        assert!(t.is_aborted());
        assert!(t.write_body(b"efgh").is_err());
        assert_eq!(t.body(), b"abcd");
    }
}
