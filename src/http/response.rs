//! HTTP response: status, headers and body, plus the operations that end an
//! interaction early (cache validation, file downloads, redirects).

use std::borrow::Cow;
use std::convert::Infallible;
use std::fs::File;
use std::io::{self, Read};
use std::mem;
use std::path::PathBuf;

use bytes::{BufMut, BytesMut};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::transport::{Cookie, Transport};
use super::{HeaderValue, Headers, Request, StatusCode};
use crate::config::Config;
use crate::error::{Error, Halt, HaltReason, Result};

/// Size of the blocks [`Response::send_file`] streams (16 KiB).
pub const SEND_FILE_BLOCK: usize = 16 * 1024;

/// What [`Response::send_file`] streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    /// A file on disk.
    Path(PathBuf),
    /// The response's own body; a download name is then required.
    Body,
}

/// Options for [`Response::send_file`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendFileOptions {
    /// Display inline instead of downloading.
    pub inline: bool,
    /// MIME type to send instead of the one guessed from the file extension.
    pub mime_type: Option<String>,
}

/// An HTTP response, mutated by controller code and finalised by the dispatcher.
///
/// # Examples
///
/// ```
/// use hmvc::config::Config;
/// use hmvc::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let bytes = response.into_bytes(&Config::default(), true);
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
    cookies: Vec<Cookie>,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
            cookies: Vec::new(),
        }
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: &str) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the response body from a string.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    /// Sets the status from a numeric code.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownStatus`] when the code is not in the status registry.
    pub fn set_status_code(&mut self, code: u16) -> Result<&mut Self> {
        self.status = StatusCode::from_u16(code)?;
        Ok(self)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Replaces a header in-place.
    pub fn set_header(&mut self, name: impl Into<String>, value: &str) -> &mut Self {
        self.headers.set(name, value);
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    /// The body as text, with invalid UTF-8 replaced.
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) -> &mut Self {
        self.body = body.into();
        self
    }

    /// Appends to the body.
    pub fn write(&mut self, chunk: impl AsRef<[u8]>) -> &mut Self {
        self.body.extend_from_slice(chunk.as_ref());
        self
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    /// Adds a cookie to send; a cookie with the same name is replaced.
    pub fn set_cookie(&mut self, cookie: Cookie) -> &mut Self {
        self.cookies.retain(|c| c.name != cookie.name);
        self.cookies.push(cookie);
        self
    }

    /// `PROTOCOL CODE REASON`, e.g. `HTTP/1.1 404 Not Found`.
    pub fn status_line(&self, config: &Config) -> String {
        format!(
            "{} {} {}",
            config.protocol,
            self.status.as_u16(),
            self.status.canonical_reason()
        )
    }

    /// Transmits the status line, headers and cookies unless headers were already sent.
    pub fn send_headers(&mut self, config: &Config, transport: &mut dyn Transport) -> Result<()> {
        let status_line = self.status_line(config);
        self.headers
            .send_headers(status_line, &self.cookies, config, true, transport)?;
        Ok(())
    }

    /// Transmits headers followed by the body.
    pub fn send(&mut self, config: &Config, transport: &mut dyn Transport) -> Result<()> {
        self.send_headers(config, transport)?;
        transport.write_body(&self.body)?;
        transport.flush()?;
        Ok(())
    }

    /// Serializes the response into a `BytesMut` buffer using HTTP/1.1 wire format.
    ///
    /// Adds what [`send_headers`](Self::send_headers) adds, plus:
    /// - `Content-Length: <n>` (always written, last before the blank line).
    /// - `Connection: keep-alive` or `Connection: close`.
    pub fn into_bytes(mut self, config: &Config, keep_alive: bool) -> BytesMut {
        if !self.headers.contains("content-type") {
            self.headers.set("Content-Type", &config.default_content_type());
        }
        if config.expose && !self.headers.contains("x-powered-by") {
            self.headers
                .set_values("X-Powered-By", vec![HeaderValue::verbatim(config.powered_by())]);
        }
        self.headers.remove("content-length");

        let connection = if keep_alive { "keep-alive" } else { "close" };
        self.headers.set("Connection", connection);

        let content_length = self.body.len();
        let estimated_size = 128 + self.headers.len() * 64 + content_length;
        let mut buf = BytesMut::with_capacity(estimated_size);

        // Status line
        buf.put(format!("{}\r\n", self.status_line(config)).as_bytes());

        // Headers
        for line in self.headers.lines() {
            buf.put(line.as_bytes());
            buf.put(&b"\r\n"[..]);
        }
        for cookie in &self.cookies {
            buf.put(format!("Set-Cookie: {cookie}\r\n").as_bytes());
        }

        buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());

        // Header/body separator
        buf.put(&b"\r\n"[..]);

        // Body
        if !self.body.is_empty() {
            buf.put(self.body.as_slice());
        }

        buf
    }

    /// A quoted strong ETag derived from the body.
    pub fn generate_etag(&self) -> String {
        format!("\"{}\"", hex::encode(Sha256::digest(&self.body)))
    }

    /// Sets `ETag` (given, or generated from the body) and validates the client's copy.
    ///
    /// `Cache-Control: must-revalidate` is added unless a `Cache-Control`
    /// header is already set. When the request's `If-None-Match` equals the
    /// ETag, the status becomes `304 Not Modified` and [`Error::Halt`] is
    /// returned carrying this response: no further processing should happen.
    ///
    /// ```
    /// use hmvc::http::{Request, Response, StatusCode};
    ///
    /// let mut response = Response::new(StatusCode::Ok).body("cached body");
    /// let etag = response.generate_etag();
    ///
    /// let mut request = Request::new("page");
    /// request.headers_mut().set("If-None-Match", &etag);
    ///
    /// let err = response.check_cache(None, &request).unwrap_err();
    /// assert_eq!(err.status(), StatusCode::NotModified);
    /// ```
    pub fn check_cache(&mut self, etag: Option<&str>, request: &Request) -> Result<&mut Self> {
        let etag = match etag.filter(|e| !e.is_empty()) {
            Some(etag) => etag.to_owned(),
            None => self.generate_etag(),
        };

        self.headers
            .set_values("ETag", vec![HeaderValue::verbatim(etag.clone())]);
        if !self.headers.contains("cache-control") {
            self.headers.set("Cache-Control", "must-revalidate");
        }

        if request.header("if-none-match").as_deref() == Some(etag.as_str()) {
            info!(uri = request.uri(), etag = %etag, "client cache is current");
            self.status = StatusCode::NotModified;
            return Err(self.clone().halt(HaltReason::NotModified));
        }

        Ok(self)
    }

    /// A redirect response with a `Location` header.
    ///
    /// Relative `url`s are made absolute against the application with [`Config::site`].
    pub fn redirect(url: &str, status: StatusCode, config: &Config) -> Self {
        let location = if url.contains("://") {
            url.to_owned()
        } else {
            config.site(url)
        };

        let mut response = Self::new(status);
        response
            .headers
            .set_values("Location", vec![HeaderValue::verbatim(location)]);
        response
    }

    /// Wraps this response in [`Error::Halt`].
    pub fn halt(self, reason: HaltReason) -> Error {
        Halt {
            reason,
            response: self,
        }
        .into()
    }

    /// Streams a file download through `transport` and ends the interaction.
    ///
    /// The MIME type is `options.mime_type` or a guess from the extension of
    /// the file (or of `download` when streaming the body). Headers are sent
    /// first, then the content in [`SEND_FILE_BLOCK`]-sized blocks until the
    /// end or until the transport reports the client went away.
    ///
    /// # Errors
    ///
    /// Always returns an error: [`Error::Halt`] with
    /// [`HaltReason::FileSent`] once streaming finished,
    /// [`Error::MissingDownloadName`] when streaming the body without a
    /// download name, or [`Error::Io`] when the file cannot be read.
    pub fn send_file(
        &mut self,
        source: FileSource,
        download: Option<&str>,
        options: SendFileOptions,
        config: &Config,
        transport: &mut dyn Transport,
    ) -> Result<Infallible> {
        let download = download.filter(|d| !d.is_empty());

        let (mut reader, size, download, guessed): (Box<dyn Read>, u64, String, _) = match source {
            FileSource::Body => {
                let download = download.ok_or(Error::MissingDownloadName)?;
                let body = mem::take(&mut self.body);
                let size = body.len() as u64;
                (
                    Box::new(io::Cursor::new(body)) as Box<dyn Read>,
                    size,
                    download.to_owned(),
                    mime_guess::from_path(download).first_or_octet_stream(),
                )
            }
            FileSource::Path(path) => {
                let path = path.canonicalize()?;
                let file = File::open(&path)?;
                let size = file.metadata()?.len();
                let download = match download {
                    Some(name) => name.to_owned(),
                    None => path
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                };
                (
                    Box::new(file) as Box<dyn Read>,
                    size,
                    download,
                    mime_guess::from_path(&path).first_or_octet_stream(),
                )
            }
        };

        let mime = options.mime_type.unwrap_or_else(|| guessed.to_string());
        let disposition = if options.inline { "inline" } else { "attachment" };

        self.headers.set_values(
            "Content-Disposition",
            vec![HeaderValue::verbatim(format!(
                "{disposition}; filename=\"{download}\""
            ))],
        );
        self.headers
            .set_values("Content-Type", vec![HeaderValue::verbatim(mime)]);
        self.headers.set("Content-Length", &size.to_string());

        self.send_headers(config, transport)?;

        let mut block = vec![0u8; SEND_FILE_BLOCK];
        let mut sent = 0u64;
        loop {
            if transport.is_aborted() {
                debug!(download = %download, sent, size, "client disconnected during download");
                break;
            }
            let n = reader.read(&mut block)?;
            if n == 0 {
                break;
            }
            transport.write_body(&block[..n])?;
            transport.flush()?;
            sent += n as u64;
        }

        info!(download = %download, sent, "file sent");
        Err(self.clone().halt(HaltReason::FileSent))
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::BufferTransport;

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn unwrap_halt(err: Error) -> Halt {
        match err {
            Error::Halt(halt) => *halt,
            other => panic!("expected halt, got {other:?}"),
        }
    }

    #[test]
    fn simple_ok_response() {
        let r = Response::new(StatusCode::Ok).body("Hello");
        let s = to_string(r.into_bytes(&Config::default(), true));
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Content-Type: text/html; charset=utf-8\r\n"));
        assert!(s.contains("Connection: keep-alive\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn connection_close_and_cookies() {
        let mut r = Response::new(StatusCode::Ok);
        r.set_cookie(Cookie::new("sid", "1"));
        let s = to_string(r.into_bytes(&Config::default(), false));
        assert!(s.contains("Connection: close\r\n"));
        assert!(s.contains("Set-Cookie: sid=1; Path=/\r\n"));
    }

    #[test]
    fn not_found_status_line() {
        let r = Response::new(StatusCode::NotFound).body("Not Found");
        let s = to_string(r.into_bytes(&Config::default(), true));
        assert!(s.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn unknown_status_code_is_rejected() {
        let mut r = Response::default();
        assert!(matches!(r.set_status_code(299), Err(Error::UnknownStatus(299))));
        assert_eq!(r.set_status_code(509).unwrap().status().as_u16(), 509);
    }

    #[test]
    fn powered_by_when_exposed() {
        let config = Config {
            expose: true,
            ..Config::default()
        };
        let mut r = Response::default();
        let mut t = BufferTransport::new();
        r.send(&config, &mut t).unwrap();
        assert!(t.head().iter().any(|l| l.starts_with("X-Powered-By: hmvc ")));
    }

    #[test]
    fn etag_is_quoted_hash_of_body() {
        let r = Response::default().body("abc");
        let etag = r.generate_etag();
        assert!(etag.starts_with('"') && etag.ends_with('"'));
        assert_eq!(etag.len(), 64 + 2);
        assert_eq!(etag, Response::default().body("abc").generate_etag());
        assert_ne!(etag, Response::default().body("abd").generate_etag());
    }

    #[test]
    fn check_cache_without_match_sets_headers() {
        let mut r = Response::default().body("abc");
        let request = Request::new("x");
        r.check_cache(Some("\"v1\""), &request).unwrap();
        assert_eq!(r.headers().get("etag").as_deref(), Some("\"v1\""));
        assert_eq!(r.headers().get("cache-control").as_deref(), Some("must-revalidate"));
        assert_eq!(r.status(), StatusCode::Ok);
    }

    #[test]
    fn check_cache_keeps_existing_cache_control() {
        let mut r = Response::default().header("Cache-Control", "max-age=60");
        r.check_cache(Some("\"v1\""), &Request::new("x")).unwrap();
        assert_eq!(r.headers().get("cache-control").as_deref(), Some("max-age=60"));
    }

    #[test]
    fn check_cache_match_halts_with_304() {
        let mut r = Response::default();
        let mut request = Request::new("x");
        request.headers_mut().set("If-None-Match", "\"v1\"");
        let halt = unwrap_halt(r.check_cache(Some("\"v1\""), &request).unwrap_err());
        assert_eq!(halt.reason, HaltReason::NotModified);
        assert_eq!(halt.response.status(), StatusCode::NotModified);
    }

    #[test]
    fn redirect_location() {
        let config = Config {
            base_url: "/app/".into(),
            index_file: None,
            ..Config::default()
        };
        let r = Response::redirect("login", StatusCode::Found, &config);
        assert_eq!(r.status(), StatusCode::Found);
        assert_eq!(r.headers().get("location").as_deref(), Some("/app/login"));

        let r = Response::redirect("http://example.com/x", StatusCode::MovedPermanently, &config);
        assert_eq!(r.headers().get("location").as_deref(), Some("http://example.com/x"));
    }

    #[test]
    fn send_file_streams_path_in_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        let content = vec![b'x'; SEND_FILE_BLOCK * 2 + 10];
        std::fs::write(&path, &content).unwrap();

        let mut r = Response::default();
        let mut t = BufferTransport::new();
        let err = r
            .send_file(
                FileSource::Path(path),
                None,
                SendFileOptions::default(),
                &Config::default(),
                &mut t,
            )
            .unwrap_err();

        assert_eq!(unwrap_halt(err).reason, HaltReason::FileSent);
        assert_eq!(t.body().len(), content.len());
        let head = t.head().join("\n");
        assert!(head.contains("Content-Disposition: attachment; filename=\"report.txt\""));
        assert!(head.contains("Content-Type: text/plain"));
        assert!(head.contains(&format!("Content-Length: {}", content.len())));
    }

    #[test]
    fn send_file_stops_when_client_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        std::fs::write(&path, vec![0u8; SEND_FILE_BLOCK * 4]).unwrap();

        let mut r = Response::default();
        let mut t = BufferTransport::new().abort_after(SEND_FILE_BLOCK);
        let err = r
            .send_file(
                FileSource::Path(path),
                Some("big.bin"),
                SendFileOptions::default(),
                &Config::default(),
                &mut t,
            )
            .unwrap_err();

        assert!(err.is_halt());
        assert_eq!(t.body().len(), SEND_FILE_BLOCK);
    }

    #[test]
    fn send_file_body_requires_download_name() {
        let mut r = Response::default().body("data");
        let mut t = BufferTransport::new();
        let err = r
            .send_file(FileSource::Body, None, SendFileOptions::default(), &Config::default(), &mut t)
            .unwrap_err();
        assert!(matches!(err, Error::MissingDownloadName));
        assert!(!t.headers_sent());
    }

    #[test]
    fn send_file_body_inline_with_mime_override() {
        let mut r = Response::default().body("a,b\n1,2\n");
        let mut t = BufferTransport::new();
        let options = SendFileOptions {
            inline: true,
            mime_type: Some("text/csv".into()),
        };
        let err = r
            .send_file(FileSource::Body, Some("data.csv"), options, &Config::default(), &mut t)
            .unwrap_err();
        assert!(err.is_halt());
        assert_eq!(t.body(), b"a,b\n1,2\n");
        let head = t.head().join("\n");
        assert!(head.contains("Content-Disposition: inline; filename=\"data.csv\""));
        assert!(head.contains("Content-Type: text/csv"));
    }
}
