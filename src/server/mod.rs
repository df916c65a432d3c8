//! Async TCP host using Tokio.
//!
//! Accepts TCP connections, parses HTTP/1.1 requests into an
//! [`Environment`], and serves each one through a [`Dispatcher`] on the
//! blocking thread pool (dispatch itself is synchronous). Supports HTTP/1.1
//! persistent connections (keep-alive) out of the box.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatcher;
use crate::http::environment::RequestError;
use crate::http::{BufferTransport, Environment, Response, StatusCode};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// The hmvc HTTP host.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use hmvc::config::Config;
/// use hmvc::controller::Controllers;
/// use hmvc::dispatch::Dispatcher;
/// use hmvc::router::Routes;
/// use hmvc::server::Server;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let server = Server::bind(&config.bind).await?;
///     let dispatcher = Dispatcher::new(config, Routes::new(), Controllers::new());
///     server.run(Arc::new(dispatcher)).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts accepting connections and serving their requests through `dispatcher`.
    ///
    /// This method runs until the process is terminated or an unrecoverable
    /// listener error occurs.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run(self, dispatcher: Arc<Dispatcher>) -> Result<(), ServerError> {
        info!(address = %self.local_addr, "hmvc listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let dispatcher = Arc::clone(&dispatcher);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, dispatcher).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, reading one
/// request per iteration, until the peer closes the connection or signals
/// `Connection: close`.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
) -> Result<(), std::io::Error> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let bytes_read = stream.read_buf(&mut buf).await?;

        if bytes_read == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            break;
        }

        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, "request too large, sending 413");
            reject_too_large(&mut stream, &dispatcher).await?;
            break;
        }

        let (env, body_offset) = match Environment::parse_http(&buf, Some(peer_addr)) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => continue,
            Err(e @ RequestError::PayloadTooLarge { .. }) => {
                warn!(peer = %peer_addr, error = %e, "declared body too large, sending 413");
                reject_too_large(&mut stream, &dispatcher).await?;
                break;
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                let response =
                    Response::new(StatusCode::BadRequest).body(format!("Bad Request: {e}"));
                stream
                    .write_all(&response.into_bytes(dispatcher.config(), false))
                    .await?;
                break;
            }
        };

        // Wait for the full body to arrive if Content-Length is set.
        let total_needed = match body_offset.checked_add(env.content_length().unwrap_or(0)) {
            Some(total) if total <= MAX_REQUEST_SIZE => total,
            _ => {
                warn!(peer = %peer_addr, "declared body too large, sending 413");
                reject_too_large(&mut stream, &dispatcher).await?;
                break;
            }
        };
        if buf.len() < total_needed {
            continue;
        }

        let keep_alive = env.is_keep_alive();

        debug!(
            peer = %peer_addr,
            method = %env.method(),
            uri = env.var("REQUEST_URI").unwrap_or_default(),
            "serving request"
        );

        let worker = Arc::clone(&dispatcher);
        let wire = tokio::task::spawn_blocking(move || {
            let mut transport = BufferTransport::new();
            match worker.serve(&env, &mut transport) {
                Ok(status) => debug!(status = status.as_u16(), "request served"),
                Err(e) => error!(error = %e, "response transmission failed"),
            }
            transport.into_http(keep_alive)
        })
        .await
        .map_err(std::io::Error::other)?;

        stream.write_all(&wire).await?;
        stream.flush().await?;

        // Drop the consumed request bytes from the buffer.
        let _ = buf.split_to(total_needed);

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            break;
        }
    }

    Ok(())
}

async fn reject_too_large(
    stream: &mut TcpStream,
    dispatcher: &Dispatcher,
) -> Result<(), std::io::Error> {
    let response =
        Response::new(StatusCode::RequestEntityTooLarge).body("Request entity too large");
    stream
        .write_all(&response.into_bytes(dispatcher.config(), false))
        .await
}
