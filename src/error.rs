//! Error taxonomy shared by routing, dispatch and transmission.

use std::fmt;

use thiserror::Error;

use crate::http::{Response, StatusCode};

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Boxed failure raised by controller code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced while detecting, routing, dispatching or transmitting a request.
#[derive(Debug, Error)]
pub enum Error {
    /// No environment signal yielded a URI for the initial request.
    #[error("unable to detect the URI using PATH_INFO, REQUEST_URI, PHP_SELF or REDIRECT_URL")]
    UriDetection,

    #[error("unable to find a route to match the URI: {uri}")]
    NoRouteMatched { uri: String },

    #[error("{reason}: {controller}")]
    ControllerNotFound {
        controller: String,
        reason: &'static str,
    },

    #[error("controller {controller} has no action named {action:?}")]
    ActionNotFound { controller: String, action: String },

    #[error("required route parameter not passed: {param}")]
    RouteParameterMissing { param: String },

    #[error("invalid route pattern {pattern:?}: {reason}")]
    InvalidRoute { pattern: String, reason: String },

    #[error("a route named {name:?} is already registered")]
    DuplicateRoute { name: String },

    #[error("unknown HTTP status code {0}")]
    UnknownStatus(u16),

    /// An uncaught failure raised by `before`, an action or `after`.
    #[error("action failed: {0}")]
    Action(#[source] BoxError),

    /// Processing was deliberately cut short; the carried response is final.
    #[error("request processing halted: {0}")]
    Halt(Box<Halt>),

    #[error("download name must be provided for streaming files")]
    MissingDownloadName,

    #[error("the initial request has already been set for this interaction")]
    InitialAlreadySet,

    #[error("no external client configured to execute {uri}")]
    ExternalUnavailable { uri: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl Error {
    /// Wraps an arbitrary controller failure.
    pub fn action(err: impl Into<BoxError>) -> Self {
        Self::Action(err.into())
    }

    /// The status the outermost boundary should render for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NoRouteMatched { .. }
            | Self::ControllerNotFound { .. }
            | Self::ActionNotFound { .. } => StatusCode::NotFound,
            Self::Halt(halt) => halt.response.status(),
            _ => StatusCode::InternalServerError,
        }
    }

    /// Returns `true` for the short-circuit exits of `check_cache`, `redirect` and `send_file`.
    pub fn is_halt(&self) -> bool {
        matches!(self, Self::Halt(_))
    }
}

/// Why a [`Halt`] was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// `check_cache` matched the client's `If-None-Match`.
    NotModified,
    /// A redirect response was issued.
    Redirect,
    /// A file download was streamed to the transport.
    FileSent,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotModified => "not modified",
            Self::Redirect => "redirect",
            Self::FileSent => "file sent",
        })
    }
}

/// A finalised response that ends the interaction early.
#[derive(Debug)]
pub struct Halt {
    pub reason: HaltReason,
    pub response: Response,
}

impl fmt::Display for Halt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.reason, self.response.status())
    }
}

impl From<Halt> for Error {
    fn from(halt: Halt) -> Self {
        Self::Halt(Box::new(halt))
    }
}
