//! Errors this crate can emit.
use crate::transport::Method;

use std::fmt::{self, Display, Formatter};
use url::Url;

/// A specialized `Result` type for this crate.
pub type Result<T, E = Error> = ::std::result::Result<T, E>;

/// Boxed error type accepted from user hooks and capability implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The value returned in this crate when an error occurs.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct Error(pub(crate) ErrorRepr);

impl Error {
    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self.0 {
            ErrorRepr::Config(_) => ErrorKind::Config,
            ErrorRepr::Transport { .. } => ErrorKind::Transport,
            ErrorRepr::Http { .. } => ErrorKind::Http,
            ErrorRepr::Protocol { .. } => ErrorKind::Protocol,
            ErrorRepr::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            ErrorRepr::Source(_) => ErrorKind::Source,
            ErrorRepr::Storage { .. } => ErrorKind::Storage,
            ErrorRepr::Aborted => ErrorKind::Aborted,
        }
    }

    /// The request that caused this error, if the error originated from one.
    ///
    /// Errors without an originating request are logic or configuration
    /// errors, which the retry controller never retries.
    pub fn request(&self) -> Option<&RequestSnapshot> {
        match &self.0 {
            ErrorRepr::Transport { request, .. }
            | ErrorRepr::Http { request, .. }
            | ErrorRepr::Protocol { request, .. } => Some(request),
            _ => None,
        }
    }

    /// The response attached to this error, when one was received.
    pub fn response(&self) -> Option<&ResponseSnapshot> {
        match &self.0 {
            ErrorRepr::Http { response, .. } => Some(response),
            ErrorRepr::Protocol { response, .. } => response.as_ref(),
            _ => None,
        }
    }

    /// The HTTP status of the attached response, when one was received.
    pub fn status(&self) -> Option<u16> {
        self.response().map(|r| r.status)
    }

    /// Whether this error reports a cancelled upload.
    pub fn is_aborted(&self) -> bool {
        matches!(self.0, ErrorRepr::Aborted)
    }

    pub(crate) fn config<T: Into<String>>(msg: T) -> Self {
        Self(ErrorRepr::Config(msg.into()))
    }

    /// Build a transport error for a failed exchange.
    ///
    /// For use by [`HttpTransport`](crate::transport::HttpTransport)
    /// implementations; the engine never retries an error that lacks its
    /// originating request.
    pub fn transport<E: Into<BoxError>>(request: RequestSnapshot, source: E) -> Self {
        Self(ErrorRepr::Transport {
            request,
            source: source.into(),
        })
    }

    pub(crate) fn http(request: RequestSnapshot, response: ResponseSnapshot) -> Self {
        Self(ErrorRepr::Http { request, response })
    }

    pub(crate) fn protocol<T: Into<String>>(
        detail: T,
        request: RequestSnapshot,
        response: Option<ResponseSnapshot>,
    ) -> Self {
        Self(ErrorRepr::Protocol {
            detail: detail.into(),
            request,
            response,
        })
    }

    pub(crate) fn size_mismatch(expected: u64, actual: u64) -> Self {
        Self(ErrorRepr::SizeMismatch { expected, actual })
    }

    pub(crate) fn source(source: std::io::Error) -> Self {
        Self(ErrorRepr::Source(source))
    }

    /// Build a storage error, for use by
    /// [`UrlStore`](crate::store::UrlStore) implementations.
    pub fn storage<E: Into<BoxError>>(source: E) -> Self {
        Self(ErrorRepr::Storage {
            source: source.into(),
        })
    }

    pub(crate) fn aborted() -> Self {
        Self(ErrorRepr::Aborted)
    }
}

impl From<ErrorRepr> for Error {
    fn from(value: ErrorRepr) -> Self {
        Self(value)
    }
}

/// The category of the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Preconditions on the upload options were violated.
    Config,
    /// The transport failed to complete a request.
    Transport,
    /// The server answered with an unexpected status.
    Http,
    /// A success response was missing or carried a malformed header.
    Protocol,
    /// The byte source contradicted the announced upload size.
    SizeMismatch,
    /// Reading from the byte source failed.
    Source,
    /// A URL-store operation failed.
    Storage,
    /// The upload was aborted by the host.
    Aborted,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => write!(f, "config"),
            Self::Transport => write!(f, "transport"),
            Self::Http => write!(f, "http"),
            Self::Protocol => write!(f, "protocol"),
            Self::SizeMismatch => write!(f, "size mismatch"),
            Self::Source => write!(f, "source"),
            Self::Storage => write!(f, "storage"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Internal error type that we are free to change at will.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ErrorRepr {
    #[error("invalid upload options: {0}")]
    Config(String),
    #[error("{request} failed: {source}")]
    Transport {
        request: RequestSnapshot,
        source: BoxError,
    },
    #[error("{request} returned unexpected status {status}", status = .response.status)]
    Http {
        request: RequestSnapshot,
        response: ResponseSnapshot,
    },
    #[error("{request} violated the protocol: {detail}")]
    Protocol {
        detail: String,
        request: RequestSnapshot,
        response: Option<ResponseSnapshot>,
    },
    #[error("source produced {actual} bytes where {expected} were announced")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("reading from the upload source failed: {0}")]
    Source(std::io::Error),
    #[error("url store operation failed: {source}")]
    Storage { source: BoxError },
    #[error("upload aborted")]
    Aborted,
}

/// The method and URL of a dispatched request, kept on errors so retry
/// predicates can classify them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSnapshot {
    /// HTTP method of the request.
    pub method: Method,
    /// Absolute URL the request targeted.
    pub url: Url,
}

impl Display for RequestSnapshot {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Status, headers, and body of a received response, kept on errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSnapshot {
    /// HTTP status code.
    pub status: u16,
    /// Response headers in arrival order.
    pub headers: Vec<(String, String)>,
    /// Response body decoded as text.
    pub body: String,
}

impl ResponseSnapshot {
    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
