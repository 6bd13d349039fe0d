use http::Method;
use thiserror::Error;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Timeout,
    BodyTooLarge,
    Other,
}

impl TransportErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Timeout => "timeout",
            Self::BodyTooLarge => "body_too_large",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Failure reported by a [`Transport`](crate::Transport) before any status
/// line could be read.
#[derive(Debug, Error)]
#[error("{kind} failure: {source}")]
pub struct TransportFailure {
    kind: TransportErrorKind,
    #[source]
    source: BoxError,
}

impl TransportFailure {
    pub fn new(kind: TransportErrorKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub(crate) fn into_source(self) -> BoxError {
        self.source
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    Redirection,
    ClientError,
    ServerError,
    UnknownStatus,
    CastFailure,
    Transport,
    Decoding,
    Cancelled,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Redirection => "redirection",
            Self::ClientError => "client_error",
            Self::ServerError => "server_error",
            Self::UnknownStatus => "unknown_status",
            Self::CastFailure => "cast_failure",
            Self::Transport => "transport",
            Self::Decoding => "decoding",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Terminal outcome of a failed request execution.
///
/// Every `run` call yields either a decoded value or exactly one of these.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("redirection status {status} for {method} {uri}")]
    Redirection {
        status: u16,
        method: Method,
        uri: String,
        body: String,
    },
    #[error("client error status {status} for {method} {uri}: {body}")]
    ClientError {
        status: u16,
        method: Method,
        uri: String,
        body: String,
    },
    #[error("server error status {status} for {method} {uri}: {body}")]
    ServerError {
        status: u16,
        method: Method,
        uri: String,
        body: String,
    },
    #[error("unexpected status {status} for {method} {uri}")]
    UnknownStatus {
        status: u16,
        method: Method,
        uri: String,
    },
    #[error("response status {status} for {method} {uri} is not a valid http status")]
    CastFailure {
        status: u16,
        method: Method,
        uri: String,
    },
    #[error("http transport error ({kind}) for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("failed to decode response json: {source}; body={body}")]
    Decoding {
        #[source]
        source: serde_json::Error,
        body: String,
    },
    #[error("request cancelled: {method} {uri}")]
    Cancelled { method: Method, uri: String },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Redirection { .. } => ErrorCode::Redirection,
            Self::ClientError { .. } => ErrorCode::ClientError,
            Self::ServerError { .. } => ErrorCode::ServerError,
            Self::UnknownStatus { .. } => ErrorCode::UnknownStatus,
            Self::CastFailure { .. } => ErrorCode::CastFailure,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Decoding { .. } => ErrorCode::Decoding,
            Self::Cancelled { .. } => ErrorCode::Cancelled,
        }
    }

    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Redirection { status, .. }
            | Self::ClientError { status, .. }
            | Self::ServerError { status, .. }
            | Self::UnknownStatus { status, .. }
            | Self::CastFailure { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub const fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Whether the executor hands this error to the retry policy at all.
    ///
    /// Cancellation, cast and decoding failures are terminal regardless of
    /// policy: the same bytes would come back on a replay.
    pub const fn is_retry_candidate(&self) -> bool {
        !matches!(
            self,
            Self::Cancelled { .. } | Self::CastFailure { .. } | Self::Decoding { .. }
        )
    }
}

/// Errors raised while assembling a request or a client.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuildError {
    #[error("invalid request url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported url scheme {scheme} in {url}")]
    UnsupportedScheme { scheme: String, url: String },
    #[error("failed to serialize request json: {source}")]
    SerializeJson {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize request form: {source}")]
    SerializeForm {
        #[source]
        source: serde_urlencoded::ser::Error,
    },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("requested tls backend is not enabled in this build: {backend}")]
    TlsBackendUnavailable { backend: &'static str },
    #[error("failed to initialize tls backend {backend}: {message}")]
    TlsBackendInit {
        backend: &'static str,
        message: String,
    },
    #[error("invalid tls configuration for backend {backend}: {message}")]
    TlsConfig {
        backend: &'static str,
        message: String,
    },
}
