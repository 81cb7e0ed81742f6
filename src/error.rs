//! Error types for the proxy.
//!
//! Errors are split along the same line the dispatcher uses to decide
//! whether a failure is fatal to the process or local to one request:
//! [`ConfigError`] and [`ListenerError`] are fatal, everything else is
//! caught and turned into a `500` response or a control-socket reply.

use miette::Diagnostic;
use thiserror::Error;

/// A `Result` typedef used throughout the crate.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Top-level error type for the proxy.
///
/// `Fetch`/`Handler` are only ever unified under this type when a caller
/// chooses to propagate them (for example a test asserting on the full
/// hierarchy); the dispatcher itself catches both locally per request and
/// degrades to a cached `500` rather than bubbling them up through
/// `ProxyError`, so this process never panics on a single bad request.
#[derive(Error, Diagnostic, Debug)]
pub enum ProxyError {
    /// The configuration file could not be read or parsed.
    #[error(transparent)]
    #[diagnostic(code(cache_proxy::config))]
    Config(#[from] ConfigError),
    /// A listener failed to bind or accept.
    #[error(transparent)]
    #[diagnostic(code(cache_proxy::listener))]
    Listener(#[from] ListenerError),
    /// An upstream fetch failed.
    #[error(transparent)]
    #[diagnostic(code(cache_proxy::fetch))]
    Fetch(#[from] FetchError),
    /// The header-policy chain or body copy failed.
    #[error(transparent)]
    #[diagnostic(code(cache_proxy::handler))]
    Handler(#[from] HandlerError),
    /// A control-socket command was rejected.
    #[error(transparent)]
    #[diagnostic(code(cache_proxy::control))]
    Control(ControlError),
}

/// Errors encountered while loading `config.toml`.
#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    /// The file could not be read from disk.
    #[error("failed to read configuration file {path}")]
    #[diagnostic(code(cache_proxy::config::read))]
    Read {
        /// Path that was read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file contents were not valid TOML, or did not match the expected
    /// shape.
    #[error("failed to parse configuration file {path}")]
    #[diagnostic(code(cache_proxy::config::parse))]
    Parse {
        /// Path that was parsed.
        path: String,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },
    /// A route or server entry failed validation.
    #[error("invalid configuration: {0}")]
    #[diagnostic(code(cache_proxy::config::invalid))]
    Invalid(String),
}

/// Errors encountered binding or running a listener.
#[derive(Error, Diagnostic, Debug)]
pub enum ListenerError {
    /// Binding the HTTP listener's address failed.
    #[error("failed to bind HTTP listener on {addr}")]
    #[diagnostic(code(cache_proxy::listener::bind))]
    Bind {
        /// Address that failed to bind.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Binding the control socket failed.
    #[error("failed to bind control socket on {addr}")]
    #[diagnostic(code(cache_proxy::listener::control_bind))]
    ControlBind {
        /// Address that failed to bind.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors encountered while fetching from an upstream.
///
/// Non-fatal: the dispatcher maps every variant to a `500`
/// [`crate::response::StoredResponse`] rather than propagating it.
#[derive(Error, Diagnostic, Debug)]
pub enum FetchError {
    /// The upstream connection could not be established, timed out, or the
    /// response could not be read.
    #[error(transparent)]
    #[diagnostic(code(cache_proxy::fetch::request))]
    Request(#[from] reqwest::Error),
    /// The configured target URL could not be combined with the request
    /// path into a valid URL.
    #[error("invalid upstream target URL: {0}")]
    #[diagnostic(code(cache_proxy::fetch::url))]
    InvalidUrl(String),
}

/// Errors encountered while running the header-policy chain or copying a
/// response body. Treated identically to [`FetchError`] by the dispatcher.
#[derive(Error, Diagnostic, Debug)]
pub enum HandlerError {
    /// A header value produced by the policy chain was not valid for the
    /// HTTP wire format.
    #[error("invalid header value for header {name}")]
    #[diagnostic(code(cache_proxy::handler::bad_header))]
    BadHeader {
        /// Offending header name.
        name: String,
    },
    /// Writing the response to the client sink failed.
    #[error("failed to write response to client")]
    #[diagnostic(code(cache_proxy::handler::sink))]
    Sink(#[source] anyhow::Error),
}

/// Errors reported on the control socket.
///
/// These never terminate the connection; the server writes the error text
/// as the reply and keeps reading.
#[derive(Error, Diagnostic, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlError {
    /// The command name was not recognized.
    #[error("invalid command")]
    #[diagnostic(code(cache_proxy::control::invalid_command))]
    InvalidCommand,
    /// The command was recognized but required arguments were missing or
    /// malformed.
    #[error("invalid arguments")]
    #[diagnostic(code(cache_proxy::control::invalid_arguments))]
    InvalidArguments,
}
