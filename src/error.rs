//! Error types for declarative HTTP invocations.
//!
//! Every failure an invocation can produce is a variant of [`Error`]. Variants
//! preserve the originating method key, HTTP verb, URL, status, and raw body
//! wherever those are available, so a production log line carries enough to
//! debug without re-running the call.
//!
//! Classification matters more than the payload here: the dispatcher treats
//! [`Error::Transport`] and [`Error::Retryable`] as candidates for another
//! attempt, and everything else as terminal. See [`Error::retry_signal`].

use crate::retry::RetrySignal;
use crate::transport::TransportError;
use http::{HeaderMap, Method, StatusCode};

/// The main error type for invocations.
///
/// # Examples
///
/// ```no_run
/// use beckon::{Client, Error};
/// # async fn example(client: Client, key: beckon::MethodKey) -> Result<(), Error> {
/// match client.invoke(&key, vec![]).await {
///     Ok(reply) => println!("decoded: {:?}", reply.value),
///     Err(Error::Status { status, raw_response, .. }) => {
///         eprintln!("server said {status}: {raw_response}");
///     }
///     Err(Error::Decode { raw_response, message, .. }) => {
///         eprintln!("could not decode: {message}; body was {raw_response}");
///     }
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The method registry, template, or bindings are inconsistent.
    ///
    /// Unresolved placeholders, duplicate method keys, arity mismatches, and
    /// invalid header names all land here. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The request body could not be encoded.
    ///
    /// Raised before anything is sent, so it is never retried.
    #[error("failed to encode request body for {key}: {message}")]
    Encode {
        /// The method whose body was being encoded.
        key: String,
        /// What the encoder rejected.
        message: String,
    },

    /// The transport failed before any byte of a response arrived.
    ///
    /// Connection refused, DNS failure, a reset while writing the request,
    /// or a timeout with nothing read back. Eligible for retry.
    #[error("connection failed {method} {url}: {source}")]
    Transport {
        /// The HTTP verb of the attempted request.
        method: Method,
        /// The absolute URL of the attempted request.
        url: String,
        /// The underlying transport failure.
        #[source]
        source: TransportError,
    },

    /// The response began arriving and then reading it failed.
    ///
    /// Once the server has started responding its side effects may already
    /// be applied, so this is always terminal.
    #[error("error reading response {method} {url} ({key}): {source}")]
    ResponseRead {
        /// The method key, for diagnostics.
        key: String,
        /// The HTTP verb of the request.
        method: Method,
        /// The absolute URL of the request.
        url: String,
        /// The underlying read failure.
        #[source]
        source: TransportError,
    },

    /// The server returned a non-2xx status and the error decoder classified
    /// it as terminal.
    #[error("status {status} invoking {key}: {raw_response}")]
    Status {
        /// The method key, for diagnostics.
        key: String,
        /// The HTTP status code.
        status: StatusCode,
        /// The raw response body.
        raw_response: String,
        /// The response headers.
        headers: HeaderMap,
    },

    /// A 2xx response body could not be converted to the declared return
    /// type.
    ///
    /// Decoders raise this with status and body only; the dispatcher fills
    /// in the call context before the error surfaces.
    #[error("failed to decode response{} (status {status}): {message}", call_site(.key, .method, .url))]
    Decode {
        /// The method key, once the dispatcher attached call context.
        key: String,
        /// The HTTP verb of the request, once known.
        method: Option<Method>,
        /// The absolute URL of the request, once known.
        url: String,
        /// The HTTP status code of the response.
        status: StatusCode,
        /// The decode failure, including any underlying parse error.
        message: String,
        /// The raw response body that failed to decode.
        raw_response: String,
    },

    /// A recoverable failure carrying permission to try again.
    ///
    /// Produced by error decoders for retryable statuses and by decoders
    /// that detect a recoverable condition in a 2xx body. Consumed by the
    /// dispatcher; it only escapes wrapped in [`Error::RetriesExhausted`].
    #[error("retryable failure: {}", .0.cause)]
    Retryable(RetrySignal),

    /// The retry budget ran out.
    ///
    /// Carries the number of attempts actually made and the cause of the
    /// last failed attempt.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Total attempts made, including the first.
        attempts: usize,
        /// The error behind the final failed attempt.
        last: Box<Error>,
    },
}

impl Error {
    /// Consumes the error, yielding a retry-signal if another attempt may be
    /// worthwhile.
    ///
    /// Transport failures that happened before any response byte are
    /// implicitly retryable; explicit [`Error::Retryable`] values pass
    /// through. Everything else comes back as `Err` unchanged and must be
    /// surfaced to the caller.
    pub fn retry_signal(self) -> std::result::Result<RetrySignal, Error> {
        match self {
            Error::Retryable(signal) => Ok(signal),
            err @ Error::Transport { .. } => Ok(RetrySignal::new(err)),
            other => Err(other),
        }
    }

    /// True when another attempt may be worthwhile.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Retryable(_) | Error::Transport { .. })
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Status { status, .. } => Some(*status),
            Error::Decode { status, .. } => Some(*status),
            Error::Retryable(signal) => signal.cause.status(),
            Error::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    /// Returns the raw response body if this error preserved one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::Status { raw_response, .. } => Some(raw_response),
            Error::Decode { raw_response, .. } => Some(raw_response),
            Error::Retryable(signal) => signal.cause.raw_response(),
            Error::RetriesExhausted { last, .. } => last.raw_response(),
            _ => None,
        }
    }
}

fn call_site(key: &str, method: &Option<Method>, url: &str) -> String {
    match method {
        Some(method) => format!(" {method} {url} ({key})"),
        None => String::new(),
    }
}

/// A specialized `Result` type for invocations.
pub type Result<T> = std::result::Result<T, Error>;
