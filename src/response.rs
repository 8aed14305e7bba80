//! Wire responses and the decoded reply wrapper.
//!
//! [`Response`] is what the transport hands back: status, headers, and the
//! fully buffered body. Decoders and error decoders consume it. [`Reply`] is
//! what a successful invocation returns to the caller: the decoded value
//! plus the transaction metadata worth keeping around for observability.

use crate::method::Value;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::time::Duration;

/// An HTTP response as seen by the decoding layer.
///
/// The body is buffered in full by the transport, so it can be inspected
/// repeatedly without touching the network stream again.
#[derive(Debug, Clone)]
pub struct Response {
    /// The HTTP status code.
    pub status: StatusCode,
    /// The response headers.
    pub headers: HeaderMap,
    /// The complete response body.
    pub body: Bytes,
}

impl Response {
    /// Creates a response from its parts.
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// The body as UTF-8 text, if it is valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// The body as text, replacing invalid sequences. Useful for error
    /// reporting where lossiness beats failure.
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Returns a header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

/// A successful invocation: the decoded value and how it got there.
///
/// # Examples
///
/// ```no_run
/// use beckon::{Client, MethodKey};
///
/// # async fn example(client: Client, key: MethodKey) -> Result<(), beckon::Error> {
/// let reply = client.invoke(&key, vec![]).await?;
/// println!("value: {:?}", reply.value);
/// println!("took {:?} over {} attempt(s)", reply.latency, reply.attempts);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Reply {
    /// The decoded return value.
    pub value: Value,
    /// The HTTP status of the final, successful response.
    pub status: StatusCode,
    /// The headers of the final response.
    pub headers: HeaderMap,
    /// Total latency across all attempts, backoff included.
    pub latency: Duration,
    /// Attempts made, `1` when the first try succeeded.
    pub attempts: usize,
}

impl Reply {
    /// True when the invocation needed more than one attempt.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Returns a header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// The decoded value as text, if the return type was text.
    pub fn text(&self) -> Option<&str> {
        self.value.as_text()
    }
}
