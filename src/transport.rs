//! The transport boundary: concrete requests, and the pluggable client that
//! sends them.
//!
//! The dispatcher depends only on the [`Transport`] trait. Anything that can
//! take a [`ResolvedRequest`] and come back with a [`Response`] or a
//! [`TransportError`] is a valid transport; [`HttpTransport`] is the
//! reqwest-backed default.
//!
//! Transports must fully consume the response body into the returned
//! [`Response`] before handing it back, on every path. Buffering up front is
//! what lets decoders inspect a 2xx body for retry-triggering conditions
//! without the network stream being readable twice, and it guarantees the
//! connection resource is released before any retry sends again.

use crate::response::Response;
use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, Method};
use std::time::Duration;
use url::Url;

/// A concrete request, ready for the wire.
///
/// Produced fresh for every attempt by template resolution, then mutated by
/// the interceptor chain, then sent. Never reused across attempts, so
/// interceptor side effects re-apply identically on retry.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRequest {
    /// The HTTP verb.
    pub method: Method,
    /// The absolute URL, query included.
    pub url: Url,
    /// Finalized headers.
    pub headers: HeaderMap,
    /// Finalized body bytes, if any.
    pub body: Option<Bytes>,
}

impl ResolvedRequest {
    /// Returns a header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// Replaces the body and refreshes the `Content-Length` header.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = Some(body.into());
        self.refresh_content_length();
    }

    /// Sets `Content-Length` to match the current body, or removes it when
    /// there is no body.
    pub(crate) fn refresh_content_length(&mut self) {
        match &self.body {
            Some(body) => {
                self.headers
                    .insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
            }
            None => {
                self.headers.remove(header::CONTENT_LENGTH);
            }
        }
    }
}

/// Where in the exchange a transport failure happened.
///
/// The distinction drives retry eligibility: before any response byte the
/// request may simply be resent, while a failure after the response began
/// means server-side effects may already be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePhase {
    /// Nothing of the response was received. Connect errors, resets while
    /// writing the request, timeouts with no bytes read.
    BeforeResponse,
    /// The response started arriving and then reading it failed, e.g. a
    /// truncated body.
    MidResponse,
}

/// A failure reported by the transport.
#[derive(thiserror::Error, Debug)]
#[error("{source}")]
pub struct TransportError {
    phase: FailurePhase,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl TransportError {
    /// A failure that happened before any response byte arrived.
    pub fn before_response(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self {
            phase: FailurePhase::BeforeResponse,
            source: source.into(),
        }
    }

    /// A failure that happened after the response began.
    pub fn mid_response(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self {
            phase: FailurePhase::MidResponse,
            source: source.into(),
        }
    }

    /// Where the failure happened.
    pub fn phase(&self) -> FailurePhase {
        self.phase
    }
}

/// The black-box send capability the dispatcher is built on.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one request and returns the fully buffered response.
    async fn send(&self, request: &ResolvedRequest) -> Result<Response, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send(&self, request: &ResolvedRequest) -> Result<Response, TransportError> {
        (**self).send(request).await
    }
}

/// The default transport, backed by a pooled `reqwest` client.
///
/// # Examples
///
/// ```no_run
/// use beckon::transport::HttpTransport;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), beckon::Error> {
/// let transport = HttpTransport::new()?.with_timeout(Duration::from_secs(30));
/// # let _ = transport;
/// # Ok(())
/// # }
/// ```
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Option<Duration>,
}

impl HttpTransport {
    /// Creates a transport with a default reqwest client.
    pub fn new() -> crate::Result<Self> {
        let client = reqwest::Client::builder().build().map_err(|e| {
            crate::Error::Configuration(format!("failed to build HTTP client: {e}"))
        })?;
        Ok(Self {
            client,
            timeout: None,
        })
    }

    /// Wraps an existing reqwest client, keeping its pool and TLS setup.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: None,
        }
    }

    /// Sets a per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ResolvedRequest) -> Result<Response, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        // A send error means no usable response ever arrived.
        let response = builder
            .send()
            .await
            .map_err(TransportError::before_response)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(TransportError::mid_response)?;

        Ok(Response::new(status, headers, body))
    }
}
