//! Request interceptors: ordered cross-cutting mutators.
//!
//! Interceptors run after template resolution and before the transport, once
//! per attempt, in registration order. Each sees the cumulative result of
//! all earlier ones and may add or replace headers and body content. Because
//! the request is rebuilt fresh for every attempt, stateful interceptors
//! (tracing, signing) observe each retry individually.

use crate::transport::ResolvedRequest;
use crate::{Error, Result};
use http::{HeaderName, HeaderValue};

/// A mutator applied to every resolved request before dispatch.
///
/// Closures work directly:
///
/// ```
/// use beckon::interceptor::RequestInterceptor;
/// use beckon::transport::ResolvedRequest;
///
/// let trace = |request: &mut ResolvedRequest| {
///     request
///         .headers
///         .insert("x-request-source", "batch-sync".parse().unwrap());
/// };
/// let _boxed: Box<dyn RequestInterceptor> = Box::new(trace);
/// ```
pub trait RequestInterceptor: Send + Sync {
    /// Mutates the request in place.
    fn apply(&self, request: &mut ResolvedRequest);
}

impl<F> RequestInterceptor for F
where
    F: Fn(&mut ResolvedRequest) + Send + Sync,
{
    fn apply(&self, request: &mut ResolvedRequest) {
        self(request)
    }
}

/// An interceptor that sets one fixed header on every request.
#[derive(Debug, Clone)]
pub struct HeaderInterceptor {
    name: HeaderName,
    value: HeaderValue,
}

impl HeaderInterceptor {
    /// Creates the interceptor, validating name and value up front.
    pub fn new(name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::try_from(name)
            .map_err(|e| Error::Configuration(format!("invalid header name: {e}")))?;
        let value = HeaderValue::try_from(value)
            .map_err(|e| Error::Configuration(format!("invalid header value: {e}")))?;
        Ok(Self { name, value })
    }
}

impl RequestInterceptor for HeaderInterceptor {
    fn apply(&self, request: &mut ResolvedRequest) {
        request
            .headers
            .insert(self.name.clone(), self.value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, Method};
    use url::Url;

    fn request() -> ResolvedRequest {
        ResolvedRequest {
            method: Method::GET,
            url: Url::parse("http://localhost/").unwrap(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    #[test]
    fn interceptors_compose_in_registration_order() {
        let first = HeaderInterceptor::new("X-Forwarded-For", "origin.host.com").unwrap();
        let second = HeaderInterceptor::new("User-Agent", "beckon").unwrap();
        // A later interceptor sees and may override what earlier ones set.
        let third = HeaderInterceptor::new("User-Agent", "beckon/override").unwrap();

        let chain: Vec<Box<dyn RequestInterceptor>> =
            vec![Box::new(first), Box::new(second), Box::new(third)];

        let mut request = request();
        for interceptor in &chain {
            interceptor.apply(&mut request);
        }

        assert_eq!(
            request.header("X-Forwarded-For"),
            Some("origin.host.com")
        );
        assert_eq!(request.header("User-Agent"), Some("beckon/override"));
    }

    #[test]
    fn closure_interceptors_can_rewrite_the_body() {
        let stamp = |request: &mut ResolvedRequest| {
            request.set_body(&b"stamped"[..]);
        };
        let mut request = request();
        stamp.apply(&mut request);
        assert_eq!(request.body.as_deref(), Some(&b"stamped"[..]));
        assert_eq!(request.header("content-length"), Some("7"));
    }

    #[test]
    fn invalid_header_names_fail_at_construction() {
        assert!(HeaderInterceptor::new("bad header", "v").is_err());
    }
}
