//! The invocation dispatcher.
//!
//! A [`Client`] holds the method registry, the transport, and the
//! configuration bundle (encoder, decoder, error decoder, retry policy,
//! interceptors), each overridable per [`MethodKey`] with specific-over-
//! general precedence. [`Client::invoke`] runs the full state machine for
//! one call: resolve the template, apply interceptors, send, classify the
//! outcome, and either decode a value or consult the per-invocation retry
//! budget and go again.

use crate::codec::{
    apply_content_encoding, Decoder, DefaultDecoder, DefaultEncoder, DefaultErrorDecoder,
    Encoder, ErrorDecoder,
};
use crate::interceptor::RequestInterceptor;
use crate::method::{Binding, Expander, MethodKey, MethodSpec, Value};
use crate::response::Reply;
use crate::retry::{RetryPolicy, RetryState};
use crate::template::ParamValues;
use crate::transport::{
    FailurePhase, HttpTransport, ResolvedRequest, Transport, TransportError,
};
use crate::{Error, Result};
use http::{HeaderMap, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Supplies the root URL an invocation is sent to.
///
/// The core only appends each method's relative path and query; where the
/// root comes from (a fixed string, service discovery, a per-call lookup)
/// is the target's business. Closures returning a [`Url`] implement this
/// directly.
pub trait Target: Send + Sync {
    /// Resolves the base URL for one attempt.
    fn resolve(&self) -> Result<Url>;
}

/// A target with a fixed base URL.
#[derive(Debug, Clone)]
pub struct HardCodedTarget {
    url: Url,
}

impl HardCodedTarget {
    /// Parses and pins the base URL.
    pub fn new(url: impl AsRef<str>) -> Result<Self> {
        let url = Url::parse(url.as_ref())
            .map_err(|e| Error::Configuration(format!("invalid base URL: {e}")))?;
        Ok(Self { url })
    }
}

impl Target for HardCodedTarget {
    fn resolve(&self) -> Result<Url> {
        Ok(self.url.clone())
    }
}

impl<F> Target for F
where
    F: Fn() -> Result<Url> + Send + Sync,
{
    fn resolve(&self) -> Result<Url> {
        self()
    }
}

/// Per-method configuration overrides.
///
/// Every field left unset falls back to the client-wide default; overrides
/// are independent, so a method can replace just its error decoder while
/// keeping everything else.
#[derive(Clone, Default)]
pub struct MethodOverrides {
    encoder: Option<Arc<dyn Encoder>>,
    decoder: Option<Arc<dyn Decoder>>,
    error_decoder: Option<Arc<dyn ErrorDecoder>>,
    retry_policy: Option<RetryPolicy>,
    interceptors: Option<Vec<Arc<dyn RequestInterceptor>>>,
}

impl MethodOverrides {
    /// Starts an empty override bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the encoder for this method.
    pub fn encoder(mut self, encoder: impl Encoder + 'static) -> Self {
        self.encoder = Some(Arc::new(encoder));
        self
    }

    /// Overrides the decoder for this method.
    pub fn decoder(mut self, decoder: impl Decoder + 'static) -> Self {
        self.decoder = Some(Arc::new(decoder));
        self
    }

    /// Overrides the error decoder for this method.
    pub fn error_decoder(mut self, error_decoder: impl ErrorDecoder + 'static) -> Self {
        self.error_decoder = Some(Arc::new(error_decoder));
        self
    }

    /// Overrides the retry policy for this method.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Replaces the interceptor list for this method.
    pub fn interceptors(mut self, interceptors: Vec<Arc<dyn RequestInterceptor>>) -> Self {
        self.interceptors = Some(interceptors);
        self
    }
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    target: Arc<dyn Target>,
    registry: HashMap<MethodKey, MethodSpec>,
    encoder: Arc<dyn Encoder>,
    decoder: Arc<dyn Decoder>,
    error_decoder: Arc<dyn ErrorDecoder>,
    retry_policy: RetryPolicy,
    max_elapsed: Option<Duration>,
    retry_after_cap: Duration,
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
    overrides: HashMap<MethodKey, MethodOverrides>,
}

/// The effective configuration of one method, overrides resolved.
struct MethodConfig<'a> {
    encoder: &'a dyn Encoder,
    decoder: &'a dyn Decoder,
    error_decoder: &'a dyn ErrorDecoder,
    retry_policy: &'a RetryPolicy,
    interceptors: &'a [Arc<dyn RequestInterceptor>],
}

/// A declarative HTTP API client.
///
/// Built once with a registry of [`MethodSpec`]s, then shared freely: the
/// registry and templates are immutable, and all per-call state (the retry
/// budget, the per-attempt request) is invocation-local.
///
/// # Examples
///
/// ```no_run
/// use beckon::{
///     Binding, Client, DeclaredType, MethodKey, MethodSpec, Template, Value,
/// };
/// use http::Method;
///
/// # async fn example() -> Result<(), beckon::Error> {
/// let find_user = MethodKey::new("Users", "find", vec![DeclaredType::Text]);
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .register(MethodSpec::new(
///         find_user.clone(),
///         Template::new(Method::GET, "/users/{id}"),
///         vec![Binding::param("id")],
///         DeclaredType::Text,
///     ))?
///     .build()?;
///
/// let reply = client.invoke(&find_user, vec![Value::from("123")]).await?;
/// println!("body: {:?}", reply.text());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("methods", &self.inner.registry.len())
            .field("retry_policy", &self.inner.retry_policy)
            .field("max_elapsed", &self.inner.max_elapsed)
            .field("retry_after_cap", &self.inner.retry_after_cap)
            .field("interceptors", &self.inner.interceptors.len())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a new [`ClientBuilder`].
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Invokes a registered method with positional argument values.
    ///
    /// Runs resolution, interceptors, dispatch, classification, and retries
    /// in-line on the calling task; backoff waits happen here too. Returns
    /// the decoded value with transaction metadata, or the terminal error.
    pub async fn invoke(&self, key: &MethodKey, args: Vec<Value>) -> Result<Reply> {
        let spec = self.inner.registry.get(key).ok_or_else(|| {
            Error::Configuration(format!("no method registered for {key}"))
        })?;
        if args.len() != spec.bindings.len() {
            return Err(Error::Configuration(format!(
                "{key} takes {} arguments, got {}",
                spec.bindings.len(),
                args.len()
            )));
        }

        let cfg = self.config_for(key);
        let started = Instant::now();
        // One budget per invocation; retries never leak across calls.
        let mut budget = RetryState::new(
            cfg.retry_policy.clone(),
            self.inner.max_elapsed,
            self.inner.retry_after_cap,
        );
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            match self.attempt(spec, &args, &cfg).await {
                Ok((value, status, headers)) => {
                    tracing::info!(
                        key = %spec.key,
                        status = status.as_u16(),
                        attempts = attempt,
                        latency_ms = started.elapsed().as_millis() as u64,
                        "invocation succeeded"
                    );
                    return Ok(Reply {
                        value,
                        status,
                        headers,
                        latency: started.elapsed(),
                        attempts: attempt,
                    });
                }
                Err(error) => {
                    tracing::warn!(
                        key = %spec.key,
                        attempt = attempt,
                        error = %error,
                        "attempt failed"
                    );
                    // Terminal errors propagate here unchanged.
                    let signal = error.retry_signal()?;
                    match budget.consider(&signal) {
                        Some(delay) => {
                            tracing::info!(
                                key = %spec.key,
                                delay_ms = delay.as_millis() as u64,
                                attempt = attempt,
                                "retrying after delay"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            return Err(Error::RetriesExhausted {
                                attempts: attempt,
                                last: signal.cause,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Executes a single attempt: a fresh request, resolved, intercepted,
    /// sent, and decoded.
    async fn attempt(
        &self,
        spec: &MethodSpec,
        args: &[Value],
        cfg: &MethodConfig<'_>,
    ) -> Result<(Value, StatusCode, HeaderMap)> {
        let values = expand_arguments(spec, args)?;
        let base = self.inner.target.resolve()?;
        let mut request = spec.template.resolve(&base, &values)?;

        if let Some((position, declared)) = spec.body_binding() {
            cfg.encoder
                .encode(&args[position], &declared, &mut request)
                .map_err(|e| Error::Encode {
                    key: spec.key.to_string(),
                    message: e.to_string(),
                })?;
        }
        apply_content_encoding(&mut request).map_err(|e| Error::Encode {
            key: spec.key.to_string(),
            message: e.to_string(),
        })?;

        for interceptor in cfg.interceptors {
            interceptor.apply(&mut request);
        }

        tracing::debug!(
            method = %request.method,
            url = %request.url,
            "dispatching request"
        );
        let response = self
            .inner
            .transport
            .send(&request)
            .await
            .map_err(|error| classify_transport(spec, &request, error))?;
        tracing::debug!(status = response.status.as_u16(), "received response");

        if response.status.is_success() {
            let status = response.status;
            let headers = response.headers.clone();
            let value = cfg
                .decoder
                .decode(&response, &spec.return_type)
                .map_err(|error| attach_decode_context(error, spec, &request))?;
            Ok((value, status, headers))
        } else {
            Err(cfg.error_decoder.decode(&spec.key, response))
        }
    }

    fn config_for(&self, key: &MethodKey) -> MethodConfig<'_> {
        let inner = &*self.inner;
        let overrides = inner.overrides.get(key);
        MethodConfig {
            encoder: overrides
                .and_then(|o| o.encoder.as_deref())
                .unwrap_or(&*inner.encoder),
            decoder: overrides
                .and_then(|o| o.decoder.as_deref())
                .unwrap_or(&*inner.decoder),
            error_decoder: overrides
                .and_then(|o| o.error_decoder.as_deref())
                .unwrap_or(&*inner.error_decoder),
            retry_policy: overrides
                .and_then(|o| o.retry_policy.as_ref())
                .unwrap_or(&inner.retry_policy),
            interceptors: overrides
                .and_then(|o| o.interceptors.as_deref())
                .unwrap_or(&inner.interceptors),
        }
    }
}

/// Fills in the call context a decoder cannot know about.
fn attach_decode_context(error: Error, spec: &MethodSpec, request: &ResolvedRequest) -> Error {
    match error {
        Error::Decode {
            status,
            message,
            raw_response,
            ..
        } => Error::Decode {
            key: spec.key.to_string(),
            method: Some(request.method.clone()),
            url: request.url.to_string(),
            status,
            message,
            raw_response,
        },
        other => other,
    }
}

fn classify_transport(
    spec: &MethodSpec,
    request: &ResolvedRequest,
    error: TransportError,
) -> Error {
    match error.phase() {
        FailurePhase::BeforeResponse => Error::Transport {
            method: request.method.clone(),
            url: request.url.to_string(),
            source: error,
        },
        FailurePhase::MidResponse => Error::ResponseRead {
            key: spec.key.to_string(),
            method: request.method.clone(),
            url: request.url.to_string(),
            source: error,
        },
    }
}

/// Expands bound arguments into the placeholder name → values mapping.
///
/// Positions sharing a name append in argument order; a list argument
/// contributes one string per element.
fn expand_arguments(spec: &MethodSpec, args: &[Value]) -> Result<ParamValues> {
    let mut values = ParamValues::new();
    for (binding, value) in spec.bindings.iter().zip(args) {
        let Binding::Param { name, expander } = binding else {
            continue;
        };
        let slot = values.entry(name.clone()).or_default();
        match value {
            Value::List(items) => {
                for item in items {
                    slot.push(expand_one(item, expander.as_deref())?);
                }
            }
            single => slot.push(expand_one(single, expander.as_deref())?),
        }
    }
    Ok(values)
}

fn expand_one(value: &Value, expander: Option<&dyn Expander>) -> Result<String> {
    match expander {
        Some(expander) => Ok(expander.expand(value)),
        None => value.natural_string(),
    }
}

/// Builder for configuring and creating a [`Client`].
///
/// # Examples
///
/// ```no_run
/// use beckon::{Client, JsonDecoder, JsonEncoder, RetryPolicy};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), beckon::Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .timeout(Duration::from_secs(30))
///     .encoder(JsonEncoder)
///     .decoder(JsonDecoder)
///     .retry_policy(RetryPolicy::Linear {
///         delay: Duration::from_millis(200),
///         max_retries: 3,
///     })
///     .build()?;
/// # let _ = client;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    target: Option<Arc<dyn Target>>,
    transport: Option<Arc<dyn Transport>>,
    timeout: Option<Duration>,
    registry: HashMap<MethodKey, MethodSpec>,
    encoder: Arc<dyn Encoder>,
    decoder: Arc<dyn Decoder>,
    error_decoder: Arc<dyn ErrorDecoder>,
    retry_policy: RetryPolicy,
    max_elapsed: Option<Duration>,
    retry_after_cap: Duration,
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
    overrides: HashMap<MethodKey, MethodOverrides>,
}

impl ClientBuilder {
    /// Creates a builder with default settings: default codecs, the default
    /// bounded-exponential retry policy, a 30s elapsed-time bound, and a
    /// 5 minute cap on server-suggested retry waits.
    pub fn new() -> Self {
        Self {
            target: None,
            transport: None,
            timeout: None,
            registry: HashMap::new(),
            encoder: Arc::new(DefaultEncoder),
            decoder: Arc::new(DefaultDecoder),
            error_decoder: Arc::new(DefaultErrorDecoder),
            retry_policy: RetryPolicy::default(),
            max_elapsed: Some(Duration::from_secs(30)),
            retry_after_cap: Duration::from_secs(300),
            interceptors: Vec::new(),
            overrides: HashMap::new(),
        }
    }

    /// Sets a fixed base URL for all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.target = Some(Arc::new(HardCodedTarget::new(url)?));
        Ok(self)
    }

    /// Sets a dynamic target, e.g. a service-discovery lookup.
    pub fn target(mut self, target: impl Target + 'static) -> Self {
        self.target = Some(Arc::new(target));
        self
    }

    /// Replaces the transport. Defaults to [`HttpTransport`].
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Sets the per-request timeout of the default transport.
    ///
    /// Ignored when a custom transport is supplied.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Registers a method spec.
    ///
    /// # Errors
    ///
    /// Returns an error if the spec fails validation or its key is already
    /// registered.
    pub fn register(mut self, spec: MethodSpec) -> Result<Self> {
        spec.validate()?;
        if self.registry.contains_key(&spec.key) {
            return Err(Error::Configuration(format!(
                "ambiguous method key: {} is already registered",
                spec.key
            )));
        }
        self.registry.insert(spec.key.clone(), spec);
        Ok(self)
    }

    /// Sets the default encoder.
    pub fn encoder(mut self, encoder: impl Encoder + 'static) -> Self {
        self.encoder = Arc::new(encoder);
        self
    }

    /// Sets the default decoder.
    pub fn decoder(mut self, decoder: impl Decoder + 'static) -> Self {
        self.decoder = Arc::new(decoder);
        self
    }

    /// Sets the default error decoder.
    pub fn error_decoder(mut self, error_decoder: impl ErrorDecoder + 'static) -> Self {
        self.error_decoder = Arc::new(error_decoder);
        self
    }

    /// Sets the default retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Bounds the total time one invocation may spend across attempts and
    /// backoff waits.
    pub fn max_elapsed(mut self, max: Duration) -> Self {
        self.max_elapsed = Some(max);
        self
    }

    /// Removes the elapsed-time bound, leaving only the attempt count.
    pub fn no_max_elapsed(mut self) -> Self {
        self.max_elapsed = None;
        self
    }

    /// Caps how long a server-suggested `Retry-After` may stall a retry.
    pub fn retry_after_cap(mut self, cap: Duration) -> Self {
        self.retry_after_cap = cap;
        self
    }

    /// Appends a request interceptor. Interceptors apply in registration
    /// order.
    pub fn interceptor(mut self, interceptor: impl RequestInterceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Attaches per-method overrides.
    pub fn override_method(mut self, key: MethodKey, overrides: MethodOverrides) -> Self {
        self.overrides.insert(key, overrides);
        self
    }

    /// Builds the configured [`Client`].
    ///
    /// # Errors
    ///
    /// Returns an error when no target was set, or when the default
    /// transport cannot be constructed.
    pub fn build(self) -> Result<Client> {
        let target = self
            .target
            .ok_or_else(|| Error::Configuration("a base URL or target is required".to_string()))?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let mut transport = HttpTransport::new()?;
                if let Some(timeout) = self.timeout {
                    transport = transport.with_timeout(timeout);
                }
                Arc::new(transport)
            }
        };

        Ok(Client {
            inner: Arc::new(ClientInner {
                transport,
                target,
                registry: self.registry,
                encoder: self.encoder,
                decoder: self.decoder,
                error_decoder: self.error_decoder,
                retry_policy: self.retry_policy,
                max_elapsed: self.max_elapsed,
                retry_after_cap: self.retry_after_cap,
                interceptors: self.interceptors,
                overrides: self.overrides,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("methods", &self.registry.len())
            .field("retry_policy", &self.retry_policy)
            .field("max_elapsed", &self.max_elapsed)
            .field("retry_after_cap", &self.retry_after_cap)
            .field("interceptors", &self.interceptors.len())
            .finish_non_exhaustive()
    }
}
