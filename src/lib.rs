//! # Beckon - A declarative HTTP API client core
//!
//! Beckon lets you describe a remote HTTP API as a set of method
//! specifications, then call those methods with plain values. Each spec pairs
//! a request template (verb, path, query, headers, body slot, all with named
//! placeholders) with parameter bindings that say which argument fills which
//! slot. The dispatcher resolves the template per call, runs the interceptor
//! chain, sends the request over a pluggable transport, classifies the
//! outcome, and retries recoverable failures with backoff.
//!
//! ## Quick Start
//!
//! ```no_run
//! use beckon::{
//!     Binding, Client, DeclaredType, JsonDecoder, JsonEncoder, MethodKey,
//!     MethodSpec, Template, Value,
//! };
//! use http::Method;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), beckon::Error> {
//!     let find = MethodKey::new("Users", "find", vec![DeclaredType::Text]);
//!     let create = MethodKey::new("Users", "create", vec![DeclaredType::Json]);
//!
//!     let client = Client::builder()
//!         .base_url("https://api.example.com")?
//!         .encoder(JsonEncoder)
//!         .decoder(JsonDecoder)
//!         .register(MethodSpec::new(
//!             find.clone(),
//!             Template::new(Method::GET, "/users/{id}"),
//!             vec![Binding::param("id")],
//!             DeclaredType::Json,
//!         ))?
//!         .register(MethodSpec::new(
//!             create.clone(),
//!             Template::new(Method::POST, "/users").encoded_body(),
//!             vec![Binding::body()],
//!             DeclaredType::Json,
//!         ))?
//!         .build()?;
//!
//!     let user = client.invoke(&find, vec![Value::from("123")]).await?;
//!     println!("user: {:?}", user.value);
//!     println!("took {:?} over {} attempt(s)", user.latency, user.attempts);
//!
//!     let body = Value::json(&serde_json::json!({ "name": "Alice" }))?;
//!     let created = client.invoke(&create, vec![body]).await?;
//!     println!("created: {:?}", created.value);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Declarative method registry** - Describe each API method once as a
//!   [`MethodSpec`]; invoke it anywhere with positional [`Value`]s
//! - **Named-placeholder templates** - Path, query, header, and body
//!   templates with multi-value expansion for repeated query parameters
//! - **Pluggable codecs** - [`Encoder`], [`Decoder`], and [`ErrorDecoder`]
//!   seams, with plain-text and JSON implementations included, overridable
//!   per method
//! - **Failure classification** - Transport failures before a response are
//!   retried; failures while reading a response are terminal and name the
//!   method and URL involved
//! - **Flexible retry logic** - Exponential backoff, linear, or custom
//!   policies; decoders can request retries too, drawing from the same
//!   per-invocation budget
//! - **Request interceptors** - Ordered cross-cutting request mutation,
//!   re-applied on every attempt
//! - **Automatic logging** - Structured logging with `tracing` for
//!   observability
//!
//! ## Error Handling
//!
//! Errors keep the raw response around where one exists:
//!
//! ```no_run
//! use beckon::{Client, Error, MethodKey};
//!
//! # async fn example(client: Client, key: MethodKey) -> Result<(), Error> {
//! match client.invoke(&key, vec![]).await {
//!     Ok(reply) => println!("success: {:?}", reply.value),
//!     Err(Error::Status { status, raw_response, .. }) => {
//!         eprintln!("HTTP error {status}: {raw_response}");
//!     }
//!     Err(Error::RetriesExhausted { attempts, last }) => {
//!         eprintln!("gave up after {attempts} attempts: {last}");
//!     }
//!     Err(e) => eprintln!("other error: {e}"),
//! }
//! # Ok(())
//! # }
//! ```

mod client;
pub mod codec;
mod error;
pub mod interceptor;
mod method;
mod response;
pub mod retry;
mod template;
pub mod transport;

pub use client::{Client, ClientBuilder, HardCodedTarget, MethodOverrides, Target};
pub use codec::{
    Decoder, DefaultDecoder, DefaultEncoder, DefaultErrorDecoder, EncodeError, Encoder,
    ErrorDecoder, JsonDecoder, JsonEncoder,
};
pub use error::{Error, Result};
pub use interceptor::{HeaderInterceptor, RequestInterceptor};
pub use method::{Binding, DeclaredType, Expander, MethodKey, MethodSpec, Value};
pub use response::{Reply, Response};
pub use retry::{RetryPolicy, RetrySignal, RetryState};
pub use template::{ParamValues, Template};
pub use transport::{FailurePhase, HttpTransport, ResolvedRequest, Transport, TransportError};
