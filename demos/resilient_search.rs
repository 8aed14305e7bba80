//! Example demonstrating retries, interceptors, and multi-valued queries.
//!
//! This example shows how to:
//! - Expand a list argument into repeated query parameters
//! - Attach interceptors that apply to every attempt
//! - Configure backoff and per-method retry overrides
//!
//! Run with: `cargo run --example resilient_search`

use beckon::{
    Binding, Client, DeclaredType, Error, HeaderInterceptor, JsonDecoder, MethodKey,
    MethodOverrides, MethodSpec, RetryPolicy, Template, Value,
};
use http::Method;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("beckon=debug,resilient_search=info")
        .init();

    let search = MethodKey::new(
        "Search",
        "query",
        vec![DeclaredType::Text, DeclaredType::TextList],
    );
    let health = MethodKey::new("Search", "health", vec![]);

    let client = Client::builder()
        .base_url("https://httpbin.org")?
        .timeout(Duration::from_secs(10))
        .decoder(JsonDecoder)
        // Applied in order, on every attempt, retries included.
        .interceptor(HeaderInterceptor::new("User-Agent", "resilient-search/0.1")?)
        .interceptor(|request: &mut beckon::ResolvedRequest| {
            tracing::info!(url = %request.url, "outbound request");
        })
        .retry_policy(RetryPolicy::ExponentialBackoff {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            max_retries: 3,
            multiplier: 2.0,
            jitter: true,
        })
        .register(MethodSpec::new(
            search.clone(),
            Template::new(Method::GET, "/get?q={q}&tag={tag}"),
            vec![Binding::param("q"), Binding::param("tag")],
            DeclaredType::Json,
        ))?
        .register(MethodSpec::new(
            health.clone(),
            Template::new(Method::GET, "/status/200"),
            vec![],
            DeclaredType::Unit,
        ))?
        // Health probes should fail fast, whatever the client default is.
        .override_method(health.clone(), MethodOverrides::new().retry_policy(RetryPolicy::None))
        .build()?;

    println!("=== Multi-valued query ===");
    let reply = client
        .invoke(
            &search,
            vec![
                Value::from("rust"),
                Value::List(vec![Value::from("http"), Value::from("client")]),
            ],
        )
        .await?;
    // httpbin echoes the request; the query shows ?q=rust&tag=http&tag=client.
    if let Some(echo) = reply.value.as_json() {
        println!("Server saw: {}", echo["url"]);
    }
    println!("Attempts: {}", reply.attempts);
    println!();

    println!("=== Health check, no retries ===");
    match client.invoke(&health, vec![]).await {
        Ok(reply) => println!("Healthy in {:?}", reply.latency),
        Err(e) => println!("Unhealthy: {e}"),
    }

    Ok(())
}
