//! Basic example: describe a JSON API as method specs and invoke them.
//!
//! This example shows how to:
//! - Register method specs with path placeholders and a body binding
//! - Invoke methods with plain values
//! - Access the decoded reply and its metadata
//!
//! Run with: `cargo run --example user_service`

use beckon::{
    Binding, Client, DeclaredType, Error, JsonDecoder, JsonEncoder, MethodKey, MethodSpec,
    Template, Value,
};
use http::Method;

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter("beckon=debug,user_service=info")
        .init();

    let find_post = MethodKey::new("Posts", "find", vec![DeclaredType::Text]);
    let create_post = MethodKey::new("Posts", "create", vec![DeclaredType::Json]);

    // Describe the JSONPlaceholder API once, up front.
    let client = Client::builder()
        .base_url("https://jsonplaceholder.typicode.com")?
        .encoder(JsonEncoder)
        .decoder(JsonDecoder)
        .register(MethodSpec::new(
            find_post.clone(),
            Template::new(Method::GET, "/posts/{id}"),
            vec![Binding::param("id")],
            DeclaredType::Json,
        ))?
        .register(MethodSpec::new(
            create_post.clone(),
            Template::new(Method::POST, "/posts").encoded_body(),
            vec![Binding::body()],
            DeclaredType::Json,
        ))?
        .build()?;

    println!("=== GET Request Example ===");
    let reply = client.invoke(&find_post, vec![Value::from("1")]).await?;
    if let Some(post) = reply.value.as_json() {
        println!("Post ID: {}", post["id"]);
        println!("Title: {}", post["title"]);
    }
    println!("Request latency: {:?}", reply.latency);
    println!("Status code: {}", reply.status);
    println!();

    println!("=== POST Request Example ===");
    let body = Value::json(&serde_json::json!({
        "title": "My New Post",
        "body": "This is the content of my new post!",
        "userId": 1,
    }))?;
    let created = client.invoke(&create_post, vec![body]).await?;
    if let Some(post) = created.value.as_json() {
        println!("Created post with ID: {}", post["id"]);
    }
    println!("Status code: {}", created.status);

    Ok(())
}
