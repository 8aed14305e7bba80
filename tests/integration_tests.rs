//! Integration tests: wiremock for real HTTP exchanges, a scripted transport
//! for precise call counting and failure injection.

use async_trait::async_trait;
use beckon::{
    Binding, Client, DeclaredType, Decoder, DefaultDecoder, DefaultErrorDecoder, EncodeError,
    Encoder, Error, ErrorDecoder, JsonDecoder, JsonEncoder, MethodKey, MethodOverrides,
    MethodSpec, ResolvedRequest, Response, RetryPolicy, RetrySignal, Template, Transport,
    TransportError, Value,
};
use http::{HeaderMap, Method, StatusCode};
use std::collections::VecDeque;
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// One scripted outcome for the fake transport.
enum Step {
    Respond(StatusCode, &'static str),
    FailBeforeResponse(&'static str),
    FailMidResponse(&'static str),
}

/// A transport that replays a script and records every request it saw.
struct ScriptedTransport {
    calls: AtomicUsize,
    requests: Mutex<Vec<ResolvedRequest>>,
    script: Mutex<VecDeque<Step>>,
}

impl ScriptedTransport {
    fn new(script: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            script: Mutex::new(script.into()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn requests(&self) -> Vec<ResolvedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ResolvedRequest) -> Result<Response, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        match self.script.lock().unwrap().pop_front() {
            Some(Step::Respond(status, body)) => {
                Ok(Response::new(status, HeaderMap::new(), body.as_bytes().to_vec()))
            }
            Some(Step::FailBeforeResponse(msg)) => Err(TransportError::before_response(msg)),
            Some(Step::FailMidResponse(msg)) => Err(TransportError::mid_response(msg)),
            None => panic!("transport called more times than scripted"),
        }
    }
}

fn fast_retry(max_retries: usize) -> RetryPolicy {
    RetryPolicy::Linear {
        delay: Duration::from_millis(1),
        max_retries,
    }
}

fn scripted_client(
    transport: Arc<ScriptedTransport>,
    policy: RetryPolicy,
    spec: MethodSpec,
) -> Client {
    Client::builder()
        .base_url("http://scripted.invalid")
        .unwrap()
        .transport(transport)
        .retry_policy(policy)
        .register(spec)
        .unwrap()
        .build()
        .unwrap()
}

#[tokio::test]
async fn multi_valued_query_expands_over_the_resolved_url() {
    let transport = ScriptedTransport::new(vec![Step::Respond(StatusCode::OK, "")]);
    let key = MethodKey::new(
        "Search",
        "find",
        vec![DeclaredType::Text, DeclaredType::TextList],
    );
    let client = scripted_client(
        transport.clone(),
        RetryPolicy::None,
        MethodSpec::new(
            key.clone(),
            Template::new(Method::GET, "/?1={one}&2={two}"),
            vec![Binding::param("one"), Binding::param("two")],
            DeclaredType::Unit,
        ),
    );

    client
        .invoke(
            &key,
            vec![
                Value::from("user"),
                Value::List(vec![Value::from("apple"), Value::from("pear")]),
            ],
        )
        .await
        .unwrap();

    let sent = transport.requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].url.query(), Some("1=user&2=apple&2=pear"));
}

#[tokio::test]
async fn path_and_text_reply_over_the_wire() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/123"))
        .respond_with(ResponseTemplate::new(200).set_body_string("denominator"))
        .mount(&mock_server)
        .await;

    let key = MethodKey::new("Users", "find", vec![DeclaredType::Text]);
    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .register(MethodSpec::new(
            key.clone(),
            Template::new(Method::GET, "/users/{id}"),
            vec![Binding::param("id")],
            DeclaredType::Text,
        ))
        .unwrap()
        .build()
        .unwrap();

    let reply = client.invoke(&key, vec![Value::from("123")]).await.unwrap();

    assert_eq!(reply.text(), Some("denominator"));
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.attempts, 1);
    assert!(!reply.was_retried());
}

#[tokio::test]
async fn transport_failure_before_response_is_retried() {
    let transport = ScriptedTransport::new(vec![
        Step::FailBeforeResponse("connection refused"),
        Step::Respond(StatusCode::OK, "recovered"),
    ]);
    let key = MethodKey::new("Api", "get", vec![]);
    let client = scripted_client(
        transport.clone(),
        fast_retry(3),
        MethodSpec::new(
            key.clone(),
            Template::new(Method::GET, "/"),
            vec![],
            DeclaredType::Text,
        ),
    );

    let reply = client.invoke(&key, vec![]).await.unwrap();

    assert_eq!(transport.calls(), 2);
    assert_eq!(reply.attempts, 2);
    assert!(reply.was_retried());
    assert_eq!(reply.text(), Some("recovered"));
}

#[tokio::test]
async fn exhausted_retries_surface_the_last_cause() {
    let transport = ScriptedTransport::new(vec![
        Step::FailBeforeResponse("connection refused"),
        Step::FailBeforeResponse("connection refused"),
    ]);
    let key = MethodKey::new("Api", "get", vec![]);
    let client = scripted_client(
        transport.clone(),
        fast_retry(1),
        MethodSpec::new(
            key.clone(),
            Template::new(Method::GET, "/"),
            vec![],
            DeclaredType::Text,
        ),
    );

    let err = client.invoke(&key, vec![]).await.unwrap_err();

    assert_eq!(transport.calls(), 2);
    match err {
        Error::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 2);
            assert!(matches!(*last, Error::Transport { .. }));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
}

/// A decoder that treats a magic body as a transient condition.
struct RetryOnMarker;

impl Decoder for RetryOnMarker {
    fn decode(&self, response: &Response, declared: &DeclaredType) -> beckon::Result<Value> {
        if response.text() == Some("retry!") {
            return Err(Error::Retryable(RetrySignal::new(Error::Decode {
                key: String::new(),
                method: None,
                url: String::new(),
                status: response.status,
                message: "transient marker in body".to_string(),
                raw_response: response.text_lossy(),
            })));
        }
        DefaultDecoder.decode(response, declared)
    }
}

#[tokio::test]
async fn decoder_can_request_a_retry_of_a_2xx_response() {
    let transport = ScriptedTransport::new(vec![
        Step::Respond(StatusCode::OK, "retry!"),
        Step::Respond(StatusCode::OK, "success!"),
    ]);
    let key = MethodKey::new("Api", "get", vec![]);
    let client = Client::builder()
        .base_url("http://scripted.invalid")
        .unwrap()
        .transport(transport.clone())
        .retry_policy(fast_retry(3))
        .decoder(RetryOnMarker)
        .register(MethodSpec::new(
            key.clone(),
            Template::new(Method::GET, "/"),
            vec![],
            DeclaredType::Text,
        ))
        .unwrap()
        .build()
        .unwrap();

    let reply = client.invoke(&key, vec![]).await.unwrap();

    assert_eq!(transport.calls(), 2);
    assert_eq!(reply.text(), Some("success!"));
    assert!(reply.was_retried());
}

#[tokio::test]
async fn decode_retries_draw_from_the_same_budget_as_transport_retries() {
    // One transport failure plus one decode-triggered retry against a budget
    // of one retry total: the second signal must exhaust it.
    let transport = ScriptedTransport::new(vec![
        Step::FailBeforeResponse("connection refused"),
        Step::Respond(StatusCode::OK, "retry!"),
    ]);
    let key = MethodKey::new("Api", "get", vec![]);
    let client = Client::builder()
        .base_url("http://scripted.invalid")
        .unwrap()
        .transport(transport.clone())
        .retry_policy(fast_retry(1))
        .decoder(RetryOnMarker)
        .register(MethodSpec::new(
            key.clone(),
            Template::new(Method::GET, "/"),
            vec![],
            DeclaredType::Text,
        ))
        .unwrap()
        .build()
        .unwrap();

    let err = client.invoke(&key, vec![]).await.unwrap_err();

    assert_eq!(transport.calls(), 2);
    assert!(matches!(err, Error::RetriesExhausted { attempts: 2, .. }));
}

#[tokio::test]
async fn mid_response_failure_is_terminal_and_names_the_call() {
    let transport = ScriptedTransport::new(vec![Step::FailMidResponse("truncated body")]);
    let key = MethodKey::new("Api", "post", vec![]);
    let client = scripted_client(
        transport.clone(),
        fast_retry(5),
        MethodSpec::new(
            key.clone(),
            Template::new(Method::POST, "/submit"),
            vec![],
            DeclaredType::Text,
        ),
    );

    let err = client.invoke(&key, vec![]).await.unwrap_err();

    // No retry happened despite the generous policy.
    assert_eq!(transport.calls(), 1);
    let message = err.to_string();
    assert!(
        message.contains("error reading response POST http://scripted.invalid/submit"),
        "{message}"
    );
    assert!(message.contains("Api#post()"), "{message}");
}

#[tokio::test]
async fn retry_budgets_do_not_leak_across_invocations() {
    let transport = ScriptedTransport::new(vec![
        Step::FailBeforeResponse("reset"),
        Step::Respond(StatusCode::OK, "first"),
        Step::FailBeforeResponse("reset"),
        Step::Respond(StatusCode::OK, "second"),
    ]);
    let key = MethodKey::new("Api", "get", vec![]);
    let client = scripted_client(
        transport.clone(),
        fast_retry(1),
        MethodSpec::new(
            key.clone(),
            Template::new(Method::GET, "/"),
            vec![],
            DeclaredType::Text,
        ),
    );

    // Each call burns the whole one-retry budget; both must still succeed.
    let first = client.invoke(&key, vec![]).await.unwrap();
    let second = client.invoke(&key, vec![]).await.unwrap();

    assert_eq!(first.text(), Some("first"));
    assert_eq!(second.text(), Some("second"));
    assert_eq!(transport.calls(), 4);
}

/// Records the declared type the dispatcher hands to the encoder.
struct CapturingEncoder(Arc<Mutex<Option<DeclaredType>>>);

impl Encoder for CapturingEncoder {
    fn encode(
        &self,
        value: &Value,
        declared: &DeclaredType,
        request: &mut ResolvedRequest,
    ) -> Result<(), EncodeError> {
        *self.0.lock().unwrap() = Some(*declared);
        JsonEncoder.encode(value, declared, request)
    }
}

#[tokio::test]
async fn encoders_see_the_declared_type_not_the_runtime_shape() {
    let transport = ScriptedTransport::new(vec![Step::Respond(StatusCode::OK, "")]);
    let seen = Arc::new(Mutex::new(None));
    let key = MethodKey::new("Api", "post", vec![DeclaredType::TextList]);
    let client = Client::builder()
        .base_url("http://scripted.invalid")
        .unwrap()
        .transport(transport.clone())
        .retry_policy(RetryPolicy::None)
        .encoder(CapturingEncoder(seen.clone()))
        .register(MethodSpec::new(
            key.clone(),
            Template::new(Method::POST, "/").encoded_body(),
            vec![Binding::body()],
            DeclaredType::Unit,
        ))
        .unwrap()
        .build()
        .unwrap();

    client
        .invoke(
            &key,
            vec![Value::List(vec![Value::from("a"), Value::from("b")])],
        )
        .await
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), Some(DeclaredType::TextList));
    let sent = transport.requests();
    assert_eq!(sent[0].body.as_deref(), Some(&br#"["a","b"]"#[..]));
}

#[tokio::test]
async fn interceptors_apply_in_order_on_every_attempt() {
    let transport = ScriptedTransport::new(vec![
        Step::FailBeforeResponse("reset"),
        Step::Respond(StatusCode::OK, ""),
    ]);
    let key = MethodKey::new("Api", "get", vec![]);
    let client = Client::builder()
        .base_url("http://scripted.invalid")
        .unwrap()
        .transport(transport.clone())
        .retry_policy(fast_retry(2))
        .interceptor(beckon::HeaderInterceptor::new("X-Stage", "one").unwrap())
        .interceptor(beckon::HeaderInterceptor::new("X-Stage", "two").unwrap())
        .register(MethodSpec::new(
            key.clone(),
            Template::new(Method::GET, "/"),
            vec![],
            DeclaredType::Unit,
        ))
        .unwrap()
        .build()
        .unwrap();

    client.invoke(&key, vec![]).await.unwrap();

    let sent = transport.requests();
    assert_eq!(sent.len(), 2);
    for request in &sent {
        // The later interceptor wins, on the retry exactly as on the first
        // attempt.
        assert_eq!(request.header("X-Stage"), Some("two"));
    }
}

#[tokio::test]
async fn binary_bodies_round_trip_unmangled() {
    let payload = vec![0u8, 159, 146, 150, 255, 1];
    let transport = ScriptedTransport::new(vec![Step::Respond(StatusCode::OK, "")]);
    let key = MethodKey::new("Blobs", "put", vec![DeclaredType::Bytes]);
    let client = scripted_client(
        transport.clone(),
        RetryPolicy::None,
        MethodSpec::new(
            key.clone(),
            Template::new(Method::POST, "/blobs").encoded_body(),
            vec![Binding::body()],
            DeclaredType::Unit,
        ),
    );

    client
        .invoke(&key, vec![Value::Bytes(payload.clone())])
        .await
        .unwrap();

    let sent = transport.requests();
    assert_eq!(sent[0].body.as_deref(), Some(&payload[..]));
    assert_eq!(sent[0].header("content-length"), Some("6"));
}

#[tokio::test]
async fn templated_text_bodies_substitute_without_encoding() {
    let transport = ScriptedTransport::new(vec![Step::Respond(StatusCode::OK, "")]);
    let key = MethodKey::new(
        "Auth",
        "login",
        vec![DeclaredType::Text, DeclaredType::Text],
    );
    let client = scripted_client(
        transport.clone(),
        RetryPolicy::None,
        MethodSpec::new(
            key.clone(),
            Template::new(Method::POST, "/login")
                .body_text("grant_type=password&user={user}&secret={password}"),
            vec![Binding::param("user"), Binding::param("password")],
            DeclaredType::Unit,
        ),
    );

    client
        .invoke(&key, vec![Value::from("denominator"), Value::from("s3 cret")])
        .await
        .unwrap();

    let sent = transport.requests();
    let body = sent[0].body.as_deref().unwrap();
    // Verbatim substitution: the space in the value is not percent-encoded.
    assert_eq!(
        body,
        &b"grant_type=password&user=denominator&secret=s3 cret"[..]
    );
}

#[tokio::test]
async fn gzip_content_encoding_compresses_and_drops_content_length() {
    let transport = ScriptedTransport::new(vec![Step::Respond(StatusCode::OK, "")]);
    let key = MethodKey::new("Logs", "upload", vec![DeclaredType::Text]);
    let client = scripted_client(
        transport.clone(),
        RetryPolicy::None,
        MethodSpec::new(
            key.clone(),
            Template::new(Method::POST, "/logs")
                .header("Content-Encoding", "gzip")
                .encoded_body(),
            vec![Binding::body()],
            DeclaredType::Unit,
        ),
    );

    let text = "a log line worth compressing, repeated enough to shrink";
    client.invoke(&key, vec![Value::from(text)]).await.unwrap();

    let sent = transport.requests();
    assert_eq!(sent[0].header("content-length"), None);
    let mut decoder = flate2::read::GzDecoder::new(&sent[0].body.as_ref().unwrap()[..]);
    let mut round_trip = String::new();
    decoder.read_to_string(&mut round_trip).unwrap();
    assert_eq!(round_trip, text);
}

#[tokio::test]
async fn decode_failures_identify_the_call() {
    let transport = ScriptedTransport::new(vec![Step::Respond(StatusCode::OK, "not json")]);
    let key = MethodKey::new("Api", "get", vec![]);
    let client = Client::builder()
        .base_url("http://scripted.invalid")
        .unwrap()
        .transport(transport.clone())
        .retry_policy(RetryPolicy::None)
        .decoder(JsonDecoder)
        .register(MethodSpec::new(
            key.clone(),
            Template::new(Method::GET, "/things"),
            vec![],
            DeclaredType::Json,
        ))
        .unwrap()
        .build()
        .unwrap();

    let err = client.invoke(&key, vec![]).await.unwrap_err();

    let message = err.to_string();
    assert!(
        message.contains("GET http://scripted.invalid/things"),
        "{message}"
    );
    assert!(message.contains("Api#get()"), "{message}");
    assert_eq!(err.raw_response(), Some("not json"));
    match err {
        Error::Decode { key, method, url, .. } => {
            assert_eq!(key, "Api#get()");
            assert_eq!(method, Some(Method::GET));
            assert_eq!(url, "http://scripted.invalid/things");
        }
        other => panic!("expected Decode, got {other:?}"),
    }
}

#[tokio::test]
async fn status_errors_preserve_the_raw_response() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/404"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such user"))
        .mount(&mock_server)
        .await;

    let key = MethodKey::new("Users", "find", vec![DeclaredType::Text]);
    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .register(MethodSpec::new(
            key.clone(),
            Template::new(Method::GET, "/users/{id}"),
            vec![Binding::param("id")],
            DeclaredType::Text,
        ))
        .unwrap()
        .build()
        .unwrap();

    let err = client.invoke(&key, vec![Value::from("404")]).await.unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    assert_eq!(err.raw_response(), Some("no such user"));
    match err {
        Error::Status { key, .. } => assert_eq!(key, "Users#find(Text)"),
        other => panic!("expected Status, got {other:?}"),
    }
}

/// Maps 404 to a distinct error instead of the generic status error.
struct NotFoundAsConfig;

impl ErrorDecoder for NotFoundAsConfig {
    fn decode(&self, key: &MethodKey, response: Response) -> Error {
        if response.status == StatusCode::NOT_FOUND {
            Error::Configuration(format!("missing resource for {key}"))
        } else {
            DefaultErrorDecoder.decode(key, response)
        }
    }
}

#[tokio::test]
async fn error_decoder_overrides_apply_only_to_their_method() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
        .mount(&mock_server)
        .await;

    let custom = MethodKey::new("Api", "custom", vec![]);
    let plain = MethodKey::new("Api", "plain", vec![]);
    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .register(MethodSpec::new(
            custom.clone(),
            Template::new(Method::GET, "/custom"),
            vec![],
            DeclaredType::Text,
        ))
        .unwrap()
        .register(MethodSpec::new(
            plain.clone(),
            Template::new(Method::GET, "/plain"),
            vec![],
            DeclaredType::Text,
        ))
        .unwrap()
        .override_method(
            custom.clone(),
            MethodOverrides::new().error_decoder(NotFoundAsConfig),
        )
        .build()
        .unwrap();

    let overridden = client.invoke(&custom, vec![]).await.unwrap_err();
    assert!(matches!(overridden, Error::Configuration(_)), "{overridden:?}");

    let default = client.invoke(&plain, vec![]).await.unwrap_err();
    assert!(matches!(default, Error::Status { .. }), "{default:?}");
}

#[tokio::test]
async fn retry_after_suggestion_drives_the_retry_delay() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(
            ResponseTemplate::new(503)
                .insert_header("Retry-After", "0")
                .set_body_string("busy"),
        )
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("calm"))
        .mount(&mock_server)
        .await;

    let key = MethodKey::new("Api", "flaky", vec![]);
    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .retry_policy(fast_retry(2))
        .register(MethodSpec::new(
            key.clone(),
            Template::new(Method::GET, "/flaky"),
            vec![],
            DeclaredType::Text,
        ))
        .unwrap()
        .build()
        .unwrap();

    let reply = client.invoke(&key, vec![]).await.unwrap();

    assert_eq!(reply.text(), Some("calm"));
    assert_eq!(reply.attempts, 2);
}

#[tokio::test]
async fn json_bodies_and_replies_over_the_wire() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": 7,
                "name": "Alice",
            })),
        )
        .mount(&mock_server)
        .await;

    let key = MethodKey::new("Users", "create", vec![DeclaredType::Json]);
    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .encoder(JsonEncoder)
        .decoder(JsonDecoder)
        .register(MethodSpec::new(
            key.clone(),
            Template::new(Method::POST, "/users").encoded_body(),
            vec![Binding::body()],
            DeclaredType::Json,
        ))
        .unwrap()
        .build()
        .unwrap();

    let body = Value::json(&serde_json::json!({ "name": "Alice" })).unwrap();
    let reply = client.invoke(&key, vec![body]).await.unwrap();

    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(
        reply.value.as_json().and_then(|j| j.get("id")),
        Some(&serde_json::json!(7))
    );
}

#[tokio::test]
async fn unregistered_keys_fail_before_any_request() {
    let transport = ScriptedTransport::new(vec![]);
    let registered = MethodKey::new("Api", "get", vec![]);
    let client = scripted_client(
        transport.clone(),
        RetryPolicy::None,
        MethodSpec::new(
            registered,
            Template::new(Method::GET, "/"),
            vec![],
            DeclaredType::Unit,
        ),
    );

    let unknown = MethodKey::new("Api", "missing", vec![]);
    let err = client.invoke(&unknown, vec![]).await.unwrap_err();

    assert!(matches!(err, Error::Configuration(_)));
    assert!(err.to_string().contains("Api#missing()"), "{err}");
    assert_eq!(transport.calls(), 0);
}
