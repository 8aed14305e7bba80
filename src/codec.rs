//! Value↔body codecs and non-2xx classification.
//!
//! Three pluggable capabilities live here. An [`Encoder`] turns a body-bound
//! argument into request bytes; a [`Decoder`] turns a 2xx response into the
//! declared return value; an [`ErrorDecoder`] turns a non-2xx response into
//! a terminal error or a retry-signal. Each has a default implementation and
//! can be overridden process-wide or per method key.
//!
//! Codecs always receive the *declared* type from the method signature, not
//! anything derived from the value at hand, so generic shape information
//! (e.g. list-of-string) survives erasure.

use crate::method::{DeclaredType, MethodKey, Value};
use crate::response::Response;
use crate::retry::RetrySignal;
use crate::transport::ResolvedRequest;
use crate::Error;
use bytes::Bytes;
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use http::{header, HeaderMap, HeaderValue};
use std::io::Write;
use std::time::{Duration, SystemTime};

/// An unsupported or failed body encoding.
///
/// The dispatcher attaches the method key before surfacing it, so encoders
/// only describe what they rejected.
#[derive(thiserror::Error, Debug)]
#[error("{0}")]
pub struct EncodeError(pub String);

/// Writes a body-bound argument into the request.
///
/// Implementations may also set headers, typically `Content-Type`. The
/// `declared` type is the method signature's parameter type; a structured
/// encoder relies on it rather than probing the value.
pub trait Encoder: Send + Sync {
    /// Encodes `value` into the request body.
    fn encode(
        &self,
        value: &Value,
        declared: &DeclaredType,
        request: &mut ResolvedRequest,
    ) -> Result<(), EncodeError>;
}

/// The default encoder: text and bytes only.
///
/// Anything structured fails, deliberately, so callers supplying JSON or
/// list bodies must opt into a structured encoder such as [`JsonEncoder`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEncoder;

impl Encoder for DefaultEncoder {
    fn encode(
        &self,
        value: &Value,
        declared: &DeclaredType,
        request: &mut ResolvedRequest,
    ) -> Result<(), EncodeError> {
        match (declared, value) {
            (DeclaredType::Text, Value::Text(text)) => {
                request.set_body(text.clone().into_bytes());
                Ok(())
            }
            // Binary passthrough: no charset transformation, ever.
            (DeclaredType::Bytes, Value::Bytes(bytes)) => {
                request.set_body(bytes.clone());
                Ok(())
            }
            _ => Err(EncodeError(format!(
                "declared type {declared} is not supported by the default encoder; \
                 supply a structured encoder"
            ))),
        }
    }
}

/// A JSON encoder over `serde_json`.
///
/// Sets `Content-Type: application/json` unless one is already present.
/// A declared `Bytes` parameter still passes through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl JsonEncoder {
    fn to_json(value: &Value) -> Result<serde_json::Value, EncodeError> {
        match value {
            Value::Unit => Ok(serde_json::Value::Null),
            Value::Text(text) => Ok(serde_json::Value::String(text.clone())),
            Value::Json(json) => Ok(json.clone()),
            Value::List(items) => items
                .iter()
                .map(Self::to_json)
                .collect::<Result<Vec<_>, _>>()
                .map(serde_json::Value::Array),
            Value::Bytes(_) => Err(EncodeError(
                "binary values have no JSON form; declare the parameter as Bytes".to_string(),
            )),
        }
    }
}

impl Encoder for JsonEncoder {
    fn encode(
        &self,
        value: &Value,
        declared: &DeclaredType,
        request: &mut ResolvedRequest,
    ) -> Result<(), EncodeError> {
        if let (DeclaredType::Bytes, Value::Bytes(bytes)) = (declared, value) {
            request.set_body(bytes.clone());
            return Ok(());
        }
        let json = Self::to_json(value)?;
        let body = serde_json::to_vec(&json)
            .map_err(|e| EncodeError(format!("failed to serialize JSON body: {e}")))?;
        request.set_body(body);
        request
            .headers
            .entry(header::CONTENT_TYPE)
            .or_insert(HeaderValue::from_static("application/json"));
        Ok(())
    }
}

/// Converts a 2xx response into the declared return value.
///
/// A decoder may return [`Error::Retryable`] instead of a decode error when
/// it recognizes a recoverable application-level condition inside a 2xx
/// body; the dispatcher feeds that signal into the normal retry loop.
pub trait Decoder: Send + Sync {
    /// Decodes the response body as the declared return type.
    fn decode(&self, response: &Response, declared: &DeclaredType) -> crate::Result<Value>;
}

// Call context (key, verb, URL) is attached by the dispatcher.
fn decode_error(response: &Response, message: String) -> Error {
    Error::Decode {
        key: String::new(),
        method: None,
        url: String::new(),
        status: response.status,
        message,
        raw_response: response.text_lossy(),
    }
}

/// The default decoder: unit, text, and bytes only.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDecoder;

impl Decoder for DefaultDecoder {
    fn decode(&self, response: &Response, declared: &DeclaredType) -> crate::Result<Value> {
        match declared {
            // Declared void: the body is irrelevant and stays untouched.
            DeclaredType::Unit => Ok(Value::Unit),
            DeclaredType::Bytes => Ok(Value::Bytes(response.body.to_vec())),
            DeclaredType::Text => response
                .text()
                .map(|s| Value::Text(s.to_string()))
                .ok_or_else(|| {
                    decode_error(response, "response body is not valid UTF-8".to_string())
                }),
            other => Err(decode_error(
                response,
                format!("declared type {other} is not supported by the default decoder"),
            )),
        }
    }
}

/// A JSON decoder over `serde_json`, extending the default decoder with
/// `Json` and `TextList` return types.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl Decoder for JsonDecoder {
    fn decode(&self, response: &Response, declared: &DeclaredType) -> crate::Result<Value> {
        match declared {
            DeclaredType::Json => serde_json::from_slice(&response.body)
                .map(Value::Json)
                .map_err(|e| decode_error(response, e.to_string())),
            DeclaredType::TextList => serde_json::from_slice::<Vec<String>>(&response.body)
                .map(|items| Value::List(items.into_iter().map(Value::Text).collect()))
                .map_err(|e| decode_error(response, e.to_string())),
            other => DefaultDecoder.decode(response, other),
        }
    }
}

/// Classifies a non-2xx response into a terminal error or a retry-signal.
pub trait ErrorDecoder: Send + Sync {
    /// Decodes a failed response for the given method.
    fn decode(&self, key: &MethodKey, response: Response) -> Error;
}

/// The default classifier.
///
/// Any non-2xx becomes [`Error::Status`]; when the response carries a
/// `Retry-After` header the status error is wrapped in a retry-signal with
/// the suggested delay, letting the retry policy take it from there.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorDecoder;

impl ErrorDecoder for DefaultErrorDecoder {
    fn decode(&self, key: &MethodKey, response: Response) -> Error {
        let retry_after = parse_retry_after(&response.headers);
        let status_error = Error::Status {
            key: key.to_string(),
            status: response.status,
            raw_response: response.text_lossy(),
            headers: response.headers,
        };
        match retry_after {
            Some(delay) => Error::Retryable(RetrySignal::with_retry_after(status_error, delay)),
            None => status_error,
        }
    }
}

/// Parses a `Retry-After` header, accepting both delay-seconds and HTTP-date
/// forms.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header = headers.get(header::RETRY_AFTER)?.to_str().ok()?;

    if let Ok(seconds) = header.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    if let Ok(date) = httpdate::parse_http_date(header) {
        if let Ok(until) = date.duration_since(SystemTime::now()) {
            return Some(until);
        }
    }

    None
}

/// Applies any template-declared content codings to the finalized body.
///
/// Runs after the value encoder and before interceptors. `gzip` and
/// `deflate` are supported; other codings pass through untouched. A
/// transform that changes the body size removes `Content-Length` rather
/// than leaving a stale value.
pub(crate) fn apply_content_encoding(request: &mut ResolvedRequest) -> Result<(), EncodeError> {
    let Some(encoding) = request.header("content-encoding").map(str::to_owned) else {
        return Ok(());
    };
    let Some(body) = request.body.as_ref() else {
        return Ok(());
    };

    let mut bytes = body.to_vec();
    let mut transformed = false;
    for coding in encoding.split(',').map(str::trim) {
        match coding.to_ascii_lowercase().as_str() {
            "gzip" => {
                bytes = compress(GzEncoder::new(Vec::new(), Compression::default()), &bytes)?;
                transformed = true;
            }
            "deflate" => {
                bytes = compress(ZlibEncoder::new(Vec::new(), Compression::default()), &bytes)?;
                transformed = true;
            }
            _ => {}
        }
    }

    if transformed {
        request.body = Some(Bytes::from(bytes));
        request.headers.remove(header::CONTENT_LENGTH);
    }
    Ok(())
}

fn compress<W>(mut encoder: W, input: &[u8]) -> Result<Vec<u8>, EncodeError>
where
    W: Write + Finish,
{
    encoder
        .write_all(input)
        .and_then(|_| encoder.finish_vec())
        .map_err(|e| EncodeError(format!("content encoding failed: {e}")))
}

/// Unifies the two flate2 encoders' `finish` signatures.
trait Finish {
    fn finish_vec(self) -> std::io::Result<Vec<u8>>;
}

impl Finish for GzEncoder<Vec<u8>> {
    fn finish_vec(self) -> std::io::Result<Vec<u8>> {
        self.finish()
    }
}

impl Finish for ZlibEncoder<Vec<u8>> {
    fn finish_vec(self) -> std::io::Result<Vec<u8>> {
        self.finish()
    }
}
