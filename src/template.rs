//! Request templates with named placeholders, and their resolution.
//!
//! A [`Template`] is the immutable skeleton of an HTTP request: verb, path,
//! query, headers, and body, any of which may contain `{name}` placeholders.
//! Resolution substitutes a name→values mapping into the skeleton and yields
//! a concrete [`ResolvedRequest`] ready for the transport, or fails loudly on
//! the first placeholder it cannot fill. Nothing is ever dropped silently.
//!
//! Slot kinds differ in how they treat multiple values for one name:
//! a path slot takes exactly one, while query and header slots expand a
//! multi-valued binding into repeated entries in insertion order. Query
//! values are URL-encoded on the way out; header and body substitutions are
//! inserted verbatim.

use crate::transport::ResolvedRequest;
use crate::{Error, Result};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use std::collections::{HashMap, HashSet};
use url::Url;

/// Placeholder name → expanded string values, in argument order.
pub type ParamValues = HashMap<String, Vec<String>>;

/// One piece of a templated string: literal text or a named placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Chunk {
    Literal(String),
    Placeholder(String),
}

/// Splits `"/users/{id}/posts"` into literal and placeholder chunks.
///
/// An unmatched `{` is kept as literal text.
fn parse_chunks(input: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut rest = input;
    while let Some(open) = rest.find('{') {
        match rest[open..].find('}') {
            Some(close) => {
                if open > 0 {
                    chunks.push(Chunk::Literal(rest[..open].to_string()));
                }
                chunks.push(Chunk::Placeholder(rest[open + 1..open + close].to_string()));
                rest = &rest[open + close + 1..];
            }
            None => break,
        }
    }
    if !rest.is_empty() {
        chunks.push(Chunk::Literal(rest.to_string()));
    }
    chunks
}

/// A query entry: a literal key and a templated value.
///
/// Keys are always literal text. A numeric key like `2` is just the string
/// `"2"`, never an indirect placeholder.
#[derive(Debug, Clone)]
struct QueryEntry {
    key: String,
    value: Vec<Chunk>,
}

#[derive(Debug, Clone)]
struct HeaderEntry {
    name: String,
    value: Vec<Chunk>,
}

/// The template's body slot.
#[derive(Debug, Clone)]
enum BodySlot {
    /// No body.
    Empty,
    /// A fixed byte payload.
    Literal(Bytes),
    /// A text payload with placeholders, substituted at resolution without
    /// URL-encoding.
    Text(Vec<Chunk>),
    /// The body comes from an argument, produced by the encoder per attempt.
    Encoded,
}

/// An immutable description of an HTTP request with named placeholders.
///
/// Templates are built once at registration time and shared read-only by
/// every concurrent invocation of their method.
///
/// # Examples
///
/// ```
/// use beckon::Template;
/// use http::Method;
///
/// let template = Template::new(Method::GET, "/repos/{owner}/{name}")
///     .query("page", "{page}")
///     .header("Accept", "application/json");
/// assert_eq!(template.placeholders().len(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct Template {
    method: Method,
    path: Vec<Chunk>,
    query: Vec<QueryEntry>,
    headers: Vec<HeaderEntry>,
    body: BodySlot,
}

impl Template {
    /// Creates a template for the given verb and path.
    ///
    /// The path may carry an inline query string, as in
    /// `"/search?q={q}&page={page}"`; it is split into query entries.
    pub fn new(method: Method, path: &str) -> Self {
        let (path_part, query_part) = match path.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (path, None),
        };
        let mut template = Self {
            method,
            path: parse_chunks(path_part),
            query: Vec::new(),
            headers: Vec::new(),
            body: BodySlot::Empty,
        };
        if let Some(query) = query_part {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                template = template.query(key, value);
            }
        }
        template
    }

    /// Appends a query entry. The key is literal; the value may contain
    /// placeholders. Entries keep their insertion order.
    pub fn query(mut self, key: impl Into<String>, value: &str) -> Self {
        self.query.push(QueryEntry {
            key: key.into(),
            value: parse_chunks(value),
        });
        self
    }

    /// Appends a header entry. The value may contain placeholders and is
    /// never URL-encoded.
    pub fn header(mut self, name: impl Into<String>, value: &str) -> Self {
        self.headers.push(HeaderEntry {
            name: name.into(),
            value: parse_chunks(value),
        });
        self
    }

    /// Sets a templated text body, substituted verbatim at resolution.
    pub fn body_text(mut self, body: &str) -> Self {
        self.body = BodySlot::Text(parse_chunks(body));
        self
    }

    /// Sets a fixed byte body.
    pub fn body_literal(mut self, body: impl Into<Bytes>) -> Self {
        self.body = BodySlot::Literal(body.into());
        self
    }

    /// Marks the body as encoder-produced from a body-bound argument.
    pub fn encoded_body(mut self) -> Self {
        self.body = BodySlot::Encoded;
        self
    }

    /// The HTTP verb.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// True when the body comes from an encoder-fed argument.
    pub(crate) fn expects_encoded_body(&self) -> bool {
        matches!(self.body, BodySlot::Encoded)
    }

    /// All placeholder names appearing anywhere in the template.
    pub fn placeholders(&self) -> HashSet<String> {
        let mut names = HashSet::new();
        let mut collect = |chunks: &[Chunk]| {
            for chunk in chunks {
                if let Chunk::Placeholder(name) = chunk {
                    names.insert(name.clone());
                }
            }
        };
        collect(&self.path);
        for entry in &self.query {
            collect(&entry.value);
        }
        for entry in &self.headers {
            collect(&entry.value);
        }
        if let BodySlot::Text(chunks) = &self.body {
            collect(chunks);
        }
        names
    }

    /// Resolves the template against a base URL and a complete name→values
    /// mapping, producing a concrete request.
    ///
    /// Resolution is deterministic and idempotent: the same inputs produce a
    /// byte-identical request every time. Any placeholder without a mapping,
    /// and any path placeholder bound to anything but exactly one value, is
    /// a configuration error.
    pub fn resolve(&self, base: &Url, values: &ParamValues) -> Result<ResolvedRequest> {
        let mut url = base.clone();
        url.set_path(&self.resolve_path(values)?);
        url.set_query(None);
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for entry in &self.query {
                for value in expand_chunks(&entry.value, values, "query")? {
                    pairs.append_pair(&entry.key, &value);
                }
            }
            drop(pairs);
            // An all-empty expansion would otherwise leave a dangling "?".
            if url.query() == Some("") {
                url.set_query(None);
            }
        }

        let mut headers = HeaderMap::new();
        for entry in &self.headers {
            let name = HeaderName::try_from(entry.name.as_str()).map_err(|e| {
                Error::Configuration(format!("invalid header name \"{}\": {e}", entry.name))
            })?;
            for value in expand_chunks(&entry.value, values, "header")? {
                let value = HeaderValue::try_from(value.as_str()).map_err(|e| {
                    Error::Configuration(format!("invalid value for header {name}: {e}"))
                })?;
                headers.append(name.clone(), value);
            }
        }

        let body = match &self.body {
            BodySlot::Empty | BodySlot::Encoded => None,
            BodySlot::Literal(bytes) => Some(bytes.clone()),
            BodySlot::Text(chunks) => {
                let text = substitute_single(chunks, values, "body")?;
                Some(Bytes::from(text))
            }
        };

        Ok(ResolvedRequest {
            method: self.method.clone(),
            url,
            headers,
            body,
        })
    }

    fn resolve_path(&self, values: &ParamValues) -> Result<String> {
        let mut path = String::new();
        for chunk in &self.path {
            match chunk {
                Chunk::Literal(text) => path.push_str(text),
                Chunk::Placeholder(name) => {
                    let bound = lookup(values, name)?;
                    if bound.len() != 1 {
                        return Err(Error::Configuration(format!(
                            "path placeholder \"{name}\" must bind exactly one value, got {}",
                            bound.len()
                        )));
                    }
                    path.push_str(&bound[0]);
                }
            }
        }
        Ok(path)
    }
}

fn lookup<'a>(values: &'a ParamValues, name: &str) -> Result<&'a Vec<String>> {
    values.get(name).ok_or_else(|| {
        Error::Configuration(format!("unresolved placeholder \"{name}\""))
    })
}

/// Expands one templated string into its value list.
///
/// A lone placeholder chunk yields every bound value, so a multi-valued
/// binding turns into repeated query pairs or header values. Mixed
/// literal/placeholder templates require each embedded placeholder to be
/// single-valued.
fn expand_chunks(chunks: &[Chunk], values: &ParamValues, slot: &str) -> Result<Vec<String>> {
    if let [Chunk::Placeholder(name)] = chunks {
        return Ok(lookup(values, name)?.clone());
    }
    Ok(vec![substitute_single(chunks, values, slot)?])
}

fn substitute_single(chunks: &[Chunk], values: &ParamValues, slot: &str) -> Result<String> {
    let mut out = String::new();
    for chunk in chunks {
        match chunk {
            Chunk::Literal(text) => out.push_str(text),
            Chunk::Placeholder(name) => {
                let bound = lookup(values, name)?;
                if bound.len() != 1 {
                    return Err(Error::Configuration(format!(
                        "{slot} placeholder \"{name}\" is embedded in literal text and must \
                         bind exactly one value, got {}",
                        bound.len()
                    )));
                }
                out.push_str(&bound[0]);
            }
        }
    }
    Ok(out)
}
