//! Method specifications: keys, parameter bindings, and erased values.
//!
//! An API is described to the client as a set of [`MethodSpec`]s, each keyed
//! by a [`MethodKey`]. The spec carries the request [`Template`](crate::Template),
//! one [`Binding`] per formal argument position, and the *declared* parameter
//! and return types. Argument values cross the registry boundary as erased
//! [`Value`]s; the declared [`DeclaredType`] travels alongside them so codecs
//! see the signature's type, never the runtime shape of a particular value.

use crate::template::Template;
use crate::{Error, Result};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Stable identifier for an API method: declaring interface name, method
/// name, and parameter type list.
///
/// Two methods with identical erased signatures on different interfaces hash
/// and compare as distinct keys, so per-method configuration never bleeds
/// across interfaces.
///
/// # Examples
///
/// ```
/// use beckon::{DeclaredType, MethodKey};
///
/// let key = MethodKey::new("Accounts", "find", vec![DeclaredType::Text]);
/// assert_eq!(key.to_string(), "Accounts#find(Text)");
///
/// let nullary = MethodKey::new("Accounts", "list", vec![]);
/// assert_eq!(nullary.to_string(), "Accounts#list()");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    interface: String,
    method: String,
    params: Vec<DeclaredType>,
}

impl MethodKey {
    /// Creates a key from an interface name, method name, and declared
    /// parameter types.
    pub fn new(
        interface: impl Into<String>,
        method: impl Into<String>,
        params: Vec<DeclaredType>,
    ) -> Self {
        Self {
            interface: interface.into(),
            method: method.into(),
            params,
        }
    }

    /// The declaring interface name.
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// The method name.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The declared parameter types, in positional order.
    pub fn params(&self) -> &[DeclaredType] {
        &self.params
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}(", self.interface, self.method)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", p)?;
        }
        f.write_str(")")
    }
}

/// The static declared type of a parameter or return value.
///
/// This is what the signature says, not what a particular value happens to
/// be at runtime. Encoders and decoders receive it verbatim: binding a
/// concrete list value to a parameter declared `TextList` reports `TextList`
/// to the encoder, preserving the generic shape a structured codec needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclaredType {
    /// No value. A declared `Unit` return skips body decoding entirely.
    Unit,
    /// A UTF-8 string.
    Text,
    /// Raw bytes. Codecs must pass these through with no charset transform.
    Bytes,
    /// A list of strings.
    TextList,
    /// An arbitrary JSON document.
    Json,
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeclaredType::Unit => "Unit",
            DeclaredType::Text => "Text",
            DeclaredType::Bytes => "Bytes",
            DeclaredType::TextList => "TextList",
            DeclaredType::Json => "Json",
        };
        f.write_str(name)
    }
}

/// An erased argument or return value.
///
/// Invocations go through a registry rather than a generic call surface, so
/// values are carried in this small closed enum. [`Value::json`] bridges any
/// `Serialize` type in.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// No value.
    Unit,
    /// A UTF-8 string.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// A list of values, e.g. a repeated query parameter.
    List(Vec<Value>),
    /// A JSON document.
    Json(serde_json::Value),
}

impl Value {
    /// Builds a `Value::Json` from any serializable type.
    ///
    /// # Examples
    ///
    /// ```
    /// use beckon::Value;
    ///
    /// let v = Value::json(&vec!["a", "b"]).unwrap();
    /// assert_eq!(v, Value::Json(serde_json::json!(["a", "b"])));
    /// ```
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self> {
        let json = serde_json::to_value(value)
            .map_err(|e| Error::Configuration(format!("value is not serializable: {e}")))?;
        Ok(Value::Json(json))
    }

    /// Returns the inner string for `Text` values.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the inner bytes for `Bytes` values.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the inner JSON document for `Json` values.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(j) => Some(j),
            _ => None,
        }
    }

    /// The natural string form used for placeholder substitution when no
    /// custom expander is supplied.
    ///
    /// Binary and nested-list values have no natural text form; binding one
    /// to a named slot is a configuration mistake.
    pub(crate) fn natural_string(&self) -> Result<String> {
        match self {
            Value::Text(s) => Ok(s.clone()),
            Value::Json(serde_json::Value::String(s)) => Ok(s.clone()),
            Value::Json(j) => Ok(j.to_string()),
            Value::Unit => Err(Error::Configuration(
                "a unit value cannot fill a named slot".to_string(),
            )),
            Value::Bytes(_) => Err(Error::Configuration(
                "a binary value cannot fill a named slot".to_string(),
            )),
            Value::List(_) => Err(Error::Configuration(
                "a nested list cannot fill a named slot".to_string(),
            )),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

/// Converts a typed value to its string form for slot substitution.
///
/// When a binding carries an expander it takes precedence over the value's
/// natural string form for every slot that binding feeds.
///
/// # Examples
///
/// ```
/// use beckon::{Expander, Value};
///
/// struct MillisExpander;
///
/// impl Expander for MillisExpander {
///     fn expand(&self, value: &Value) -> String {
///         match value {
///             Value::Json(j) => j["millis"].to_string(),
///             other => format!("{other:?}"),
///         }
///     }
/// }
/// ```
pub trait Expander: Send + Sync {
    /// Produces the substitution string for one value.
    fn expand(&self, value: &Value) -> String;
}

impl<F> Expander for F
where
    F: Fn(&Value) -> String + Send + Sync,
{
    fn expand(&self, value: &Value) -> String {
        self(value)
    }
}

/// Associates one formal argument position with a named slot or the body.
#[derive(Clone)]
pub enum Binding {
    /// The argument fills the named placeholder in the path, query, or
    /// headers. Several positions may share a name; their values append in
    /// argument order.
    Param {
        /// The placeholder name this argument feeds.
        name: String,
        /// Optional custom string conversion for this argument.
        expander: Option<Arc<dyn Expander>>,
    },
    /// The argument is the request body, handed verbatim to the encoder
    /// together with its declared type.
    Body,
}

impl Binding {
    /// A named binding with the default string conversion.
    pub fn param(name: impl Into<String>) -> Self {
        Binding::Param {
            name: name.into(),
            expander: None,
        }
    }

    /// A named binding with a custom expander.
    pub fn param_with(name: impl Into<String>, expander: Arc<dyn Expander>) -> Self {
        Binding::Param {
            name: name.into(),
            expander: Some(expander),
        }
    }

    /// The body binding.
    pub fn body() -> Self {
        Binding::Body
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Param { name, expander } => f
                .debug_struct("Param")
                .field("name", name)
                .field("expander", &expander.is_some())
                .finish(),
            Binding::Body => f.write_str("Body"),
        }
    }
}

/// A registered API method: key, template, and parameter bindings.
#[derive(Debug, Clone)]
pub struct MethodSpec {
    /// The method's identity and configuration-lookup key.
    pub key: MethodKey,
    /// The request skeleton with named placeholders.
    pub template: Template,
    /// One binding per formal argument position.
    pub bindings: Vec<Binding>,
    /// The declared return type.
    pub return_type: DeclaredType,
}

impl MethodSpec {
    /// Creates a method spec. Call [`MethodSpec::validate`] (done during
    /// registration) before invoking it.
    pub fn new(
        key: MethodKey,
        template: Template,
        bindings: Vec<Binding>,
        return_type: DeclaredType,
    ) -> Self {
        Self {
            key,
            template,
            bindings,
            return_type,
        }
    }

    /// Position and declared type of the body argument, if any.
    pub fn body_binding(&self) -> Option<(usize, DeclaredType)> {
        self.bindings.iter().enumerate().find_map(|(i, b)| {
            matches!(b, Binding::Body).then(|| (i, self.key.params[i]))
        })
    }

    /// Checks the spec for internal consistency.
    ///
    /// Bindings must match the key's arity, at most one argument may be the
    /// body, the template must expect an encoded body exactly when a body
    /// binding exists, every named binding must have a placeholder to fill,
    /// and every placeholder must have a binding. Failing any of these is a
    /// configuration error at registration time, not request time.
    pub fn validate(&self) -> Result<()> {
        if self.bindings.len() != self.key.params().len() {
            return Err(Error::Configuration(format!(
                "{}: {} bindings for {} declared parameters",
                self.key,
                self.bindings.len(),
                self.key.params().len()
            )));
        }

        let body_count = self
            .bindings
            .iter()
            .filter(|b| matches!(b, Binding::Body))
            .count();
        if body_count > 1 {
            return Err(Error::Configuration(format!(
                "{}: more than one argument bound to the body",
                self.key
            )));
        }
        if body_count == 1 && !self.template.expects_encoded_body() {
            return Err(Error::Configuration(format!(
                "{}: a body argument is bound but the template declares its own body",
                self.key
            )));
        }
        if body_count == 0 && self.template.expects_encoded_body() {
            return Err(Error::Configuration(format!(
                "{}: the template expects an encoded body but no argument is bound to it",
                self.key
            )));
        }

        let placeholders = self.template.placeholders();
        let mut bound: HashSet<&str> = HashSet::new();
        for binding in &self.bindings {
            if let Binding::Param { name, .. } = binding {
                if !placeholders.contains(name.as_str()) {
                    return Err(Error::Configuration(format!(
                        "{}: binding \"{name}\" has no matching placeholder",
                        self.key
                    )));
                }
                bound.insert(name);
            }
        }
        for placeholder in &placeholders {
            if !bound.contains(placeholder.as_str()) {
                return Err(Error::Configuration(format!(
                    "{}: placeholder \"{placeholder}\" has no binding",
                    self.key
                )));
            }
        }
        Ok(())
    }
}
