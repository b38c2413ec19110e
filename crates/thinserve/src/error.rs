//! Protocol error taxonomy.
//!
//! Every error that can reach an HTTP response or a reply's `["error", ...]`
//! branch is a [`ProtocolError`]. Each variant carries the data needed to
//! fill in its wire template; [`ProtocolError::to_payload`] renders the
//! `{template, params, path?, message?}` shape the wire grammar specifies.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// Named parameters interpolated into an error's template string.
pub type Params = BTreeMap<String, Value>;

/// A structured protocol error: a kind, a template, and (for malformed
/// inbound JSON) the path to the offending node and the node itself.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    #[error("internal error")]
    InternalError,

    #[error("unsupported HTTP method \"{method}\"")]
    UnsupportedHttpMethod { method: String },

    #[error("unexpected HTTP body")]
    UnexpectedHttpBody,

    #[error("malformed JSON")]
    MalformedJson,

    #[error("invalid parameter \"{name}\"")]
    InvalidParameter { name: String },

    #[error("unexpected type {actual}, expecting {expected} at {path}")]
    UnexpectedType {
        path: String,
        fragment: Value,
        actual: String,
        expected: String,
    },

    #[error("failed predicate: {description} at {path}")]
    FailedPredicate {
        path: String,
        fragment: Value,
        description: String,
    },

    #[error("invalid identifier {ident} at {path}")]
    InvalidIdentifier {
        path: String,
        fragment: Value,
        ident: String,
    },

    #[error("malformed list at {path}")]
    MalformedList { path: String, fragment: Value },

    #[error("expected variant [<tag>, <value>] at {path}")]
    MalformedVariant { path: String, fragment: Value },

    #[error("unknown variant tag {tag} at {path}")]
    UnknownVariantTag {
        path: String,
        fragment: Value,
        tag: String,
        knowntags: Vec<String>,
    },

    #[error("unexpected struct keys {keys:?} at {path}")]
    UnexpectedStructKeys {
        path: String,
        fragment: Value,
        keys: Vec<String>,
    },

    #[error("missing struct keys {keys:?} at {path}")]
    MissingStructKeys {
        path: String,
        fragment: Value,
        keys: Vec<String>,
    },
}

/// The wire representation of a [`ProtocolError`]: `{template, params, path?, message?}`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub template: &'static str,
    pub params: Params,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
}

impl ProtocolError {
    /// The fixed template string for this error's kind, with `{name}`-style
    /// placeholders matching [`Self::params`].
    pub fn template(&self) -> &'static str {
        use ProtocolError::*;
        match self {
            InternalError => "internal error",
            UnsupportedHttpMethod { .. } => "unsupported HTTP method \"{method}\"",
            UnexpectedHttpBody => "unexpected HTTP body",
            MalformedJson => "malformed JSON",
            InvalidParameter { .. } => "invalid parameter \"{name}\"",
            UnexpectedType { .. } => "unexpected type {actual}, expecting {expected}",
            FailedPredicate { .. } => "failed predicate: {description}",
            InvalidIdentifier { .. } => "invalid identifier {ident}",
            MalformedList { .. } => "malformed list",
            MalformedVariant { .. } => "expected variant [<tag>, <value>]",
            UnknownVariantTag { .. } => "unknown variant tag {tag}",
            UnexpectedStructKeys { .. } => "unexpected struct keys {keys}",
            MissingStructKeys { .. } => "missing struct keys {keys}",
        }
    }

    /// Named parameters for this error's template.
    pub fn params(&self) -> Params {
        use ProtocolError::*;
        let mut p = Params::new();
        match self {
            InternalError | UnexpectedHttpBody | MalformedJson => {}
            UnsupportedHttpMethod { method } => {
                p.insert("method".into(), Value::String(method.clone()));
            }
            InvalidParameter { name } => {
                p.insert("name".into(), Value::String(name.clone()));
            }
            UnexpectedType { actual, expected, .. } => {
                p.insert("actual".into(), Value::String(actual.clone()));
                p.insert("expected".into(), Value::String(expected.clone()));
            }
            FailedPredicate { description, .. } => {
                p.insert("description".into(), Value::String(description.clone()));
            }
            InvalidIdentifier { ident, .. } => {
                p.insert("ident".into(), Value::String(ident.clone()));
            }
            MalformedList { .. } | MalformedVariant { .. } => {}
            UnknownVariantTag { tag, knowntags, .. } => {
                p.insert("tag".into(), Value::String(tag.clone()));
                p.insert(
                    "knowntags".into(),
                    Value::Array(knowntags.iter().cloned().map(Value::String).collect()),
                );
            }
            UnexpectedStructKeys { keys, .. } | MissingStructKeys { keys, .. } => {
                p.insert(
                    "keys".into(),
                    Value::Array(keys.iter().cloned().map(Value::String).collect()),
                );
            }
        }
        p
    }

    /// The path into the offending JSON, for the malformed-message family.
    pub fn path(&self) -> Option<&str> {
        use ProtocolError::*;
        match self {
            UnexpectedType { path, .. }
            | FailedPredicate { path, .. }
            | InvalidIdentifier { path, .. }
            | MalformedList { path, .. }
            | MalformedVariant { path, .. }
            | UnknownVariantTag { path, .. }
            | UnexpectedStructKeys { path, .. }
            | MissingStructKeys { path, .. } => Some(path.as_str()),
            _ => None,
        }
    }

    /// The raw offending JSON fragment, for the malformed-message family.
    pub fn fragment(&self) -> Option<&Value> {
        use ProtocolError::*;
        match self {
            UnexpectedType { fragment, .. }
            | FailedPredicate { fragment, .. }
            | InvalidIdentifier { fragment, .. }
            | MalformedList { fragment, .. }
            | MalformedVariant { fragment, .. }
            | UnknownVariantTag { fragment, .. }
            | UnexpectedStructKeys { fragment, .. }
            | MissingStructKeys { fragment, .. } => Some(fragment),
            _ => None,
        }
    }

    /// Render this error as the `{template, params, path?, message?}` wire shape.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            template: self.template(),
            params: self.params(),
            path: self.path().map(str::to_owned),
            message: self.fragment().cloned(),
        }
    }

    /// Log and coerce any non-protocol failure into [`ProtocolError::InternalError`].
    ///
    /// Mirrors the Python original's `InternalError.coerce_unexpected_failure`:
    /// a [`ProtocolError`] passes through untouched, anything else is logged
    /// at the call site and replaced.
    pub fn coerce_anyhow(err: anyhow::Error) -> ProtocolError {
        match err.downcast::<ProtocolError>() {
            Ok(protocol_err) => protocol_err,
            Err(other) => {
                tracing::error!(error = %other, "unexpected non-protocol failure, coercing to InternalError");
                ProtocolError::InternalError
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_method_serializes_with_params_only() {
        let err = ProtocolError::UnsupportedHttpMethod { method: "PUT".into() };
        let payload = err.to_payload();
        assert_eq!(payload.template, "unsupported HTTP method \"{method}\"");
        assert_eq!(payload.params.get("method").unwrap(), "PUT");
        assert!(payload.path.is_none());
        assert!(payload.message.is_none());
    }

    #[test]
    fn unexpected_type_carries_path_and_message() {
        let err = ProtocolError::UnexpectedType {
            path: "/call.method/throw_a_fruit.fruit".into(),
            fragment: Value::String("Fruit #5".into()),
            actual: "str".into(),
            expected: "int".into(),
        };
        let payload = err.to_payload();
        assert_eq!(payload.path.as_deref(), Some("/call.method/throw_a_fruit.fruit"));
        assert_eq!(payload.message, Some(Value::String("Fruit #5".into())));
        assert_eq!(payload.params.get("actual").unwrap(), "str");
        assert_eq!(payload.params.get("expected").unwrap(), "int");
    }

    #[test]
    fn coerce_anyhow_passes_through_protocol_errors() {
        let original = ProtocolError::InvalidParameter { name: "id".into() };
        let wrapped = anyhow::Error::from(original.clone());
        let coerced = ProtocolError::coerce_anyhow(wrapped);
        assert!(matches!(coerced, ProtocolError::InvalidParameter { name } if name == "id"));
    }

    #[test]
    fn coerce_anyhow_replaces_other_failures() {
        let wrapped = anyhow::anyhow!("boom");
        let coerced = ProtocolError::coerce_anyhow(wrapped);
        assert!(matches!(coerced, ProtocolError::InternalError));
    }
}
