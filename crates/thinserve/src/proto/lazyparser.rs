//! `LazyParser`: a structural, path-tracking validator that binds untrusted
//! JSON to application handlers.
//!
//! A `LazyParser` wraps one JSON node plus the dotted/bracketed/slashed path
//! that led to it. Descent is lazy: producing a child `LazyParser` for an
//! object key, a list element, or a variant body does not validate that
//! child's own substructure — only the operation the caller actually invokes
//! on it does. This keeps error locations precise and means a malformed
//! sibling that nobody asks about never raises an error.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::ProtocolError;
use crate::proto::ident::{self, LIST_TAG};

/// The JSON type categories [`LazyParser::parse_type`] can check for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    Object,
    Number,
    String,
    Bool,
    Null,
    List,
}

/// The payload returned by a successful [`LazyParser::parse_type`] call.
#[derive(Debug, Clone)]
pub enum TypeValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    /// The raw object map; `apply_struct` is responsible for validating that
    /// its keys are identifiers and binding them to named parameters.
    Object(serde_json::Map<String, Value>),
    /// The list's elements, already split from the `@LIST` sentinel and
    /// each wrapped as a child `LazyParser` at path `<path>[i]`.
    List(Vec<LazyParser>),
}

/// A fully materialized, decoded JSON-like structure: the result of
/// recursively resolving `@LIST` lists and `[tag, body]` variants.
///
/// Plain [`serde_json::Value`] can't distinguish a decoded list from a
/// decoded variant (both are two-or-more-element JSON arrays once the
/// sentinel is gone), so `unwrap` targets this richer type instead.
#[derive(Debug, Clone, PartialEq)]
pub enum Unwrapped {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<Unwrapped>),
    Variant(String, Box<Unwrapped>),
    Struct(BTreeMap<String, Unwrapped>),
}

/// The required/optional/open-rest shape `apply_struct` checks an object's
/// keys against.
#[derive(Debug, Clone, Default)]
pub struct StructShape {
    /// Keys that must be present.
    pub required: Vec<&'static str>,
    /// Keys that may be absent (the handler supplies its own default).
    pub optional: Vec<&'static str>,
    /// When true, keys outside `required`/`optional` are passed through
    /// instead of raising `UnexpectedStructKeys`.
    pub open_rest: bool,
}

impl StructShape {
    pub fn required(keys: &[&'static str]) -> Self {
        Self {
            required: keys.to_vec(),
            optional: Vec::new(),
            open_rest: false,
        }
    }
}

/// A single `tag -> struct handler` case for [`LazyParser::apply_variant_struct`].
pub struct VariantCase<'a, T> {
    pub tag: &'a str,
    pub shape: StructShape,
    pub handler: Box<dyn Fn(BTreeMap<String, LazyParser>) -> Result<T, ProtocolError> + 'a>,
}

/// A single `tag -> body handler` case for [`LazyParser::apply_variant`].
pub struct VariantArm<'a, T> {
    pub tag: &'a str,
    pub handler: Box<dyn Fn(LazyParser) -> Result<T, ProtocolError> + 'a>,
}

fn category_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// An immutable, path-tracking wrapper over one JSON node.
#[derive(Debug, Clone)]
pub struct LazyParser {
    value: Value,
    path: String,
}

impl LazyParser {
    /// Wrap a root JSON value with the empty path.
    pub fn new(value: Value) -> Self {
        Self { value, path: String::new() }
    }

    fn with_path(value: Value, path: String) -> Self {
        Self { value, path }
    }

    /// The dotted/bracketed/slashed path from the root to this node.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw JSON value this parser wraps, unvalidated.
    pub fn raw(&self) -> &Value {
        &self.value
    }

    fn child_field(&self, value: Value, key: &str) -> LazyParser {
        LazyParser::with_path(value, format!("{}.{}", self.path, key))
    }

    fn child_index(&self, value: Value, index: usize) -> LazyParser {
        LazyParser::with_path(value, format!("{}[{}]", self.path, index))
    }

    fn child_variant(&self, value: Value, tag: &str) -> LazyParser {
        LazyParser::with_path(value, format!("{}/{}", self.path, tag))
    }

    /// Returns the underlying value if `predicate` holds; otherwise
    /// `FailedPredicate { description }`.
    pub fn parse_predicate(
        &self,
        description: &str,
        predicate: impl Fn(&Value) -> bool,
    ) -> Result<&Value, ProtocolError> {
        if predicate(&self.value) {
            Ok(&self.value)
        } else {
            Err(ProtocolError::FailedPredicate {
                path: self.path.clone(),
                fragment: self.value.clone(),
                description: description.to_owned(),
            })
        }
    }

    /// Validate (and for `List`, decode) this node against a JSON type category.
    pub fn parse_type(&self, tag: TypeTag) -> Result<TypeValue, ProtocolError> {
        match (tag, &self.value) {
            (TypeTag::Null, Value::Null) => Ok(TypeValue::Null),
            (TypeTag::Bool, Value::Bool(b)) => Ok(TypeValue::Bool(*b)),
            (TypeTag::Number, Value::Number(n)) => Ok(TypeValue::Number(n.clone())),
            (TypeTag::String, Value::String(s)) => Ok(TypeValue::String(s.clone())),
            (TypeTag::Object, Value::Object(m)) => Ok(TypeValue::Object(m.clone())),
            (TypeTag::List, _) => self.as_list().map(TypeValue::List),
            (expected, actual) => Err(ProtocolError::UnexpectedType {
                path: self.path.clone(),
                fragment: self.value.clone(),
                actual: category_name(actual).to_owned(),
                expected: tag_name(expected).to_owned(),
            }),
        }
    }

    /// Decode this node as an `@LIST` list, stripping the sentinel.
    ///
    /// Precondition for [`Self::iter`]. An array that is neither `[]` nor
    /// `@LIST`-tagged is `MalformedList`; a non-array value is `UnexpectedType`.
    fn as_list(&self) -> Result<Vec<LazyParser>, ProtocolError> {
        match &self.value {
            Value::Array(items) if items.is_empty() => Ok(Vec::new()),
            Value::Array(items) if items[0] == Value::String(LIST_TAG.to_owned()) => Ok(items[1..]
                .iter()
                .enumerate()
                .map(|(i, v)| self.child_index(v.clone(), i))
                .collect()),
            Value::Array(_) => Err(ProtocolError::MalformedList {
                path: self.path.clone(),
                fragment: self.value.clone(),
            }),
            other => Err(ProtocolError::UnexpectedType {
                path: self.path.clone(),
                fragment: self.value.clone(),
                actual: category_name(other).to_owned(),
                expected: "list".to_owned(),
            }),
        }
    }

    /// Precondition: `parse_type(List)`. A lazy, non-restartable sequence of
    /// child parsers at paths `<path>[i]`.
    pub fn iter(&self) -> Result<std::vec::IntoIter<LazyParser>, ProtocolError> {
        Ok(self.as_list()?.into_iter())
    }

    /// Decode this node as a `[tag, body]` variant. Any array that is
    /// list-shaped (`[]` or `@LIST`-tagged) or not exactly two elements is
    /// `MalformedVariant`; the tag must be a valid identifier.
    fn as_variant(&self) -> Result<(String, LazyParser), ProtocolError> {
        match &self.value {
            Value::Array(items) => {
                let list_shaped = items.is_empty() || items[0] == Value::String(LIST_TAG.to_owned());
                if list_shaped || items.len() != 2 {
                    return Err(ProtocolError::MalformedVariant {
                        path: self.path.clone(),
                        fragment: self.value.clone(),
                    });
                }
                let tag = items[0].as_str().ok_or_else(|| ProtocolError::MalformedVariant {
                    path: self.path.clone(),
                    fragment: self.value.clone(),
                })?;
                ident::verify_identifier(tag, &self.path, &self.value)?;
                Ok((tag.to_owned(), self.child_variant(items[1].clone(), tag)))
            }
            _ => Err(ProtocolError::MalformedVariant {
                path: self.path.clone(),
                fragment: self.value.clone(),
            }),
        }
    }

    /// Require this node to be an object, verify every key is a valid
    /// identifier, check the key set against `shape`, then invoke `f` with
    /// the matched child parsers.
    pub fn apply_struct<T>(
        &self,
        shape: &StructShape,
        f: impl FnOnce(BTreeMap<String, LazyParser>) -> Result<T, ProtocolError>,
    ) -> Result<T, ProtocolError> {
        let TypeValue::Object(map) = self.parse_type(TypeTag::Object)? else {
            unreachable!("parse_type(Object) always yields TypeValue::Object");
        };

        let mut children = BTreeMap::new();
        for (key, value) in map {
            ident::verify_identifier(&key, &self.path, &self.value)?;
            let child = self.child_field(value, &key);
            children.insert(key, child);
        }

        let present: std::collections::BTreeSet<&str> = children.keys().map(String::as_str).collect();
        let required: std::collections::BTreeSet<&str> = shape.required.iter().copied().collect();
        let optional: std::collections::BTreeSet<&str> = shape.optional.iter().copied().collect();

        let missing: Vec<String> = required.difference(&present).map(|s| s.to_string()).collect();
        if !missing.is_empty() {
            let mut missing = missing;
            missing.sort();
            return Err(ProtocolError::MissingStructKeys {
                path: self.path.clone(),
                fragment: self.value.clone(),
                keys: missing,
            });
        }

        if !shape.open_rest {
            let allowed: std::collections::BTreeSet<&str> = required.union(&optional).copied().collect();
            let mut unknown: Vec<String> = present.difference(&allowed).map(|s| s.to_string()).collect();
            if !unknown.is_empty() {
                unknown.sort();
                return Err(ProtocolError::UnexpectedStructKeys {
                    path: self.path.clone(),
                    fragment: self.value.clone(),
                    keys: unknown,
                });
            }
        }

        f(children)
    }

    /// Decode a `[tag, body]` variant and dispatch to the matching arm in
    /// `arms`, passing the body's `LazyParser`. `UnknownVariantTag` if no
    /// arm matches.
    pub fn apply_variant<T>(&self, arms: &[VariantArm<'_, T>]) -> Result<T, ProtocolError> {
        let (tag, body) = self.as_variant()?;
        match arms.iter().find(|arm| arm.tag == tag) {
            Some(arm) => (arm.handler)(body),
            None => {
                let mut knowntags: Vec<String> = arms.iter().map(|arm| arm.tag.to_owned()).collect();
                knowntags.sort();
                Err(ProtocolError::UnknownVariantTag {
                    path: self.path.clone(),
                    fragment: self.value.clone(),
                    tag,
                    knowntags,
                })
            }
        }
    }

    /// Sugar for [`Self::apply_variant`] that additionally applies
    /// [`Self::apply_struct`] to the matched arm's body.
    pub fn apply_variant_struct<T>(&self, cases: Vec<VariantCase<'_, T>>) -> Result<T, ProtocolError> {
        let arms: Vec<VariantArm<'_, T>> = cases
            .into_iter()
            .map(|case| {
                let VariantCase { tag, shape, handler } = case;
                VariantArm {
                    tag,
                    handler: Box::new(move |body: LazyParser| body.apply_struct(&shape, |children| handler(children))),
                }
            })
            .collect();
        self.apply_variant(&arms)
    }

    /// Recursively materialize this node, decoding `@LIST` lists and
    /// variants along the way. Fails identically to `parse_type`/`apply_variant`
    /// on any malformed substructure encountered during descent.
    pub fn unwrap(&self) -> Result<Unwrapped, ProtocolError> {
        match &self.value {
            Value::Null => Ok(Unwrapped::Null),
            Value::Bool(b) => Ok(Unwrapped::Bool(*b)),
            Value::Number(n) => Ok(Unwrapped::Number(n.clone())),
            Value::String(s) => Ok(Unwrapped::String(s.clone())),
            Value::Object(map) => {
                let mut out = BTreeMap::new();
                for (key, value) in map {
                    ident::verify_identifier(key, &self.path, &self.value)?;
                    out.insert(key.clone(), self.child_field(value.clone(), key).unwrap()?);
                }
                Ok(Unwrapped::Struct(out))
            }
            Value::Array(items) if items.is_empty() || items[0] == Value::String(LIST_TAG.to_owned()) => {
                let children = self.as_list()?;
                let mut out = Vec::with_capacity(children.len());
                for child in children {
                    out.push(child.unwrap()?);
                }
                Ok(Unwrapped::List(out))
            }
            Value::Array(_) => {
                let (tag, body) = self.as_variant()?;
                Ok(Unwrapped::Variant(tag, Box::new(body.unwrap()?)))
            }
        }
    }
}

fn tag_name(tag: TypeTag) -> &'static str {
    match tag {
        TypeTag::Object => "object",
        TypeTag::Number => "number",
        TypeTag::String => "string",
        TypeTag::Bool => "bool",
        TypeTag::Null => "null",
        TypeTag::List => "list",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_type_succeeds_for_matching_category() {
        let lp = LazyParser::new(json!("hello"));
        assert!(matches!(lp.parse_type(TypeTag::String), Ok(TypeValue::String(s)) if s == "hello"));
    }

    #[test]
    fn parse_type_fails_for_mismatched_category() {
        let lp = LazyParser::new(json!("hello"));
        let err = lp.parse_type(TypeTag::Number).unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedType { actual, expected, .. } if actual == "string" && expected == "number"));
    }

    #[test]
    fn empty_array_is_the_empty_list() {
        let lp = LazyParser::new(json!([]));
        match lp.parse_type(TypeTag::List).unwrap() {
            TypeValue::List(items) => assert!(items.is_empty()),
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn list_tag_strips_sentinel_and_tracks_index_paths() {
        let lp = LazyParser::new(json!(["@LIST", "a", "b"]));
        match lp.parse_type(TypeTag::List).unwrap() {
            TypeValue::List(items) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0].path(), "[0]");
                assert_eq!(items[1].path(), "[1]");
                assert_eq!(items[0].raw(), &json!("a"));
            }
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn two_element_non_list_array_is_a_variant() {
        let lp = LazyParser::new(json!(["greet", "world"]));
        let (tag, body) = lp.as_variant().unwrap();
        assert_eq!(tag, "greet");
        assert_eq!(body.path(), "/greet");
        assert_eq!(body.raw(), &json!("world"));
    }

    #[test]
    fn at_list_literal_is_never_parsed_as_a_variant_tag() {
        // ["@LIST", "@LIST"] is the one-element list ["@LIST"], not a variant
        // tagged "@LIST" -- the sentinel always wins.
        let lp = LazyParser::new(json!(["@LIST", "@LIST"]));
        match lp.parse_type(TypeTag::List).unwrap() {
            TypeValue::List(items) => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].raw(), &json!("@LIST"));
            }
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn single_element_array_is_malformed_variant() {
        let lp = LazyParser::new(json!(["onlyone"]));
        assert!(matches!(lp.as_variant(), Err(ProtocolError::MalformedVariant { .. })));
    }

    #[test]
    fn three_element_non_list_array_is_malformed_variant() {
        let lp = LazyParser::new(json!(["a", "b", "c"]));
        assert!(matches!(lp.as_variant(), Err(ProtocolError::MalformedVariant { .. })));
    }

    #[test]
    fn invalid_variant_tag_is_rejected() {
        let lp = LazyParser::new(json!(["2bad", "body"]));
        assert!(matches!(lp.as_variant(), Err(ProtocolError::InvalidIdentifier { .. })));
    }

    #[test]
    fn apply_struct_binds_named_children_at_dotted_paths() {
        let lp = LazyParser::new(json!({"fruit": "apple", "count": 3}));
        let shape = StructShape::required(&["fruit", "count"]);
        let result = lp.apply_struct(&shape, |children| {
            assert_eq!(children["fruit"].path(), ".fruit");
            assert_eq!(children["count"].path(), ".count");
            Ok(42)
        });
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn apply_struct_reports_missing_keys() {
        let lp = LazyParser::new(json!({"fruit": "apple"}));
        let shape = StructShape::required(&["fruit", "count"]);
        let err = lp.apply_struct(&shape, |_| Ok(())).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingStructKeys { keys, .. } if keys == vec!["count".to_string()]));
    }

    #[test]
    fn apply_struct_reports_unexpected_keys() {
        let lp = LazyParser::new(json!({"fruit": "apple", "s": 1}));
        let shape = StructShape::required(&["fruit"]);
        let err = lp.apply_struct(&shape, |_| Ok(())).unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedStructKeys { keys, .. } if keys == vec!["s".to_string()]));
    }

    #[test]
    fn apply_struct_open_rest_allows_extra_keys() {
        let lp = LazyParser::new(json!({"fruit": "apple", "extra": true}));
        let shape = StructShape {
            required: vec!["fruit"],
            optional: vec![],
            open_rest: true,
        };
        let result = lp.apply_struct(&shape, |children| Ok(children.len()));
        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn apply_struct_rejects_non_identifier_keys() {
        let lp = LazyParser::new(json!({"2bad": 1}));
        let shape = StructShape::required(&[]);
        let err = lp.apply_struct(&shape, |_| Ok(())).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidIdentifier { .. }));
    }

    #[test]
    fn apply_variant_dispatches_to_matching_arm() {
        let lp = LazyParser::new(json!(["data", 42]));
        let arms = vec![
            VariantArm {
                tag: "data",
                handler: Box::new(|body: LazyParser| Ok(format!("data:{}", body.raw()))),
            },
            VariantArm {
                tag: "error",
                handler: Box::new(|_: LazyParser| Ok("error".to_string())),
            },
        ];
        assert_eq!(lp.apply_variant(&arms).unwrap(), "data:42");
    }

    #[test]
    fn apply_variant_unknown_tag_reports_known_tags() {
        let lp = LazyParser::new(json!(["bogus", {}]));
        let arms: Vec<VariantArm<'_, ()>> = vec![
            VariantArm { tag: "data", handler: Box::new(|_| Ok(())) },
            VariantArm { tag: "error", handler: Box::new(|_| Ok(())) },
        ];
        let err = lp.apply_variant(&arms).unwrap_err();
        assert!(
            matches!(err, ProtocolError::UnknownVariantTag { tag, knowntags, .. } if tag == "bogus" && knowntags == vec!["data".to_string(), "error".to_string()])
        );
    }

    #[test]
    fn apply_variant_struct_combines_both_operations() {
        let lp = LazyParser::new(json!(["eat_a_fruit", {"fruit": "Fruit #3"}]));
        let cases = vec![VariantCase {
            tag: "eat_a_fruit",
            shape: StructShape::required(&["fruit"]),
            handler: Box::new(|children: BTreeMap<String, LazyParser>| {
                let TypeValue::String(fruit) = children["fruit"].parse_type(TypeTag::String)? else {
                    unreachable!()
                };
                Ok(format!("Yum {fruit}!"))
            }),
        }];
        assert_eq!(lp.apply_variant_struct(cases).unwrap(), "Yum Fruit #3!");
    }

    #[test]
    fn unwrap_round_trips_well_formed_values() {
        let original = json!({"a": ["@LIST", 1, 2], "b": ["tag", "x"]});
        let lp = LazyParser::new(original);
        let unwrapped = lp.unwrap().unwrap();
        match unwrapped {
            Unwrapped::Struct(map) => {
                assert!(matches!(&map["a"], Unwrapped::List(items) if items.len() == 2));
                assert!(matches!(&map["b"], Unwrapped::Variant(tag, _) if tag == "tag"));
            }
            _ => panic!("expected struct"),
        }
    }

    #[test]
    fn unwrap_fails_on_malformed_substructure() {
        let lp = LazyParser::new(json!({"bad": ["a", "b", "c"]}));
        assert!(matches!(lp.unwrap(), Err(ProtocolError::MalformedVariant { .. })));
    }
}
