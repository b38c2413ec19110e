//! The remotely-callable object surface.
//!
//! The original implementation discovers callable methods through runtime
//! reflection over a class decorator (`@Referenceable`) and a per-method
//! marker (`Method`), then memoizes the bound-method lookup per instance.
//! Rust has no runtime reflection and no use for that memoization: a method
//! table built once per type at compile time is already as cheap as it can
//! get, and `&self`/`Arc<Self>` receivers can never be populated from a JSON
//! key, so the "receiver must not be bindable" rule the original enforces
//! defensively simply cannot be violated here.
//!
//! Implementors hand-write [`Referenceable::dispatch`], matching the
//! session's wire grammar directly: `method` is itself the `[Ident, Struct]`
//! variant, so dispatch is exactly one [`LazyParser::apply_variant_struct`]
//! call keyed by method name, each arm extracting its parameters with
//! [`LazyParser::apply_struct`] and returning a boxed future for the actual
//! (possibly asynchronous) work.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

/// A boxed, type-erased future for one method call's result.
pub type MethodFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send + 'a>>;

/// An object reachable as a call's `target`.
///
/// Only the session's root object is resolvable in this revision; a call
/// naming any other target is rejected before it reaches `dispatch`.
pub trait Referenceable: Send + Sync {
    /// Dispatch one `[methodName, paramsStruct]` variant against this
    /// object's exposed methods.
    fn dispatch<'a>(&'a self, method: crate::proto::LazyParser) -> MethodFuture<'a>;
}
