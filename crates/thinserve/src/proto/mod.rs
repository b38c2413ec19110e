//! Wire protocol: structural parsing, the call/reply envelope, session
//! dispatch, and the long-poll delivery shuttle.

pub mod ident;
pub mod lazyparser;
pub mod session;
pub mod shuttle;

pub use lazyparser::{LazyParser, StructShape, TypeTag, TypeValue, Unwrapped, VariantArm, VariantCase};
