//! A thin bidirectional JSON RPC core.
//!
//! A `thinserve` session lets two peers call methods on each other over
//! plain HTTP: the initiator POSTs a call, the callee's reply is collected
//! by a long-polling GET. [`proto::lazyparser::LazyParser`] validates and
//! binds the untrusted JSON wire format; [`proto::session::Session`] tracks
//! in-flight calls and replies; [`proto::shuttle::Shuttle`] is the
//! rendezvous a long-poll GET waits on; [`server`] wires all of it to an
//! axum [`axum::Router`].

pub mod config;
pub mod error;
pub mod logging;
pub mod proto;
pub mod referenceable;
pub mod server;

pub use error::ProtocolError;
pub use proto::session::Session;
pub use referenceable::Referenceable;
pub use server::{RootFactory, build_router, serve};
