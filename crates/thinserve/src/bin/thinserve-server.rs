//! Minimal runnable entry point: serves an empty root object (no exposed
//! methods) so the HTTP surface can be smoke-tested end to end. Real
//! deployments link `thinserve` as a library and supply their own
//! [`thinserve::Referenceable`] root instead of running this binary.

use std::sync::Arc;

use thinserve::{Referenceable, config::ServerConfig, logging::init_tracing, proto::LazyParser, referenceable::MethodFuture};

struct EmptyRoot;

impl Referenceable for EmptyRoot {
    fn dispatch<'a>(&'a self, method: LazyParser) -> MethodFuture<'a> {
        Box::pin(async move { Ok(method.apply_variant::<serde_json::Value>(&[])?) })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = ServerConfig::from_env()?;
    thinserve::serve(config, Arc::new(|| Arc::new(EmptyRoot) as Arc<dyn Referenceable>)).await
}
