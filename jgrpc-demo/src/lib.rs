use std::sync::Arc;

use jgrpc::{Error, ErrorKind, Result, RpcProxy, RpcService, ServiceExport};
use serde_json::json;

/// Interface name shared by server and clients.
pub const HELLO_INTERFACE: &str = "demo.Hello";

/// Reference implementation of `demo.Hello`.
pub struct HelloImpl;

impl RpcService for HelloImpl {
    fn export(self: Arc<Self>) -> Vec<ServiceExport> {
        vec![ServiceExport::new(HELLO_INTERFACE).method(
            "hello",
            &["String"],
            |args| async move {
                let name = args
                    .first()
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                Ok(json!(format!("Hi, {name}")))
            },
        )]
    }
}

/// Typed client wrapper for `demo.Hello` — the shape a generated stub
/// takes: one shim per method that builds the argument values and type
/// descriptors and picks sync or async dispatch by its return type.
pub struct HelloClient {
    proxy: Arc<RpcProxy>,
}

impl HelloClient {
    #[must_use]
    pub fn new(proxy: Arc<RpcProxy>) -> Self {
        Self { proxy }
    }

    /// # Errors
    pub async fn hello(&self, name: &str) -> Result<String> {
        let value = self
            .proxy
            .call_remote(
                HELLO_INTERFACE,
                "hello",
                vec![json!(name)],
                vec!["String".to_string()],
            )
            .await?;
        serde_json::from_value(value)
            .map_err(|e| Error::new(ErrorKind::DeserializeFailed, e.to_string()))
    }

    /// Fire the call and keep going; the handle resolves to the
    /// greeting when the reply arrives.
    ///
    /// # Errors
    pub async fn hello_async(&self, name: &str) -> Result<jgrpc::CallHandle> {
        self.proxy
            .call_remote_async(
                HELLO_INTERFACE,
                "hello",
                vec![json!(name)],
                vec!["String".to_string()],
            )
            .await
    }
}
