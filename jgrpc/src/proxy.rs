use std::time::Duration;

use serde_json::Value;

use crate::{
    balance::LoadBalancer,
    client::{ReplyHandle, RpcClient},
    error::{Error, ErrorKind, Result},
    message::{RpcRequest, RpcResponse},
    registry::ServiceDiscovery,
};

/// The stub layer: discovery plus balancing plus the call engine,
/// behind a single `call_remote` entry point. Typed per-interface
/// wrappers are thin shims over it — build the argument values and
/// type descriptors, then dispatch sync or async depending on the
/// wrapper method's declared return type.
pub struct RpcProxy {
    discovery: ServiceDiscovery,
    balancer: Box<dyn LoadBalancer>,
    client: RpcClient,
}

/// An async call in flight. Returned as soon as the request frame is
/// written; `wait` resolves to the unwrapped result value.
pub struct CallHandle {
    reply: ReplyHandle,
    timeout: Duration,
}

impl CallHandle {
    /// # Errors
    ///
    /// `Timeout`, `ConnectionLost`, or `InvocationFailed` carrying the
    /// server's failure message.
    pub async fn wait(self) -> Result<Value> {
        let response = self.reply.wait(self.timeout).await?;
        unwrap_response(response)
    }
}

fn unwrap_response(response: RpcResponse) -> Result<Value> {
    if response.success {
        Ok(response.data)
    } else {
        Err(Error::new(
            ErrorKind::InvocationFailed,
            response.error_message,
        ))
    }
}

impl RpcProxy {
    #[must_use]
    pub fn new(
        discovery: ServiceDiscovery,
        balancer: Box<dyn LoadBalancer>,
        client: RpcClient,
    ) -> Self {
        Self {
            discovery,
            balancer,
            client,
        }
    }

    /// Synchronous remote call: invokes `interface.method(args)` on a
    /// provider picked per call and returns the unwrapped result.
    ///
    /// # Errors
    pub async fn call_remote(
        &self,
        interface: &str,
        method: &str,
        args: Vec<Value>,
        param_types: Vec<String>,
    ) -> Result<Value> {
        let handle = self
            .call_remote_async(interface, method, args, param_types)
            .await?;
        handle.wait().await
    }

    /// Asynchronous remote call: returns the handle right after the
    /// request frame is written, leaving the caller free to overlap
    /// further calls.
    ///
    /// # Errors
    ///
    /// `NoProvider` when discovery comes back empty (no network I/O is
    /// attempted), `ConnectFailed` on a failed dial, `SendFailed` on a
    /// failed write.
    pub async fn call_remote_async(
        &self,
        interface: &str,
        method: &str,
        args: Vec<Value>,
        param_types: Vec<String>,
    ) -> Result<CallHandle> {
        // Per-call discovery; the balancer keys rotation by interface.
        let providers = self.discovery.discover_all(interface).await?;
        let endpoint = self
            .balancer
            .select(&providers, interface)
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::NoProvider,
                    format!("no provider for {interface}"),
                )
            })?;
        tracing::debug!("selected provider {endpoint} for {interface}");

        let request = RpcRequest::new(interface, method, args, param_types);
        let reply = self.client.send(&endpoint, request).await?;
        Ok(CallHandle {
            reply,
            timeout: self.client.config().call_timeout,
        })
    }

    /// Closes the call engine and the discovery session.
    pub async fn close(&self) {
        self.client.close().await;
        if let Err(e) = self.discovery.close().await {
            tracing::warn!("discovery session close failed: {e}");
        }
    }
}
