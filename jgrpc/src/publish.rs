use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;

use crate::{
    balance::Endpoint,
    error::{Error, ErrorKind, Result},
    registry::ServiceRegistry,
    router::{Router, RpcService},
    server::{RpcServer, ServerConfig},
};

#[serde_inline_default]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PublishConfig {
    /// Wait between unpublishing and stopping the engine, letting
    /// in-flight requests finish.
    #[serde_inline_default(Duration::from_secs(5))]
    #[serde(with = "humantime_serde")]
    pub drain_interval: Duration,
}

impl Default for PublishConfig {
    fn default() -> Self {
        serde_json::from_value(serde_json::Value::Object(serde_json::Map::default())).unwrap()
    }
}

/// The server-with-directory facade: a dispatch engine whose services
/// are announced at the directory on start and withdrawn, with a drain
/// interval, on shutdown.
///
/// Publication happens at `start`, once the listening port is known;
/// `publish_service` before that records the implementation and its
/// interfaces. The service map is append-only and frozen at `start`.
pub struct PublishingServer {
    router: Option<Router>,
    server: Option<Arc<RpcServer>>,
    registry: ServiceRegistry,
    bind_addr: SocketAddr,
    endpoint: Option<Endpoint>,
    interfaces: Vec<String>,
    server_config: ServerConfig,
    config: PublishConfig,
}

impl PublishingServer {
    #[must_use]
    pub fn new(
        bind_addr: SocketAddr,
        registry: ServiceRegistry,
        server_config: ServerConfig,
        config: PublishConfig,
    ) -> Self {
        Self {
            router: Some(Router::new()),
            server: None,
            registry,
            bind_addr,
            endpoint: None,
            interfaces: Vec::new(),
            server_config,
            config,
        }
    }

    /// Registers an implementation locally and queues every interface
    /// it satisfies for directory publication.
    ///
    /// # Errors
    ///
    /// Fails after `start`, or when the implementation exports no
    /// interfaces.
    pub fn publish_service<S: RpcService>(&mut self, service: Arc<S>) -> Result<()> {
        let router = self.router.as_mut().ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidArgument,
                "server already started".to_string(),
            )
        })?;
        let names = router.register(service)?;
        self.interfaces.extend(names);
        Ok(())
    }

    /// Binds the engine and announces every published interface at the
    /// directory. A directory failure here aborts startup.
    ///
    /// # Errors
    pub async fn start(&mut self) -> Result<SocketAddr> {
        let router = self.router.take().ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidArgument,
                "server already started".to_string(),
            )
        })?;

        let server = RpcServer::new(router, self.server_config.clone());
        let addr = server.listen(self.bind_addr).await?;

        // Announce the concrete bind address when there is one; only a
        // wildcard bind needs the primary host detected.
        let host = if self.bind_addr.ip().is_unspecified() {
            primary_host()
        } else {
            self.bind_addr.ip()
        };
        let endpoint = Endpoint::new(host.to_string(), addr.port());
        for interface in &self.interfaces {
            self.registry.register(interface, &endpoint).await?;
            tracing::info!("service published: {interface} -> {endpoint}");
        }

        self.server = Some(Arc::new(server));
        self.endpoint = Some(endpoint);
        Ok(addr)
    }

    /// The announced endpoint, once started.
    #[must_use]
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// Blocks until shutdown is requested.
    pub async fn join(&self) {
        if let Some(server) = &self.server {
            server.join().await;
        }
    }

    /// Graceful shutdown: withdraw from the directory so new
    /// discoveries skip this server, drain in-flight requests, then
    /// stop the engine. Directory failures are logged, never fatal.
    pub async fn shutdown(&self) {
        tracing::info!("starting graceful shutdown");

        self.registry.unregister_all().await;
        if let Err(e) = self.registry.close().await {
            tracing::error!("directory session close failed: {e}");
        }

        tokio::time::sleep(self.config.drain_interval).await;

        if let Some(server) = &self.server {
            server.shutdown().await;
        }
        tracing::info!("graceful shutdown completed");
    }
}

/// Best-effort primary host detection: the local address a UDP socket
/// would use to reach a public peer (no packets are sent), falling
/// back to loopback.
#[must_use]
pub fn primary_host() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip())
    };
    match probe() {
        Ok(ip) if !ip.is_loopback() && !ip.is_unspecified() => ip,
        _ => IpAddr::from([127, 0, 0, 1]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PublishConfig::default();
        assert_eq!(config.drain_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_primary_host_is_usable() {
        let host = primary_host();
        assert!(!host.is_unspecified());
    }
}
