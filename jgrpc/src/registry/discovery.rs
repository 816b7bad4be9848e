use crate::{balance::Endpoint, error::Result};

use super::{
    directory::{connect_with_retry, Directory, DirectorySession},
    RegistryConfig,
};

/// The client-side directory adapter: reads the current provider set
/// for an interface. A missing providers path is an empty set, not an
/// error, and malformed leaf names are skipped.
pub struct ServiceDiscovery {
    session: Box<dyn DirectorySession>,
    config: RegistryConfig,
}

impl ServiceDiscovery {
    /// Opens the adapter's own session, retrying per the configured
    /// backoff policy.
    ///
    /// # Errors
    pub async fn connect(directory: &dyn Directory, config: RegistryConfig) -> Result<Self> {
        let session = connect_with_retry(directory, &config.retry).await?;
        Ok(Self { session, config })
    }

    /// # Errors
    ///
    /// Fails only on directory errors; an unknown interface yields an
    /// empty, ordered provider set.
    pub async fn discover_all(&self, interface: &str) -> Result<Vec<Endpoint>> {
        let path = format!("{}/{interface}/providers", self.config.namespace);
        if !self.session.exists(&path).await? {
            tracing::debug!("no providers path for {interface}");
            return Ok(Vec::new());
        }

        let mut names = self.session.children(&path).await?;
        names.sort_unstable();

        let mut providers = Vec::with_capacity(names.len());
        for name in names {
            match name.parse::<Endpoint>() {
                Ok(endpoint) => providers.push(endpoint),
                Err(_) => tracing::warn!("skipping malformed provider node: {name}"),
            }
        }
        tracing::debug!("discovered {} providers for {interface}", providers.len());
        Ok(providers)
    }

    /// First provider of the set, if any.
    ///
    /// # Errors
    pub async fn discover(&self, interface: &str) -> Result<Option<Endpoint>> {
        Ok(self.discover_all(interface).await?.into_iter().next())
    }

    /// # Errors
    pub async fn close(&self) -> Result<()> {
        self.session.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MemoryDirectory, NodeMode, ServiceRegistry};

    #[tokio::test]
    async fn test_unknown_interface_is_empty_set() {
        let directory = MemoryDirectory::new();
        let discovery = ServiceDiscovery::connect(&directory, RegistryConfig::default())
            .await
            .unwrap();
        assert!(discovery.discover_all("no.Such").await.unwrap().is_empty());
        assert!(discovery.discover("no.Such").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_registration_is_visible_to_other_sessions() {
        let directory = MemoryDirectory::new();
        let registry = ServiceRegistry::connect(&directory, RegistryConfig::default())
            .await
            .unwrap();
        let discovery = ServiceDiscovery::connect(&directory, RegistryConfig::default())
            .await
            .unwrap();

        let a = Endpoint::new("10.0.0.1", 9000);
        let b = Endpoint::new("10.0.0.2", 9001);
        registry.register("demo.Hello", &a).await.unwrap();
        registry.register("demo.Hello", &b).await.unwrap();

        let providers = discovery.discover_all("demo.Hello").await.unwrap();
        assert_eq!(providers, vec![a.clone(), b]);
        assert_eq!(discovery.discover("demo.Hello").await.unwrap(), Some(a));
    }

    #[tokio::test]
    async fn test_session_end_withdraws_providers() {
        let directory = MemoryDirectory::new();
        let discovery = ServiceDiscovery::connect(&directory, RegistryConfig::default())
            .await
            .unwrap();

        {
            let registry = ServiceRegistry::connect(&directory, RegistryConfig::default())
                .await
                .unwrap();
            registry
                .register("demo.Hello", &Endpoint::new("10.0.0.1", 9000))
                .await
                .unwrap();
            assert_eq!(discovery.discover_all("demo.Hello").await.unwrap().len(), 1);
            registry.close().await.unwrap();
        }

        // The registering session ended; its leaf is gone, the
        // persistent parents are not.
        assert!(discovery.discover_all("demo.Hello").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_nodes_are_skipped() {
        let directory = MemoryDirectory::new();
        let session = directory.connect().await.unwrap();
        for path in ["/jg-rpc", "/jg-rpc/demo.Hello", "/jg-rpc/demo.Hello/providers"] {
            session.create(path, NodeMode::Persistent).await.unwrap();
        }
        session
            .create("/jg-rpc/demo.Hello/providers/not-an-endpoint", NodeMode::Persistent)
            .await
            .unwrap();
        session
            .create("/jg-rpc/demo.Hello/providers/10.0.0.1:9000", NodeMode::Persistent)
            .await
            .unwrap();

        let discovery = ServiceDiscovery::connect(&directory, RegistryConfig::default())
            .await
            .unwrap();
        assert_eq!(
            discovery.discover_all("demo.Hello").await.unwrap(),
            vec![Endpoint::new("10.0.0.1", 9000)]
        );
    }
}
