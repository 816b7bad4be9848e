use std::sync::Mutex;

use crate::{balance::Endpoint, error::Result};

use super::{
    directory::{connect_with_retry, Directory, DirectorySession, NodeMode},
    RegistryConfig,
};

/// The server-side directory adapter. Registers this process's endpoint
/// under `<namespace>/<interface>/providers/<host:port>` as a
/// session-scoped leaf, so the directory withdraws it if the session is
/// lost, and remembers what it created for `unregister_all`.
pub struct ServiceRegistry {
    session: Box<dyn DirectorySession>,
    config: RegistryConfig,
    registered: Mutex<Vec<String>>,
}

impl ServiceRegistry {
    /// Opens the adapter's own session, retrying per the configured
    /// backoff policy.
    ///
    /// # Errors
    pub async fn connect(directory: &dyn Directory, config: RegistryConfig) -> Result<Self> {
        let session = connect_with_retry(directory, &config.retry).await?;
        tracing::info!("directory session opened (namespace {})", config.namespace);
        Ok(Self {
            session,
            config,
            registered: Mutex::new(Vec::new()),
        })
    }

    fn provider_path(&self, interface: &str, endpoint: &Endpoint) -> String {
        format!(
            "{}/{interface}/providers/{endpoint}",
            self.config.namespace
        )
    }

    /// Creates the provider leaf for `(interface, endpoint)`, creating
    /// missing persistent parents first. Idempotent if the leaf exists.
    ///
    /// # Errors
    pub async fn register(&self, interface: &str, endpoint: &Endpoint) -> Result<()> {
        let leaf = self.provider_path(interface, endpoint);

        // Every ancestor is persistent; only the leaf is session-scoped.
        let mut offset = 1;
        while let Some(idx) = leaf[offset..].find('/') {
            let parent = &leaf[..offset + idx];
            self.session.create(parent, NodeMode::Persistent).await?;
            offset += idx + 1;
        }

        if self.session.create(&leaf, NodeMode::Ephemeral).await? {
            self.registered
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(leaf);
            tracing::info!("service registered: {interface} -> {endpoint}");
        } else {
            tracing::debug!("provider already registered: {leaf}");
        }
        Ok(())
    }

    /// Deletes the provider leaf; silently succeeds if it is absent.
    /// Persistent parents stay.
    ///
    /// # Errors
    pub async fn unregister(&self, interface: &str, endpoint: &Endpoint) -> Result<()> {
        let leaf = self.provider_path(interface, endpoint);
        if self.session.delete(&leaf).await? {
            tracing::info!("service unregistered: {interface} -> {endpoint}");
        }
        self.registered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|path| *path != leaf);
        Ok(())
    }

    /// Deletes every leaf this adapter created. Individual failures are
    /// logged, not propagated; shutdown must go on.
    pub async fn unregister_all(&self) {
        let paths: Vec<String> = self
            .registered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for path in paths {
            if let Err(e) = self.session.delete(&path).await {
                tracing::error!("failed to delete {path}: {e}");
            }
        }
        tracing::info!("all services unregistered");
    }

    /// Ends the adapter's session; the directory reclaims any leaves
    /// that are still present.
    ///
    /// # Errors
    pub async fn close(&self) -> Result<()> {
        self.session.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryDirectory;

    async fn registry(directory: &MemoryDirectory) -> ServiceRegistry {
        ServiceRegistry::connect(directory, RegistryConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_creates_parents_and_leaf() {
        let directory = MemoryDirectory::new();
        let registry = registry(&directory).await;
        let endpoint = Endpoint::new("10.0.0.1", 9000);

        registry.register("demo.Hello", &endpoint).await.unwrap();
        // Registering twice is idempotent.
        registry.register("demo.Hello", &endpoint).await.unwrap();

        let probe = directory.connect().await.unwrap();
        assert_eq!(
            probe
                .children("/jg-rpc/demo.Hello/providers")
                .await
                .unwrap(),
            vec!["10.0.0.1:9000".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unregister_keeps_parents() {
        let directory = MemoryDirectory::new();
        let registry = registry(&directory).await;
        let endpoint = Endpoint::new("10.0.0.1", 9000);

        registry.register("demo.Hello", &endpoint).await.unwrap();
        registry.unregister("demo.Hello", &endpoint).await.unwrap();
        // Absent leaf: silent success.
        registry.unregister("demo.Hello", &endpoint).await.unwrap();

        let probe = directory.connect().await.unwrap();
        assert!(probe
            .children("/jg-rpc/demo.Hello/providers")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_unregister_all_removes_every_created_leaf() {
        let directory = MemoryDirectory::new();
        let registry = registry(&directory).await;
        let endpoint = Endpoint::new("10.0.0.1", 9000);

        registry.register("demo.Hello", &endpoint).await.unwrap();
        registry.register("demo.Greet", &endpoint).await.unwrap();
        registry.unregister_all().await;

        let probe = directory.connect().await.unwrap();
        for interface in ["demo.Hello", "demo.Greet"] {
            assert!(probe
                .children(&format!("/jg-rpc/{interface}/providers"))
                .await
                .unwrap()
                .is_empty());
        }
    }

    #[tokio::test]
    async fn test_custom_namespace() {
        let directory = MemoryDirectory::new();
        let config = RegistryConfig {
            namespace: "/custom/ns".to_string(),
            ..RegistryConfig::default()
        };
        let registry = ServiceRegistry::connect(&directory, config).await.unwrap();
        registry
            .register("demo.Hello", &Endpoint::new("h", 1))
            .await
            .unwrap();

        let probe = directory.connect().await.unwrap();
        assert_eq!(
            probe
                .children("/custom/ns/demo.Hello/providers")
                .await
                .unwrap(),
            vec!["h:1".to_string()]
        );
    }
}
