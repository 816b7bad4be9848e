use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;

use crate::error::Result;

/// Lifetime of a directory node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeMode {
    /// Survives the creating session.
    Persistent,
    /// Deleted by the directory when the owning session ends.
    Ephemeral,
}

/// One session against the coordinator tree. Paths are absolute,
/// `/`-separated, without a trailing slash. Ephemeral nodes created
/// through a session disappear when that session closes or is lost.
#[async_trait]
pub trait DirectorySession: Send + Sync {
    /// Creates a node. Returns `true` if it was created, `false` if it
    /// already existed (making creation idempotent).
    ///
    /// # Errors
    ///
    /// Fails when the parent node does not exist or the session is gone.
    async fn create(&self, path: &str, mode: NodeMode) -> Result<bool>;

    /// # Errors
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Child node names (not full paths) under `path`.
    ///
    /// # Errors
    ///
    /// Fails when the node does not exist.
    async fn children(&self, path: &str) -> Result<Vec<String>>;

    /// Deletes a leaf node. Returns `false` if it was already absent.
    ///
    /// # Errors
    ///
    /// Fails when the node still has children or the session is gone.
    async fn delete(&self, path: &str) -> Result<bool>;

    /// Ends the session; the directory drops its ephemeral nodes.
    ///
    /// # Errors
    async fn close(&self) -> Result<()>;
}

/// A coordinator endpoint from which sessions can be opened.
#[async_trait]
pub trait Directory: Send + Sync {
    /// # Errors
    async fn connect(&self) -> Result<Box<dyn DirectorySession>>;
}

/// Bounded exponential backoff for opening a directory session.
#[serde_inline_default]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    #[serde_inline_default(Duration::from_secs(1))]
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde_inline_default(3u32)]
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        serde_json::from_value(serde_json::Value::Object(serde_json::Map::default())).unwrap()
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

pub(crate) async fn connect_with_retry(
    directory: &dyn Directory,
    retry: &RetryPolicy,
) -> Result<Box<dyn DirectorySession>> {
    let mut attempt = 0;
    loop {
        match directory.connect().await {
            Ok(session) => return Ok(session),
            Err(e) if attempt < retry.max_retries => {
                let delay = retry.delay(attempt);
                tracing::warn!(
                    "directory connect failed (attempt {attempt}): {e}, retrying in {delay:?}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ErrorKind};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_retry_policy_defaults_and_backoff() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.base_delay, Duration::from_secs(1));
        assert_eq!(retry.max_retries, 3);
        assert_eq!(retry.delay(0), Duration::from_secs(1));
        assert_eq!(retry.delay(2), Duration::from_secs(4));
    }

    struct Flaky {
        failures: AtomicU32,
        inner: crate::registry::MemoryDirectory,
    }

    #[async_trait]
    impl Directory for Flaky {
        async fn connect(&self) -> Result<Box<dyn DirectorySession>> {
            if self.failures.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(Error::new(
                    ErrorKind::Directory,
                    "coordinator unreachable".to_string(),
                ));
            }
            self.inner.connect().await
        }
    }

    #[tokio::test]
    async fn test_connect_retries_until_success() {
        let flaky = Flaky {
            failures: AtomicU32::new(2),
            inner: crate::registry::MemoryDirectory::new(),
        };
        let retry = RetryPolicy {
            base_delay: Duration::from_millis(10),
            max_retries: 3,
        };
        assert!(connect_with_retry(&flaky, &retry).await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_max_retries() {
        let flaky = Flaky {
            failures: AtomicU32::new(10),
            inner: crate::registry::MemoryDirectory::new(),
        };
        let retry = RetryPolicy {
            base_delay: Duration::from_millis(10),
            max_retries: 2,
        };
        let err = connect_with_retry(&flaky, &retry)
            .await
            .err()
            .expect("expected error");
        assert_eq!(err.kind, ErrorKind::Directory);
    }
}
