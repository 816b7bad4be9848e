use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;

use crate::error::{Error, ErrorKind, Result};

use super::directory::{Directory, DirectorySession, NodeMode};

#[derive(Default)]
struct Tree {
    // Flat path map; BTreeMap keeps children enumerable and sorted.
    nodes: BTreeMap<String, Node>,
    next_session: u64,
}

struct Node {
    ephemeral_owner: Option<u64>,
}

/// In-process coordinator with real session semantics: ephemeral nodes
/// vanish when the session that created them closes (or is dropped,
/// which models session loss). Backs tests and embedded deployments;
/// an external coordinator binding implements the same traits.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    tree: Arc<Mutex<Tree>>,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn connect(&self) -> Result<Box<dyn DirectorySession>> {
        let mut tree = self.lock();
        let session = tree.next_session;
        tree.next_session += 1;
        Ok(Box::new(MemorySession {
            tree: Arc::clone(&self.tree),
            session,
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct MemorySession {
    tree: Arc<Mutex<Tree>>,
    session: u64,
    closed: AtomicBool,
}

fn validate(path: &str) -> Result<()> {
    let ok = path.starts_with('/')
        && !path.ends_with('/')
        && !path.contains("//")
        && path.len() > 1;
    if ok {
        Ok(())
    } else {
        Err(Error::new(
            ErrorKind::Directory,
            format!("invalid path: {path}"),
        ))
    }
}

fn parent_of(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) | None => None,
        Some(idx) => Some(&path[..idx]),
    }
}

impl MemorySession {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tree>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::new(
                ErrorKind::Directory,
                "session is closed".to_string(),
            ));
        }
        Ok(self.tree.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn expire(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut tree = self.tree.lock().unwrap_or_else(|e| e.into_inner());
        tree.nodes
            .retain(|_, node| node.ephemeral_owner != Some(self.session));
    }
}

#[async_trait]
impl DirectorySession for MemorySession {
    async fn create(&self, path: &str, mode: NodeMode) -> Result<bool> {
        validate(path)?;
        let mut tree = self.lock()?;
        if tree.nodes.contains_key(path) {
            return Ok(false);
        }
        if let Some(parent) = parent_of(path) {
            if !tree.nodes.contains_key(parent) {
                return Err(Error::new(
                    ErrorKind::Directory,
                    format!("no parent node: {parent}"),
                ));
            }
        }
        let ephemeral_owner = match mode {
            NodeMode::Persistent => None,
            NodeMode::Ephemeral => Some(self.session),
        };
        tree.nodes.insert(path.to_string(), Node { ephemeral_owner });
        Ok(true)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        validate(path)?;
        Ok(self.lock()?.nodes.contains_key(path))
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        validate(path)?;
        let tree = self.lock()?;
        if !tree.nodes.contains_key(path) {
            return Err(Error::new(
                ErrorKind::Directory,
                format!("no node: {path}"),
            ));
        }

        let prefix = format!("{path}/");
        let names = tree
            .nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                if rest.contains('/') {
                    None
                } else {
                    Some(rest.to_string())
                }
            })
            .collect();
        Ok(names)
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        validate(path)?;
        let mut tree = self.lock()?;
        if !tree.nodes.contains_key(path) {
            return Ok(false);
        }
        let prefix = format!("{path}/");
        let has_children = tree
            .nodes
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix));
        if has_children {
            return Err(Error::new(
                ErrorKind::Directory,
                format!("node has children: {path}"),
            ));
        }
        tree.nodes.remove(path);
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        self.expire();
        Ok(())
    }
}

impl Drop for MemorySession {
    // A dropped session is a lost session; the directory reclaims its
    // ephemeral nodes.
    fn drop(&mut self) {
        self.expire();
    }
}
