use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use dashmap::DashMap;
use foldhash::fast::RandomState;
use tokio::sync::oneshot;

use crate::{
    error::{Error, ErrorKind, Result},
    message::RpcResponse,
};

struct Pending {
    tx: oneshot::Sender<Result<RpcResponse>>,
    conn: String,
}

/// The pending-call map: correlates outbound requests with inbound
/// responses by correlation id. There is one waiter per client engine;
/// ids it allocates are unique for the process lifetime.
#[derive(Default)]
pub struct Waiter {
    seq: AtomicU64,
    pending: DashMap<String, Pending, RandomState>,
}

/// RAII cleanup for a pending entry. Dropping the handle (timeout, send
/// failure, abandoned call) removes the entry so late replies are
/// dropped instead of delivered.
struct PendingGuard {
    waiter: Arc<Waiter>,
    id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.waiter.pending.remove(&self.id);
    }
}

/// One in-flight call: resolves to the matching response, or to the
/// failure that tore the call down.
pub struct PendingCall {
    rx: oneshot::Receiver<Result<RpcResponse>>,
    _guard: PendingGuard,
}

impl PendingCall {
    /// Waits for the reply. Consumes the handle; the pending entry is
    /// removed either by delivery or by the guard.
    ///
    /// # Errors
    ///
    /// Returns the failure delivered for this call, or `ConnectionLost`
    /// if the waiter itself went away.
    pub async fn recv(self) -> Result<RpcResponse> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::new(
                ErrorKind::ConnectionLost,
                "pending call abandoned".to_string(),
            )),
        }
    }
}

impl Waiter {
    /// Allocates a fresh correlation id: a process-wide counter joined
    /// with a nanosecond timestamp. The counter alone guarantees an id
    /// is never reused while any call is pending.
    pub fn allocate_id(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        format!("{seq}-{nanos}")
    }

    /// Inserts a pending entry for `id` bound to connection `conn`.
    /// Must be called before the request frame is written, so a reply
    /// can never race an absent entry.
    pub fn register(self: &Arc<Self>, id: &str, conn: &str) -> PendingCall {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id.to_string(),
            Pending {
                tx,
                conn: conn.to_string(),
            },
        );
        PendingCall {
            rx,
            _guard: PendingGuard {
                waiter: Arc::clone(self),
                id: id.to_string(),
            },
        }
    }

    /// Delivers a response to the caller waiting on its correlation id.
    /// Late or duplicate replies find no entry and are dropped.
    pub fn complete(&self, id: &str, response: RpcResponse) {
        if let Some((_, pending)) = self.pending.remove(id) {
            let _ = pending.tx.send(Ok(response));
        } else {
            tracing::warn!("no pending call for correlation id {id}, dropping reply");
        }
    }

    /// Fails every call that is in flight on `conn`. Called when a
    /// connection dies so its callers see `ConnectionLost` instead of
    /// hanging until timeout.
    pub fn fail_connection(&self, conn: &str, cause: &str) {
        let ids: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.value().conn == conn)
            .map(|entry| entry.key().clone())
            .collect();
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending
                    .tx
                    .send(Err(Error::new(ErrorKind::ConnectionLost, cause.to_string())));
            }
        }
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter")
            .field("in_flight", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let waiter = Waiter::default();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(waiter.allocate_id()));
        }
    }

    #[tokio::test]
    async fn test_complete_delivers_matching_response() {
        let waiter = Arc::new(Waiter::default());

        let id_a = waiter.allocate_id();
        let id_b = waiter.allocate_id();
        let call_a = waiter.register(&id_a, "peer:9000");
        let call_b = waiter.register(&id_b, "peer:9000");
        assert_eq!(waiter.in_flight(), 2);

        let mut rsp_b = RpcResponse::success(serde_json::json!("b"));
        rsp_b.request_id = id_b.clone();
        waiter.complete(&id_b, rsp_b);

        let mut rsp_a = RpcResponse::success(serde_json::json!("a"));
        rsp_a.request_id = id_a.clone();
        waiter.complete(&id_a, rsp_a);

        // Out-of-order delivery; each caller still gets its own reply.
        assert_eq!(call_a.recv().await.unwrap().request_id, id_a);
        assert_eq!(call_b.recv().await.unwrap().request_id, id_b);
        assert_eq!(waiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_drop_removes_entry() {
        let waiter = Arc::new(Waiter::default());
        let id = waiter.allocate_id();
        let call = waiter.register(&id, "peer:9000");
        assert!(waiter.contains(&id));

        drop(call);
        assert!(!waiter.contains(&id));

        // A late reply finds nothing; it is dropped without effect.
        waiter.complete(&id, RpcResponse::success(serde_json::Value::Null));
    }

    #[tokio::test]
    async fn test_fail_connection_only_hits_its_calls() {
        let waiter = Arc::new(Waiter::default());
        let id_dead = waiter.allocate_id();
        let id_live = waiter.allocate_id();
        let call_dead = waiter.register(&id_dead, "dead:9000");
        let call_live = waiter.register(&id_live, "live:9001");

        waiter.fail_connection("dead:9000", "socket eof");

        let err = call_dead.recv().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConnectionLost);
        assert!(waiter.contains(&id_live));

        let mut rsp = RpcResponse::success(serde_json::Value::Null);
        rsp.request_id = id_live.clone();
        waiter.complete(&id_live, rsp);
        assert!(call_live.recv().await.unwrap().success);
    }
}
