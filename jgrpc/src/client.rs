use std::{collections::HashMap, sync::Arc, time::Duration};

use foldhash::fast::RandomState;
use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;
use tokio::{
    io::AsyncReadExt,
    net::{tcp::OwnedReadHalf, TcpStream},
    sync::{Notify, RwLock},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    balance::Endpoint,
    connection::Connection,
    error::{Error, ErrorKind, Result},
    frame::FrameDecoder,
    message::{Body, Message, MsgKind, RpcRequest, RpcResponse},
    serializer::JSON_TAG,
    waiter::{PendingCall, Waiter},
};

#[serde_inline_default]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    #[serde_inline_default(Duration::from_secs(5))]
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde_inline_default(Duration::from_secs(10))]
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
    /// Body serializer tag stamped on outbound requests.
    #[serde_inline_default(JSON_TAG)]
    pub serializer: u8,
}

impl Default for ClientConfig {
    fn default() -> Self {
        serde_json::from_value(serde_json::Value::Object(serde_json::Map::default())).unwrap()
    }
}

#[derive(Clone)]
struct ClientConn {
    conn: Connection,
    pong: Arc<Notify>,
}

struct Shared {
    waiter: Arc<Waiter>,
    connections: RwLock<HashMap<String, ClientConn, RandomState>>,
    tracker: TaskTracker,
    stop: CancellationToken,
}

/// The call engine: one persistent connection per backend, a pending
/// call per outbound request, replies matched by correlation id.
pub struct RpcClient {
    config: ClientConfig,
    shared: Arc<Shared>,
}

/// One in-flight request. `wait` resolves to the server's response
/// record; dropping the handle abandons the call and drops any late
/// reply.
pub struct ReplyHandle {
    pending: PendingCall,
}

impl ReplyHandle {
    /// # Errors
    ///
    /// `Timeout` when no reply arrives in time; `ConnectionLost` when
    /// the connection died with the call in flight.
    pub async fn wait(self, timeout: Duration) -> Result<RpcResponse> {
        match tokio::time::timeout(timeout, self.pending.recv()).await {
            Ok(result) => result,
            Err(_) => Err(Error::new(
                ErrorKind::Timeout,
                format!("no reply within {timeout:?}"),
            )),
        }
    }
}

impl RpcClient {
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                waiter: Arc::new(Waiter::default()),
                connections: RwLock::default(),
                tracker: TaskTracker::new(),
                stop: CancellationToken::new(),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sends a request and waits for its reply with the configured
    /// per-call timeout.
    ///
    /// # Errors
    pub async fn call(&self, endpoint: &Endpoint, request: RpcRequest) -> Result<RpcResponse> {
        let handle = self.send(endpoint, request).await?;
        handle.wait(self.config.call_timeout).await
    }

    /// Sends a request and returns once the frame is written; the
    /// returned handle resolves when the reply arrives.
    ///
    /// # Errors
    pub async fn send(&self, endpoint: &Endpoint, mut request: RpcRequest) -> Result<ReplyHandle> {
        let entry = self.acquire(endpoint).await?;

        let id = self.shared.waiter.allocate_id();
        request.request_id.clone_from(&id);
        // Insert before writing, so a fast reply always finds its entry.
        let pending = self.shared.waiter.register(&id, entry.conn.key());

        let msg = Message::request(self.config.serializer, request);
        entry.conn.send(&msg).await?;
        Ok(ReplyHandle { pending })
    }

    /// Heartbeat round-trip: resolves when a pong arrives on the
    /// connection to `endpoint`.
    ///
    /// # Errors
    pub async fn ping(&self, endpoint: &Endpoint) -> Result<()> {
        let entry = self.acquire(endpoint).await?;

        let mut pong = std::pin::pin!(entry.pong.notified());
        pong.as_mut().enable();
        entry.conn.send(&Message::ping(self.config.serializer)).await?;

        tokio::time::timeout(self.config.call_timeout, pong)
            .await
            .map_err(|_| Error::new(ErrorKind::Timeout, format!("no pong from {endpoint}")))
    }

    /// The cached connection for `endpoint`, dialling one if absent.
    /// Safe under concurrent first use; only one dial happens.
    ///
    /// # Errors
    pub async fn get_or_open(&self, endpoint: &Endpoint) -> Result<Connection> {
        Ok(self.acquire(endpoint).await?.conn)
    }

    async fn acquire(&self, endpoint: &Endpoint) -> Result<ClientConn> {
        let key = endpoint.to_string();

        // Fast path for the common case of an existing connection.
        if let Ok(connections) = self.shared.connections.try_read() {
            if let Some(entry) = connections.get(&key) {
                return Ok(entry.clone());
            }
        }

        let mut connections = self.shared.connections.write().await;
        if let Some(entry) = connections.get(&key) {
            return Ok(entry.clone());
        }

        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        )
        .await
        .map_err(|_| {
            Error::new(
                ErrorKind::ConnectFailed,
                format!("connect to {key} timed out"),
            )
        })?
        .map_err(|e| Error::new(ErrorKind::ConnectFailed, format!("{key}: {e}")))?;
        let _ = stream.set_nodelay(true);

        let (read_half, write_half) = stream.into_split();
        let conn = Connection::spawn(
            key.clone(),
            write_half,
            &self.shared.tracker,
            self.shared.stop.clone(),
        );
        let entry = ClientConn {
            conn,
            pong: Arc::new(Notify::new()),
        };

        let shared = Arc::clone(&self.shared);
        let task_key = key.clone();
        let pong = Arc::clone(&entry.pong);
        self.shared.tracker.spawn(async move {
            let stop = shared.stop.clone();
            tokio::select! {
                () = stop.cancelled() => {}
                r = recv_loop(read_half, &task_key, &shared.waiter, &pong) => {
                    if let Err(e) = r {
                        tracing::error!("recv loop for {task_key} failed: {e}");
                    }
                }
            }
            // Whatever ended the loop, this connection is gone: drop it
            // from the cache and fail its in-flight calls.
            shared.connections.write().await.remove(&task_key);
            shared.waiter.fail_connection(&task_key, "connection lost");
        });

        connections.insert(key, entry.clone());
        Ok(entry)
    }

    /// Closes every cached connection and fails anything in flight.
    pub async fn close(&self) {
        self.shared.stop.cancel();
        self.shared.tracker.close();
        self.shared.tracker.wait().await;
        self.shared.connections.write().await.clear();
        tracing::info!("rpc client closed");
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("config", &self.config)
            .finish()
    }
}

async fn recv_loop(
    mut read_half: OwnedReadHalf,
    key: &str,
    waiter: &Arc<Waiter>,
    pong: &Notify,
) -> Result<()> {
    let mut decoder = FrameDecoder::new();
    loop {
        match decoder.decode()? {
            Some(msg) => match msg.kind {
                MsgKind::Response => {
                    if let Body::Response(response) = msg.body {
                        // The correlation id lives in the record, not
                        // the envelope.
                        let request_id = response.request_id.clone();
                        waiter.complete(&request_id, response);
                    } else {
                        tracing::warn!("response frame without response body from {key}");
                    }
                }
                MsgKind::HeartbeatResponse => {
                    tracing::debug!("pong from {key}");
                    pong.notify_waiters();
                }
                kind => {
                    tracing::debug!("dropping {kind:?} frame on client connection {key}");
                }
            },
            None => {
                let n = read_half
                    .read_buf(decoder.buffer_mut())
                    .await
                    .map_err(|e| Error::new(ErrorKind::RecvFailed, e.to_string()))?;
                if n == 0 {
                    return Err(Error::new(
                        ErrorKind::RecvFailed,
                        "socket eof".to_string(),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.call_timeout, Duration::from_secs(10));
        assert_eq!(config.serializer, JSON_TAG);
    }

    #[tokio::test]
    async fn test_connect_failure_is_connect_failed() {
        let client = RpcClient::new(ClientConfig::default());
        // Port 1 on loopback is not listening.
        let err = client
            .get_or_open(&Endpoint::new("127.0.0.1", 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConnectFailed);
        client.close().await;
    }
}
