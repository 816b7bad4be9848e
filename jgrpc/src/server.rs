use std::{net::SocketAddr, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;
use tokio::{
    io::AsyncReadExt,
    net::{TcpListener, TcpSocket, TcpStream},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    connection::Connection,
    error::{Error, ErrorKind, Result},
    frame::FrameDecoder,
    message::{Body, Message, MsgKind, RpcResponse},
    router::Router,
};

#[serde_inline_default]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// A connection that stays silent this long is closed. Writes do
    /// not reset the timer.
    #[serde_inline_default(Duration::from_secs(30))]
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    #[serde_inline_default(128u32)]
    pub backlog: u32,
    /// How long `shutdown` waits for in-flight handlers before giving up.
    #[serde_inline_default(Duration::from_secs(10))]
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        serde_json::from_value(serde_json::Value::Object(serde_json::Map::default())).unwrap()
    }
}

/// The dispatch engine: accepts connections, decodes frames, invokes
/// registered implementations and writes replies. Each request runs on
/// its own task, so replies on a connection may complete in any order;
/// the correlation id inside the records makes that irrelevant.
pub struct RpcServer {
    router: Arc<Router>,
    config: ServerConfig,
    stop: CancellationToken,
    tracker: TaskTracker,
}

impl RpcServer {
    #[must_use]
    pub fn new(router: Router, config: ServerConfig) -> Self {
        Self {
            router: Arc::new(router),
            config,
            stop: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Binds and starts the accept loop, returning the bound address.
    ///
    /// # Errors
    ///
    /// `BindFailed` when the socket cannot be set up or bound.
    pub async fn listen(&self, addr: SocketAddr) -> Result<SocketAddr> {
        let bind_failed = |e: std::io::Error| Error::new(ErrorKind::BindFailed, e.to_string());

        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(bind_failed)?;
        socket.set_keepalive(true).map_err(bind_failed)?;
        socket.bind(addr).map_err(bind_failed)?;
        let listener = socket.listen(self.config.backlog).map_err(bind_failed)?;
        let listener_addr = listener.local_addr().map_err(bind_failed)?;

        let stop = self.stop.clone();
        let tracker = self.tracker.clone();
        let router = Arc::clone(&self.router);
        let config = self.config.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                () = stop.cancelled() => {
                    tracing::info!("stop accept loop");
                }
                () = accept_loop(listener, router, tracker, stop.clone(), config) => {}
            }
        });

        tracing::info!("rpc server listening on {listener_addr}");
        Ok(listener_addr)
    }

    /// Blocks until `shutdown` is requested.
    pub async fn join(&self) {
        self.stop.cancelled().await;
    }

    /// Stops accepting, signals connection tasks to exit, and waits for
    /// in-flight handlers up to the configured grace period. Safe to
    /// call from any task, including a signal handler.
    pub async fn shutdown(&self) {
        tracing::info!("shutting down rpc server");
        self.stop.cancel();
        self.tracker.close();
        if tokio::time::timeout(self.config.shutdown_grace, self.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!("shutdown grace period elapsed with tasks still running");
        }
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    router: Arc<Router>,
    tracker: TaskTracker,
    stop: CancellationToken,
    config: ServerConfig,
) {
    while let Ok((stream, peer)) = listener.accept().await {
        let _ = stream.set_nodelay(true);
        let router = Arc::clone(&router);
        let conn_tracker = tracker.clone();
        let conn_stop = stop.clone();
        let idle_timeout = config.idle_timeout;
        tracker.spawn(async move {
            tokio::select! {
                () = conn_stop.cancelled() => {}
                () = serve_connection(
                    router,
                    conn_tracker.clone(),
                    conn_stop.clone(),
                    stream,
                    peer,
                    idle_timeout,
                ) => {}
            }
        });
    }
}

async fn serve_connection(
    router: Arc<Router>,
    tracker: TaskTracker,
    stop: CancellationToken,
    stream: TcpStream,
    peer: SocketAddr,
    idle_timeout: Duration,
) {
    let (mut read_half, write_half) = stream.into_split();
    let conn = Connection::spawn(peer.to_string(), write_half, &tracker, stop);
    let mut decoder = FrameDecoder::new();

    loop {
        match decoder.decode() {
            Ok(Some(msg)) => handle_message(&router, &tracker, &conn, msg),
            Ok(None) => {
                let read = tokio::time::timeout(
                    idle_timeout,
                    read_half.read_buf(decoder.buffer_mut()),
                )
                .await;
                match read {
                    Err(_) => {
                        tracing::info!("connection {peer} idle for {idle_timeout:?}, closing");
                        return;
                    }
                    Ok(Err(e)) => {
                        tracing::debug!("read from {peer} failed: {e}");
                        return;
                    }
                    Ok(Ok(0)) => {
                        tracing::debug!("connection {peer} closed by peer");
                        return;
                    }
                    Ok(Ok(_)) => {}
                }
            }
            Err(e) => {
                // Fatal to this connection only.
                tracing::error!("invalid frame from {peer}: {e}, closing connection");
                return;
            }
        }
    }
}

fn handle_message(router: &Arc<Router>, tracker: &TaskTracker, conn: &Connection, msg: Message) {
    match msg.kind {
        MsgKind::HeartbeatRequest => {
            let conn = conn.clone();
            let tag = msg.serializer;
            tracker.spawn(async move {
                if let Err(e) = conn.send(&Message::pong(tag)).await {
                    tracing::debug!("pong send failed: {e}");
                }
            });
        }
        MsgKind::Request => {
            let Body::Request(request) = msg.body else {
                tracing::warn!("request frame without request body, dropping");
                return;
            };
            let tag = msg.serializer;
            let router = Arc::clone(router);
            let conn = conn.clone();
            tracker.spawn(async move {
                let result = match router.dispatch(&request) {
                    Ok(invocation) => invocation.await,
                    Err(e) => Err(e),
                };
                let mut response = match result {
                    Ok(data) => RpcResponse::success(data),
                    Err(e) => {
                        tracing::error!(
                            "{}.{} failed: {e}",
                            request.interface_name,
                            request.method_name
                        );
                        RpcResponse::fail(failure_text(&e))
                    }
                };
                response.request_id = request.request_id;
                if let Err(e) = conn.send(&Message::response(tag, response)).await {
                    tracing::debug!("response send failed: {e}");
                }
            });
        }
        kind => {
            tracing::debug!("dropping {kind:?} frame on server connection");
        }
    }
}

fn failure_text(e: &Error) -> String {
    if e.msg.is_empty() {
        format!("{:?}", e.kind)
    } else {
        e.msg.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.backlog, 128);
        assert_eq!(config.shutdown_grace, Duration::from_secs(10));
    }

    #[test]
    fn test_partial_config() {
        let config: ServerConfig = serde_json::from_str(r#"{"idle_timeout": "5s"}"#).unwrap();
        assert_eq!(config.idle_timeout, Duration::from_secs(5));
        assert_eq!(config.backlog, 128);
    }
}
