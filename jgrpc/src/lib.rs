//! # jgrpc - A TCP RPC Runtime with Service Discovery
//!
//! jgrpc lets a caller invoke a method of a named interface as if it
//! were local, while the call travels over a long-lived TCP connection
//! in a framed binary format. Servers announce themselves at a shared
//! directory; clients discover the provider set per call and pick a
//! backend with a pluggable load balancer.
//!
//! ## Features
//!
//! - **Framed binary wire protocol**: 11-byte header, big-endian,
//!   16 MiB body cap, heartbeats
//! - **Pluggable body serializers**: JSON and MessagePack, keyed by a
//!   one-byte tag
//! - **Request/response correlation**: replies may arrive in any order;
//!   each caller gets exactly its own
//! - **Directory-backed discovery**: session-scoped provider nodes under
//!   `<namespace>/<interface>/providers/<host:port>`
//! - **Client-side load balancing**: round-robin, random, consistent hash
//! - **Graceful lifecycle**: publish on start, unpublish-drain-close on
//!   shutdown
//!
//! ## Serve
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use jgrpc::{
//!     MemoryDirectory, PublishConfig, PublishingServer, RegistryConfig,
//!     Result, RpcService, ServerConfig, ServiceExport, ServiceRegistry,
//! };
//! use serde_json::json;
//!
//! struct HelloImpl;
//!
//! impl RpcService for HelloImpl {
//!     fn export(self: Arc<Self>) -> Vec<ServiceExport> {
//!         vec![ServiceExport::new("demo.Hello").method(
//!             "hello",
//!             &["String"],
//!             |args| async move {
//!                 let name = args[0].as_str().unwrap_or_default();
//!                 Ok(json!(format!("Hi, {name}")))
//!             },
//!         )]
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let directory = MemoryDirectory::new();
//!     let registry =
//!         ServiceRegistry::connect(&directory, RegistryConfig::default()).await?;
//!     let mut server = PublishingServer::new(
//!         "0.0.0.0:9000".parse().unwrap(),
//!         registry,
//!         ServerConfig::default(),
//!         PublishConfig::default(),
//!     );
//!     server.publish_service(Arc::new(HelloImpl))?;
//!     server.start().await?;
//!     server.join().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Call
//!
//! ```rust,no_run
//! # use jgrpc::*;
//! # use serde_json::json;
//! # async fn call(directory: MemoryDirectory) -> Result<()> {
//! let discovery =
//!     ServiceDiscovery::connect(&directory, RegistryConfig::default()).await?;
//! let proxy = RpcProxy::new(
//!     discovery,
//!     Box::new(RoundRobin::default()),
//!     RpcClient::new(ClientConfig::default()),
//! );
//! let greeting = proxy
//!     .call_remote("demo.Hello", "hello", vec![json!("world")], vec!["String".into()])
//!     .await?;
//! # Ok(())
//! # }
//! ```

/// Error types and the crate-wide result alias.
mod error;
pub use error::{Error, ErrorKind, Result};

/// Request/response records and the message envelope.
mod message;
pub use message::{Body, Message, MsgKind, RpcRequest, RpcResponse};

/// Wire frame layout, encoder, and stream decoder.
mod frame;
pub use frame::{encode as encode_frame, FrameDecoder, HEADER_LEN, MAGIC, MAX_BODY_LEN, VERSION};

/// Pluggable body serializers and the process-wide tag registry.
pub mod serializer;
pub use serializer::{BinarySerializer, JsonSerializer, Serializer, BINARY_TAG, JSON_TAG};

/// Directory adapter: registration, discovery, coordinator seam.
pub mod registry;
pub use registry::{
    Directory, DirectorySession, MemoryDirectory, NodeMode, RegistryConfig, RetryPolicy,
    ServiceDiscovery, ServiceRegistry,
};

/// Provider endpoints and load-balancing strategies.
mod balance;
pub use balance::{ConsistentHash, Endpoint, LoadBalancer, Random, RoundRobin};

/// Correlation ids and the pending-call map.
mod waiter;
pub use waiter::{PendingCall, Waiter};

/// Per-connection outbound queue and writer.
mod connection;
pub use connection::Connection;

/// Service map and method dispatch.
mod router;
pub use router::{Handler, HandlerFuture, MethodKey, Router, RpcService, ServiceExport};

/// The server-side dispatch engine.
mod server;
pub use server::{RpcServer, ServerConfig};

/// The client-side call engine.
mod client;
pub use client::{ClientConfig, ReplyHandle, RpcClient};

/// The transparent-stub entry point over discovery and balancing.
mod proxy;
pub use proxy::{CallHandle, RpcProxy};

/// Publish-on-start, unpublish-drain-close lifecycle.
mod publish;
pub use publish::{primary_host, PublishConfig, PublishingServer};
