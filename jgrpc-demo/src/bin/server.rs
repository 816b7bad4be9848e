use std::sync::Arc;

use clap::Parser;
use jgrpc::{Router, RpcServer, ServerConfig};
use jgrpc_demo::HelloImpl;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Listen address.
    #[arg(default_value = "0.0.0.0:9000")]
    pub addr: std::net::SocketAddr,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    let mut router = Router::new();
    router
        .register(Arc::new(HelloImpl))
        .expect("register demo service");
    let server = Arc::new(RpcServer::new(router, ServerConfig::default()));

    let addr = server.listen(args.addr).await.expect("bind listen address");
    tracing::info!("serving {} on {addr}...", jgrpc_demo::HELLO_INTERFACE);

    tokio::signal::ctrl_c().await.expect("install signal handler");
    server.shutdown().await;
}
