use std::sync::Arc;

use clap::Parser;
use jgrpc::{
    ClientConfig, Endpoint, MemoryDirectory, RegistryConfig, RoundRobin, RpcClient, RpcProxy,
    ServiceDiscovery, ServiceRegistry,
};
use jgrpc_demo::{HelloClient, HELLO_INTERFACE};

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Server address.
    #[arg(default_value = "127.0.0.1:9000")]
    pub addr: Endpoint,

    /// Who to greet.
    #[arg(default_value = "world")]
    pub name: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    // Seed an in-process directory with the one configured provider,
    // then call like any discovering client.
    let directory = MemoryDirectory::new();
    let registry = ServiceRegistry::connect(&directory, RegistryConfig::default())
        .await
        .expect("open directory session");
    registry
        .register(HELLO_INTERFACE, &args.addr)
        .await
        .expect("register provider");

    let discovery = ServiceDiscovery::connect(&directory, RegistryConfig::default())
        .await
        .expect("open directory session");
    let proxy = Arc::new(RpcProxy::new(
        discovery,
        Box::new(RoundRobin::default()),
        RpcClient::new(ClientConfig::default()),
    ));

    let client = HelloClient::new(Arc::clone(&proxy));
    match client.hello(&args.name).await {
        Ok(greeting) => tracing::info!("hello rsp: {greeting}"),
        Err(e) => tracing::error!("call failed: {e}"),
    }

    proxy.close().await;
    let _ = registry.close().await;
}
