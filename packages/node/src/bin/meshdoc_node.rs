//! Standalone demo binary: runs one `MeshDoc` node with an in-memory store,
//! discoverable by and discovering peers on the local network.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use meshdoc_node::{MemoryStore, Node, NodeConfig, NodeIdentity, ResolverKind};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "meshdoc-node", about = "Run a standalone MeshDoc replication node")]
struct Args {
    /// Stable id for this node, used in HLC timestamps and handshakes.
    #[arg(long)]
    node_id: String,

    /// Address the sync server listens on and advertises over discovery.
    #[arg(long, default_value = "0.0.0.0:7420")]
    bind: SocketAddr,

    /// Shared secret compared against incoming handshake auth tokens.
    #[arg(long, default_value = "")]
    cluster_secret: String,

    /// Use the recursive field-merge resolver instead of last-write-wins.
    #[arg(long)]
    field_merge: bool,

    /// Require the AES-GCM + ECDH secure transport instead of plaintext.
    #[arg(long)]
    secure: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();

    let config = NodeConfig::new(args.node_id.clone(), args.bind)
        .with_cluster_secret(args.cluster_secret)
        .with_secure_mode(args.secure)
        .with_resolver(if args.field_merge { ResolverKind::FieldMerge } else { ResolverKind::LastWriteWins });
    let identity = NodeIdentity::new(args.node_id, config.cluster_secret.clone());

    let node = Arc::new(Node::new(config, identity, Arc::new(MemoryStore::new())));
    let bound = node.start().await?;
    tracing::info!(addr = %bound.addr(), "meshdoc node started");

    let node_for_signal = Arc::clone(&node);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received shutdown signal");
        node_for_signal.shutdown();
    });

    node.serve(bound).await;
    Ok(())
}
