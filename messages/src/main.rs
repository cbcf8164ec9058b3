//! `messages-node`: a single node of the replicated, per-user message store.
//!
//! Binds together the durable state machine (`storage`), the consensus engine (`raft`), the
//! gossip membership layer (`membership`), and the gRPC wire API (this crate) described in
//! spec §2.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use messages::binder::Binder;
use messages::config::Args;
use messages::network::AddressBook;
use messages::network::GrpcNetwork;
use messages::service::ConsensusService;
use messages::service::MessagesService;
use raft::Raft;
use tonic::transport::Server;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    run(args).await
}

async fn run(args: Args) -> anyhow::Result<()> {
    let store = storage::Store::open(args.node_id, &args.data_dir)
        .await
        .context("opening durable stores")?;

    // Bootstrap is refused on non-pristine on-disk state (spec §4.3), independent of whatever
    // `initialize` itself decides once the engine is running.
    if args.bootstrap && store.has_existing_state().await.context("checking for existing on-disk state")? {
        anyhow::bail!("refusing to bootstrap node {}: existing on-disk state found under {:?}", args.node_id, args.data_dir);
    }

    let mut config_builder = raft::Config::build(format!("gallery-messages-{}", args.node_id));
    if args.heartbeat_timeout_ms != 0 {
        config_builder = config_builder.heartbeat_interval(args.heartbeat_timeout_ms);
    }
    if args.election_timeout_ms != 0 {
        config_builder = config_builder
            .election_timeout_min(args.election_timeout_ms)
            .election_timeout_max(args.election_timeout_ms * 2);
    }
    let raft_config = Arc::new(config_builder.validate().context("validating raft config")?);

    let addresses = Arc::new(AddressBook::new());
    let network = Arc::new(GrpcNetwork::new(addresses.clone()));
    let store = Arc::new(store);

    let raft: raft::Raft<storage::ProposeMessage, storage::MessageResponse, GrpcNetwork, storage::Store> =
        Raft::new(args.node_id, raft_config, network, store.clone());

    let binder = Arc::new(Binder::new(
        args.node_id,
        raft.clone(),
        &store,
        addresses,
        args.consensus_addr.to_string(),
        args.commit_timeout(),
    ));

    if args.bootstrap {
        let mut members = BTreeSet::new();
        members.insert(args.node_id);
        // `NotAllowed` just means the cluster is already up and running under this id, which is
        // the intended end state anyway — safe to ignore, per the engine's own docs.
        match raft.initialize(members).await {
            Ok(()) | Err(raft::error::InitializeError::NotAllowed) => {}
            Err(e) => return Err(e.into()),
        }
    }

    let membership_config = membership::Config {
        node_name: args.node_name(),
        bind_addr: args.bind_addr,
        tags: args.gossip_tags(),
        join_addrs: args.join_addrs.clone(),
        gossip_interval: Duration::from_millis(200),
    };
    let gossip = membership::Membership::new(membership_config, binder.clone())
        .await
        .context("starting gossip membership")?;

    tracing::info!(
        node_id = args.node_id,
        node_name = %gossip.local_node_name(),
        rpc_addr = %args.rpc_addr(),
        "messages-node started"
    );

    let rpc_addr = args.rpc_addr();
    Server::builder()
        .add_service(messages::proto::messages_server::MessagesServer::new(MessagesService::new(binder.clone())))
        .add_service(messages::proto::consensus_server::ConsensusServer::new(ConsensusService::new(binder)))
        .serve_with_shutdown(rpc_addr, async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("gRPC server")?;

    raft.shutdown().await.context("shutting down raft")?;
    gossip.leave().await.context("leaving gossip cluster")?;

    Ok(())
}
