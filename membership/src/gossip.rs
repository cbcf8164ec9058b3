//! The gossip membership service itself, backed by `chitchat`'s SWIM-style protocol.
//!
//! Unlike a push-event gossip library, `chitchat` exposes an eventually-consistent live-node set
//! that callers poll. We diff successive snapshots of that set on a timer to synthesize the
//! join/leave events spec §4.4 describes, filtering out this node's own membership changes
//! before they ever reach the `Handler`.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chitchat::transport::UdpTransport;
use chitchat::spawn_chitchat;
use chitchat::ChitchatConfig;
use chitchat::ChitchatHandle;
use chitchat::ChitchatId;
use chitchat::FailureDetectorConfig;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::config::CONSENSUS_ADDR_TAG;
use crate::handler::Handler;

/// A snapshot of one gossip member, as exposed to callers of `Membership::members`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    pub node_name: String,
    pub tags: HashMap<String, String>,
}

/// A running gossip membership node.
pub struct Membership {
    local_node_name: String,
    handle: ChitchatHandle,
    dispatch_task: JoinHandle<()>,
}

impl Membership {
    /// Join (or start) the gossip cluster described by `config`, dispatching join/leave events
    /// to `handler` as they're observed.
    pub async fn new(config: Config, handler: Arc<dyn Handler>) -> anyhow::Result<Self> {
        config.validate()?;

        let chitchat_id = ChitchatId::new(config.node_name.clone(), 0, config.bind_addr);
        let chitchat_config = ChitchatConfig {
            chitchat_id: chitchat_id.clone(),
            cluster_id: "gallery-messages".to_string(),
            gossip_interval: config.gossip_interval,
            listen_addr: config.bind_addr,
            seed_nodes: config.join_addrs.iter().map(|a| a.to_string()).collect(),
            failure_detector_config: FailureDetectorConfig::default(),
            marked_for_deletion_grace_period: Duration::from_secs(60 * 60),
            catchup_callback: None,
            extra_liveness_predicate: None,
        };

        let transport = UdpTransport;
        let handle = spawn_chitchat(chitchat_config, Vec::new(), &transport).await?;

        {
            let chitchat = handle.chitchat();
            let mut guard = chitchat.lock().await;
            let self_state = guard.self_node_state();
            for (key, value) in &config.tags {
                self_state.set(key, value);
            }
        }

        let dispatch_task = spawn_dispatch_loop(
            config.node_name.clone(),
            config.gossip_interval,
            handle.chitchat(),
            handler,
        );

        Ok(Self {
            local_node_name: config.node_name,
            handle,
            dispatch_task,
        })
    }

    /// This node's known gossip peers, including itself.
    pub async fn members(&self) -> Vec<Member> {
        let chitchat = self.handle.chitchat();
        let guard = chitchat.lock().await;
        guard
            .live_nodes()
            .filter_map(|id| guard.node_state(id).map(|state| (id, state)))
            .map(|(id, state)| Member {
                node_name: id.node_id.clone(),
                tags: state.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            })
            .collect()
    }

    pub fn local_node_name(&self) -> &str {
        &self.local_node_name
    }

    /// Leave the gossip cluster gracefully.
    pub async fn leave(self) -> anyhow::Result<()> {
        self.dispatch_task.abort();
        self.handle.shutdown().await?;
        Ok(())
    }
}

fn spawn_dispatch_loop(
    local_node_name: String,
    interval: Duration,
    chitchat: Arc<Mutex<chitchat::Chitchat>>,
    handler: Arc<dyn Handler>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut known: BTreeSet<String> = BTreeSet::new();
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(200)));

        loop {
            ticker.tick().await;

            let current: Vec<(String, Option<String>)> = {
                let guard = chitchat.lock().await;
                guard
                    .live_nodes()
                    .filter_map(|id| guard.node_state(id).map(|state| (id, state)))
                    .map(|(id, state)| {
                        (id.node_id.clone(), state.get(CONSENSUS_ADDR_TAG).map(|v| v.to_string()))
                    })
                    .collect()
            };
            let current_names: BTreeSet<String> = current.iter().map(|(name, _)| name.clone()).collect();

            for (name, consensus_addr) in &current {
                if name == &local_node_name {
                    continue; // local events are never dispatched
                }
                if !known.contains(name) {
                    let addr = consensus_addr.clone().unwrap_or_default();
                    if let Err(err) = handler.join(name, &addr).await {
                        tracing::warn!(node = %name, error = %err, "membership join handler failed");
                    }
                }
            }

            for name in known.difference(&current_names) {
                if name == &local_node_name {
                    continue;
                }
                if let Err(err) = handler.leave(name).await {
                    tracing::warn!(node = %name, error = %err, "membership leave handler failed");
                }
            }

            known = current_names;
        }
    })
}
