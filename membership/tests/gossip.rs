use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use membership::Config;
use membership::Membership;
use membership::CONSENSUS_ADDR_TAG;

#[derive(Default)]
struct RecordingHandler {
    joined: Mutex<Vec<String>>,
    left: Mutex<Vec<String>>,
}

#[async_trait]
impl membership::Handler for RecordingHandler {
    async fn join(&self, node_name: &str, _consensus_addr: &str) -> anyhow::Result<()> {
        self.joined.lock().unwrap().push(node_name.to_string());
        Ok(())
    }

    async fn leave(&self, node_name: &str) -> anyhow::Result<()> {
        self.left.lock().unwrap().push(node_name.to_string());
        Ok(())
    }

    fn print_leader(&self) {}
    fn print_config(&self) {}
    fn print_my_addr(&self) {}
}

fn config(name: &str, port: u16, seed: Option<u16>) -> Config {
    let bind_addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let mut tags = HashMap::new();
    tags.insert(CONSENSUS_ADDR_TAG.to_string(), format!("127.0.0.1:{}", 10_000 + port));

    Config {
        node_name: name.to_string(),
        bind_addr,
        tags,
        join_addrs: seed
            .map(|p| vec![format!("127.0.0.1:{p}").parse().unwrap()])
            .unwrap_or_default(),
        gossip_interval: Duration::from_millis(100),
    }
}

#[tokio::test]
async fn a_joining_node_is_observed_by_the_seed() {
    let seed_handler = Arc::new(RecordingHandler::default());
    let seed = Membership::new(config("seed", 17701, None), seed_handler.clone())
        .await
        .unwrap();

    let joiner_handler = Arc::new(RecordingHandler::default());
    let joiner = Membership::new(config("joiner", 17702, Some(17701)), joiner_handler)
        .await
        .unwrap();

    let observed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if seed_handler.joined.lock().unwrap().iter().any(|n| n == "joiner") {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;

    assert!(observed.is_ok(), "seed never observed the joiner within the timeout");

    joiner.leave().await.unwrap();
    seed.leave().await.unwrap();
}
