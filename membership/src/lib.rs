//! Gossip-based cluster membership.
//!
//! Nodes advertise themselves over a SWIM-style gossip protocol (`chitchat`), tagging each
//! other with the address their consensus RPCs listen on. Join/leave events observed through
//! gossip are handed to a [`Handler`], which is responsible for turning them into Raft
//! `AddVoter`/`RemoveServer` configuration changes on whichever node is currently leader.

mod config;
mod gossip;
mod handler;

pub use config::Config;
pub use config::ConfigError;
pub use config::CONSENSUS_ADDR_TAG;
pub use gossip::Member;
pub use gossip::Membership;
pub use handler::Handler;
