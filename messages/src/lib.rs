//! gRPC-facing binder: wires the consensus engine, the durable state machine, and the gossip
//! membership layer together into a runnable node, per spec §6.

pub mod binder;
pub mod config;
pub mod error;
pub mod network;
pub mod service;

pub mod proto {
    tonic::include_proto!("gallery.messages.v1");
}

pub use binder::Binder;
pub use binder::NodeRaft;
pub use error::BinderError;
pub use network::AddressBook;
pub use network::GrpcNetwork;
