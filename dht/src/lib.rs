//! Iterative Kademlia-style node/value lookup and registration over UDP, for NAT-tolerant peer
//! discovery. See [`engine::Dht`] for the actor that ties the lookup engine, request handlers,
//! and registration loop together.

pub mod collab;
pub mod directory;
mod engine;
mod handlers;
pub mod id;
pub mod nat;
pub mod node;
pub mod peers;
pub mod query;
mod register;
pub mod routing;
pub mod wire;

pub use engine::Dht;
pub use register::REGISTER_TIMEOUT;
