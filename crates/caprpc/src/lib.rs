//! # caprpc
//!
//! Capability-passing RPC over the `capwire` codec.
//!
//! A server exposes one root value. A client names what it wants as a chain
//! of property reads and calls on that root; the server walks the chain and
//! answers with the result. Live objects in a result stay on the server,
//! stored in the connection's heap, and the client receives a [`Remote`]
//! handle that later chains can start from.

pub mod capability;
pub mod chain;
pub mod channel;
pub mod client;
pub mod envelope;
pub mod error;
pub mod heap;
pub mod resolve;
pub mod server;
pub mod transport;


pub use capwire;

pub use chain::Argument;
pub use chain::ChainOp;
pub use chain::ChainRef;
pub use channel::ChannelTransport;
pub use client::Remote;
pub use client::RpcClient;
pub use error::Error;
pub use error::Result;
pub use heap::Heap;
pub use resolve::Resolver;
pub use server::RpcServer;
pub use transport::Transport;
pub use transport::TransportError;
