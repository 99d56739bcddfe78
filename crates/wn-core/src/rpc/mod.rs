//! JSON-RPC 2.0 over line-delimited transport.

pub mod protocol;
pub mod server;

pub use protocol::{RpcId, RpcIncoming};
pub use server::{RpcHandler, RpcServer};
