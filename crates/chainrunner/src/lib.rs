//! Drives a local cluster of blockchain node processes: bootstrap a chain, start and kill nodes,
//! and wait on what their logs say about block production and finality.

pub mod async_helpers;
pub mod chain;
pub mod error;
pub mod flags;
pub mod keys;
pub mod log_scan;
pub mod maintenance;
pub mod node;
pub mod process;
pub mod rpc;
pub mod wait;

pub use chain::{Chain, NodeSelection};
pub use error::ChainError;
pub use flags::{FlagName, FlagRule, FlagSet, Flags, Seq};
pub use keys::generate_keys;
pub use log_scan::BlockHeights;
pub use node::{Node, NodeState, Role};
pub use rpc::RpcResponse;
pub use wait::FinalizationWait;
