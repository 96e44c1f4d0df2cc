pub mod chain_client;
pub mod keyed_lock;
pub mod logging;

pub use chain_client::{ChainClient, ChainError, EthersChainClient, RpcPolicy};
pub use keyed_lock::KeyedLock;
