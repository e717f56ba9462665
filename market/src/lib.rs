pub mod abi;
pub mod chains;
pub mod config;
pub mod contracts;
pub mod http_pool;
pub mod indexer;
pub mod metadata;
pub mod notify;
pub mod oracle;
pub mod orchestrator;
pub mod rpc;
pub mod saga;
pub mod validation;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use chains::*;
pub use config::*;
pub use contracts::*;
pub use indexer::*;
pub use metadata::*;
pub use notify::*;
pub use oracle::*;
pub use orchestrator::*;
pub use rpc::*;
pub use saga::*;
pub use validation::*;
