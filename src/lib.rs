//! xchain-router - cross-chain swap and bridge orchestration
//!
//! Quotes routes through an aggregator, executes them on the source chain,
//! follows bridge transfers to the destination chain and falls back to
//! alternative routes when a transfer fails before funds move.

pub mod aggregator;
pub mod chain;
pub mod config;
pub mod cross_chain;
pub mod error;
pub mod execution;
pub mod history;
pub mod maintenance;
pub mod metrics;
pub mod quote;
pub mod rate_limit;
pub mod registry;
pub mod services;
pub mod signer;
pub mod store;
pub mod tx;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{EngineError, EngineResult};
pub use services::Services;
