//! Signing capability consumed by the engine
//!
//! The engine only ever sees these traits; key material stays inside the
//! implementation.

mod wallet;

pub use wallet::{WalletSigner, WalletSignerProvider};

use crate::error::EngineResult;
use crate::types::TransactionRequest;

use async_trait::async_trait;
use std::sync::Arc;

/// An account bound to one chain that can sign and broadcast
#[async_trait]
pub trait Signer: Send + Sync {
    fn address(&self) -> String;

    fn chain_id(&self) -> u64;

    /// Sign and broadcast, returning the transaction hash
    async fn send_transaction(&self, tx: &TransactionRequest) -> EngineResult<String>;

    /// Signer for the same account on another chain, ready to send
    async fn switch_chain(&self, chain_id: u64) -> EngineResult<Arc<dyn Signer>>;
}

/// Looks up the signer for an account
#[async_trait]
pub trait SignerProvider: Send + Sync {
    async fn get_signer(&self, address: &str, chain_id: u64) -> EngineResult<Arc<dyn Signer>>;
}
