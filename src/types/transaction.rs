//! Signable transaction shape

use super::parse_u256;
use ethers::types::U256;
use serde::{Deserialize, Serialize};

/// EVM transaction request as produced by the aggregator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub to: String,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub gas_limit: Option<String>,
    #[serde(default)]
    pub gas_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<String>,
    #[serde(default)]
    pub chain_id: Option<u64>,
}

impl TransactionRequest {
    pub fn value_wei(&self) -> U256 {
        self.value
            .as_deref()
            .and_then(parse_u256)
            .unwrap_or_default()
    }

    pub fn gas_limit_units(&self) -> Option<U256> {
        self.gas_limit.as_deref().and_then(parse_u256)
    }

    /// Highest per-gas price this transaction may pay
    pub fn price_per_gas(&self) -> Option<U256> {
        self.max_fee_per_gas
            .as_deref()
            .or(self.gas_price.as_deref())
            .and_then(parse_u256)
    }

    /// Upper bound on the native cost of gas, when a price is known
    pub fn max_gas_cost(&self) -> Option<U256> {
        match (self.gas_limit_units(), self.price_per_gas()) {
            (Some(limit), Some(price)) => limit.checked_mul(price),
            _ => None,
        }
    }

    pub fn has_calldata(&self) -> bool {
        let data = self.data.trim_start_matches("0x");
        !data.is_empty()
    }
}
