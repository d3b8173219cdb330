//! Typed request/response shapes shared across the engine
//!
//! Upstream payloads are parsed into these structs at the aggregator
//! boundary; nothing downstream handles raw JSON.

pub mod quote;
pub mod status;
pub mod transaction;

pub use quote::{
    Action, Estimate, FeeCost, GasCost, Process, ProcessStatus, ProcessType, QuoteRequest,
    QuoteResponse, Route, RouteOrder, RouteType, Step, StepExecution, StepStatus, StepType, Token,
    ToolDetails,
};
pub use status::{BridgeStatus, ChainInfo, StatusRequest, TransferInfo, TransferStatus};
pub use transaction::TransactionRequest;

use ethers::types::U256;

/// Zero address and the 0xeeee... sentinel both denote the chain's native asset
pub const NATIVE_TOKEN_ADDRESSES: [&str; 2] = [
    "0x0000000000000000000000000000000000000000",
    "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee",
];

/// Parse an amount given either as decimal or as 0x-prefixed hex
pub fn parse_u256(value: &str) -> Option<U256> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        if hex.is_empty() {
            return Some(U256::zero());
        }
        return U256::from_str_radix(hex, 16).ok();
    }
    U256::from_dec_str(value).ok()
}

/// Parse a USD amount string, treating anything unparsable as zero
pub fn parse_usd(value: Option<&str>) -> f64 {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Convert base units into token units for coarse comparisons
pub fn to_token_units(amount: U256, decimals: u8) -> f64 {
    let raw: f64 = amount.to_string().parse().unwrap_or(f64::MAX);
    raw / 10f64.powi(decimals as i32)
}

pub fn is_evm_address(value: &str) -> bool {
    value.len() == 42
        && value.starts_with("0x")
        && value[2..].chars().all(|c| c.is_ascii_hexdigit())
}
