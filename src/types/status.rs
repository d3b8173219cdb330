//! Transfer status and chain metadata returned by the aggregator

use super::quote::Token;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    pub tx_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_chain: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_chain: Option<u64>,
}

impl StatusRequest {
    pub fn new(tx_hash: impl Into<String>) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            bridge: None,
            from_chain: None,
            to_chain: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    NotFound,
    Invalid,
    Pending,
    Done,
    Failed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::NotFound => "NOT_FOUND",
            TransferStatus::Invalid => "INVALID",
            TransferStatus::Pending => "PENDING",
            TransferStatus::Done => "DONE",
            TransferStatus::Failed => "FAILED",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(
            self,
            TransferStatus::Done | TransferStatus::Failed | TransferStatus::Invalid
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferInfo {
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub tx_link: Option<String>,
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub token: Option<Token>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Bridge transfer status keyed by the source transaction hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    pub status: TransferStatus,
    #[serde(default)]
    pub substatus: Option<String>,
    #[serde(default)]
    pub substatus_message: Option<String>,
    #[serde(default)]
    pub sending: Option<TransferInfo>,
    #[serde(default)]
    pub receiving: Option<TransferInfo>,
    #[serde(default)]
    pub tool: Option<String>,
}

impl BridgeStatus {
    pub fn pending() -> Self {
        Self {
            status: TransferStatus::Pending,
            substatus: None,
            substatus_message: None,
            sending: None,
            receiving: None,
            tool: None,
        }
    }

    /// Bridge delivered something other than the requested token
    pub fn is_partial(&self) -> bool {
        self.substatus.as_deref() == Some("PARTIAL")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainInfo {
    pub id: u64,
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub chain_type: Option<String>,
    #[serde(default)]
    pub native_token: Option<Token>,
}
