//! Quote, route and step shapes

use super::transaction::TransactionRequest;
use super::{parse_u256, parse_usd, NATIVE_TOKEN_ADDRESSES};

use chrono::{DateTime, Utc};
use ethers::types::U256;
use serde::{Deserialize, Serialize};

/// Request for a priced conversion of `from_token` into `to_token`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub from_chain: u64,
    pub to_chain: u64,
    pub from_token: String,
    pub to_token: String,
    /// Amount in the token's base units
    pub from_amount: String,
    pub from_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_address: Option<String>,
    /// Explicit slippage override as a fraction (0.005 = 0.5%)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slippage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_bridges: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny_bridges: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_exchanges: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny_exchanges: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<RouteOrder>,
}

impl QuoteRequest {
    pub fn new(
        from_chain: u64,
        to_chain: u64,
        from_token: impl Into<String>,
        to_token: impl Into<String>,
        from_amount: impl Into<String>,
        from_address: impl Into<String>,
    ) -> Self {
        Self {
            from_chain,
            to_chain,
            from_token: from_token.into(),
            to_token: to_token.into(),
            from_amount: from_amount.into(),
            from_address: from_address.into(),
            to_address: None,
            slippage: None,
            allow_bridges: None,
            deny_bridges: None,
            allow_exchanges: None,
            deny_exchanges: None,
            order: None,
        }
    }

    pub fn is_cross_chain(&self) -> bool {
        self.from_chain != self.to_chain
    }

    /// Receiver, defaulting to the sender
    pub fn receiver(&self) -> &str {
        self.to_address.as_deref().unwrap_or(&self.from_address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RouteOrder {
    Fastest,
    Cheapest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteType {
    SameChain,
    CrossChain,
}

impl RouteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteType::SameChain => "same-chain",
            RouteType::CrossChain => "cross-chain",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub address: String,
    pub chain_id: u64,
    pub symbol: String,
    pub decimals: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "priceUSD", skip_serializing_if = "Option::is_none")]
    pub price_usd: Option<String>,
}

impl Token {
    pub fn is_native(&self) -> bool {
        let address = self.address.to_lowercase();
        NATIVE_TOKEN_ADDRESSES.contains(&address.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDetails {
    pub key: String,
    pub name: String,
    #[serde(default, rename = "logoURI", skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub from_chain_id: u64,
    pub to_chain_id: u64,
    pub from_token: Token,
    pub to_token: Token,
    pub from_amount: String,
    #[serde(default)]
    pub from_address: String,
    #[serde(default)]
    pub to_address: String,
    #[serde(default)]
    pub slippage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeCost {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub percentage: Option<String>,
    pub token: Token,
    pub amount: String,
    #[serde(default, rename = "amountUSD")]
    pub amount_usd: Option<String>,
    #[serde(default)]
    pub included: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasCost {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub estimate: Option<String>,
    #[serde(default)]
    pub limit: Option<String>,
    pub amount: String,
    #[serde(default, rename = "amountUSD")]
    pub amount_usd: Option<String>,
    pub token: Token,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Estimate {
    #[serde(default)]
    pub tool: String,
    pub from_amount: String,
    pub to_amount: String,
    pub to_amount_min: String,
    #[serde(default)]
    pub approval_address: Option<String>,
    /// Seconds
    #[serde(default)]
    pub execution_duration: f64,
    #[serde(default)]
    pub fee_costs: Vec<FeeCost>,
    #[serde(default)]
    pub gas_costs: Vec<GasCost>,
    #[serde(default, rename = "fromAmountUSD")]
    pub from_amount_usd: Option<String>,
    #[serde(default, rename = "toAmountUSD")]
    pub to_amount_usd: Option<String>,
}

impl Estimate {
    pub fn gas_cost_usd(&self) -> f64 {
        self.gas_costs
            .iter()
            .map(|g| parse_usd(g.amount_usd.as_deref()))
            .sum()
    }

    /// Gas limit suggested by the upstream estimate, if any
    pub fn gas_limit(&self) -> Option<U256> {
        self.gas_costs
            .iter()
            .filter_map(|g| g.limit.as_deref().or(g.estimate.as_deref()))
            .filter_map(parse_u256)
            .next()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Swap,
    Cross,
    Lifi,
    Protocol,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Started,
    ActionRequired,
    ChainSwitchRequired,
    Done,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessType {
    TokenAllowance,
    SwitchChain,
    Swap,
    CrossChain,
    ReceivingChain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    Started,
    ActionRequired,
    Pending,
    Done,
    Failed,
    Cancelled,
}

/// One observable sub-operation of a step (approval, swap, bridge send...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    #[serde(rename = "type")]
    pub process_type: ProcessType,
    pub status: ProcessStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl Process {
    pub fn new(process_type: ProcessType, status: ProcessStatus) -> Self {
        Self {
            process_type,
            status,
            tx_hash: None,
            tx_link: None,
            message: None,
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExecution {
    pub status: StepStatus,
    #[serde(default)]
    pub process: Vec<Process>,
}

/// A single swap, bridge or protocol operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub tool: String,
    #[serde(default)]
    pub tool_details: Option<ToolDetails>,
    pub action: Action,
    #[serde(default)]
    pub estimate: Option<Estimate>,
    #[serde(default)]
    pub included_steps: Vec<Step>,
    #[serde(default)]
    pub transaction_request: Option<TransactionRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<StepExecution>,
}

impl Step {
    /// Fee collection is a protocol pseudo-step, never a transaction of its own
    pub fn is_fee_collection(&self) -> bool {
        self.step_type == StepType::Protocol && self.tool.to_lowercase().contains("feecollection")
    }

    /// Swap and bridge steps are the ones that carry their own transaction
    pub fn is_executable(&self) -> bool {
        matches!(self.step_type, StepType::Swap | StepType::Cross | StepType::Lifi)
    }

    pub fn is_cross_chain(&self) -> bool {
        self.action.from_chain_id != self.action.to_chain_id
    }

    pub fn status(&self) -> StepStatus {
        self.execution
            .as_ref()
            .map(|e| e.status)
            .unwrap_or(StepStatus::Pending)
    }

    pub fn set_status(&mut self, status: StepStatus) {
        match self.execution.as_mut() {
            Some(execution) => execution.status = status,
            None => {
                self.execution = Some(StepExecution {
                    status,
                    process: Vec::new(),
                })
            }
        }
    }

    /// Append a process and return its index
    pub fn add_process(&mut self, process_type: ProcessType, status: ProcessStatus) -> usize {
        if self.execution.is_none() {
            self.set_status(StepStatus::Started);
        }
        match self.execution.as_mut() {
            Some(execution) => {
                execution.process.push(Process::new(process_type, status));
                execution.process.len() - 1
            }
            None => 0,
        }
    }

    pub fn process_mut(&mut self, index: usize) -> Option<&mut Process> {
        self.execution
            .as_mut()
            .and_then(|e| e.process.get_mut(index))
    }

    /// Hash of the transaction that moved the funds on the source chain
    pub fn source_tx_hash(&self) -> Option<&str> {
        self.execution.as_ref().and_then(|e| {
            e.process
                .iter()
                .filter(|p| matches!(p.process_type, ProcessType::Swap | ProcessType::CrossChain))
                .find_map(|p| p.tx_hash.as_deref())
        })
    }
}

/// Quote as handed to callers: the upstream step plus local tagging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub route_type: RouteType,
    pub tool: String,
    #[serde(default)]
    pub tool_details: Option<ToolDetails>,
    pub action: Action,
    #[serde(default)]
    pub estimate: Option<Estimate>,
    #[serde(default)]
    pub included_steps: Vec<Step>,
    #[serde(default)]
    pub transaction_request: Option<TransactionRequest>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

impl QuoteResponse {
    /// Wrap an upstream quote step
    pub fn from_step(step: Step) -> Self {
        let route_type = if step.is_cross_chain() {
            RouteType::CrossChain
        } else {
            RouteType::SameChain
        };

        Self {
            id: step.id,
            route_type,
            tool: step.tool,
            tool_details: step.tool_details,
            action: step.action,
            estimate: step.estimate,
            included_steps: step.included_steps,
            transaction_request: step.transaction_request,
            tags: Vec::new(),
            fetched_at: Utc::now(),
        }
    }

    /// The quote itself as an executable step
    pub fn to_step(&self) -> Step {
        Step {
            id: self.id.clone(),
            step_type: StepType::Lifi,
            tool: self.tool.clone(),
            tool_details: self.tool_details.clone(),
            action: self.action.clone(),
            estimate: self.estimate.clone(),
            included_steps: self.included_steps.clone(),
            transaction_request: self.transaction_request.clone(),
            execution: None,
        }
    }

    pub fn is_cross_chain(&self) -> bool {
        self.action.from_chain_id != self.action.to_chain_id
    }

    pub fn to_amount(&self) -> U256 {
        self.estimate
            .as_ref()
            .and_then(|e| parse_u256(&e.to_amount))
            .unwrap_or_default()
    }

    pub fn to_amount_min(&self) -> U256 {
        self.estimate
            .as_ref()
            .and_then(|e| parse_u256(&e.to_amount_min))
            .unwrap_or_default()
    }

    /// Expected duration in seconds
    pub fn execution_duration(&self) -> f64 {
        self.estimate
            .as_ref()
            .map(|e| e.execution_duration)
            .unwrap_or_default()
    }

    pub fn gas_cost_usd(&self) -> f64 {
        self.estimate
            .as_ref()
            .map(|e| e.gas_cost_usd())
            .unwrap_or_default()
    }

    pub fn fee_costs(&self) -> &[FeeCost] {
        self.estimate
            .as_ref()
            .map(|e| e.fee_costs.as_slice())
            .unwrap_or_default()
    }

    /// Number of user-visible steps, fee collection excluded
    pub fn step_count(&self) -> usize {
        self.included_steps
            .iter()
            .filter(|s| !s.is_fee_collection())
            .count()
            .max(1)
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.fetched_at)
    }
}

/// Ordered steps submitted to the aggregator for execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub id: String,
    pub from_chain_id: u64,
    pub to_chain_id: u64,
    pub from_amount: String,
    pub to_amount: String,
    pub from_address: String,
    pub to_address: String,
    pub steps: Vec<Step>,
}

impl Route {
    pub fn is_cross_chain(&self) -> bool {
        self.from_chain_id != self.to_chain_id
    }

    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status() == StepStatus::Done)
            .count()
    }

    /// First source-chain transaction hash recorded on any step
    pub fn source_tx_hash(&self) -> Option<String> {
        self.steps
            .iter()
            .find_map(|s| s.source_tx_hash().map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIFI_QUOTE: &str = r#"{
        "id": "0x7a3c",
        "type": "lifi",
        "tool": "stargateV2",
        "toolDetails": {"key": "stargateV2", "name": "StargateV2", "logoURI": "https://x/stargate.png"},
        "action": {
            "fromChainId": 1,
            "toChainId": 5000,
            "fromToken": {"address": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", "chainId": 1, "symbol": "USDC", "decimals": 6, "priceUSD": "1.00"},
            "toToken": {"address": "0x0000000000000000000000000000000000000000", "chainId": 5000, "symbol": "MNT", "decimals": 18},
            "fromAmount": "100000000",
            "fromAddress": "0x1111111111111111111111111111111111111111",
            "toAddress": "0x1111111111111111111111111111111111111111",
            "slippage": 0.0075
        },
        "estimate": {
            "tool": "stargateV2",
            "fromAmount": "100000000",
            "toAmount": "152000000000000000000",
            "toAmountMin": "150860000000000000000",
            "approvalAddress": "0x1231DEB6f5749EF6cE6943a275A1D3E7486F4EaE",
            "executionDuration": 180,
            "feeCosts": [{"name": "LIFI Fixed Fee", "token": {"address": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", "chainId": 1, "symbol": "USDC", "decimals": 6}, "amount": "250000", "amountUSD": "0.25", "included": true}],
            "gasCosts": [{"type": "SEND", "limit": "0x4c4b4", "amount": "1200000000000000", "amountUSD": "3.10", "token": {"address": "0x0000000000000000000000000000000000000000", "chainId": 1, "symbol": "ETH", "decimals": 18}}],
            "fromAmountUSD": "100.00",
            "toAmountUSD": "99.10"
        },
        "includedSteps": [
            {"id": "fee", "type": "protocol", "tool": "feeCollection", "action": {"fromChainId": 1, "toChainId": 1, "fromToken": {"address": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", "chainId": 1, "symbol": "USDC", "decimals": 6}, "toToken": {"address": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", "chainId": 1, "symbol": "USDC", "decimals": 6}, "fromAmount": "100000000"}},
            {"id": "bridge", "type": "cross", "tool": "stargateV2", "action": {"fromChainId": 1, "toChainId": 5000, "fromToken": {"address": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", "chainId": 1, "symbol": "USDC", "decimals": 6}, "toToken": {"address": "0x0000000000000000000000000000000000000000", "chainId": 5000, "symbol": "MNT", "decimals": 18}, "fromAmount": "99750000"}}
        ],
        "transactionRequest": {"to": "0x1231DEB6f5749EF6cE6943a275A1D3E7486F4EaE", "data": "0xabcdef", "value": "0x0", "gasLimit": "0x4c4b4", "chainId": 1}
    }"#;

    #[test]
    fn upstream_quote_parses_into_typed_step() {
        let step: Step = serde_json::from_str(LIFI_QUOTE).unwrap();
        assert_eq!(step.step_type, StepType::Lifi);
        assert_eq!(step.included_steps.len(), 2);
        assert!(step.included_steps[0].is_fee_collection());
        assert!(step.included_steps[1].is_executable());

        let quote = QuoteResponse::from_step(step);
        assert_eq!(quote.route_type, RouteType::CrossChain);
        assert_eq!(quote.step_count(), 1);
        assert!(quote.to_amount() > U256::zero());
        assert!((quote.gas_cost_usd() - 3.10).abs() < 1e-9);
        assert!(!quote.action.from_token.is_native());
        assert!(quote.action.to_token.is_native());
    }

    #[test]
    fn route_type_serializes_kebab_case() {
        let step: Step = serde_json::from_str(LIFI_QUOTE).unwrap();
        let quote = QuoteResponse::from_step(step);
        let json = serde_json::to_value(&quote).unwrap();
        assert_eq!(json["type"], "cross-chain");
    }

    #[test]
    fn estimate_gas_limit_reads_hex_limit() {
        let step: Step = serde_json::from_str(LIFI_QUOTE).unwrap();
        let limit = step.estimate.unwrap().gas_limit().unwrap();
        assert_eq!(limit, U256::from(0x4c4b4u64));
    }
}
