//! Shared fixtures: sample quotes, a scripted aggregator and a fake signer

use crate::aggregator::{Aggregator, ExchangeRateUpdate, ExecutionHooks};
use crate::error::{EngineError, EngineResult};
use crate::signer::{Signer, SignerProvider};
use crate::types::{
    Action, BridgeStatus, ChainInfo, Estimate, FeeCost, GasCost, ProcessStatus, ProcessType,
    QuoteRequest, QuoteResponse, Route, StatusRequest, Step, StepStatus, StepType, Token,
    ToolDetails, TransactionRequest, NATIVE_TOKEN_ADDRESSES,
};

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// First anvil development account
pub const TEST_ACCOUNT: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
pub const USDC_MAINNET: &str = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";
pub const LIFI_DIAMOND: &str = "0x1231DEB6f5749EF6cE6943a275A1D3E7486F4EaE";

const DEFAULT_BRIDGES: [(&str, f64); 5] = [
    ("stargateV2", 180.0),
    ("across", 60.0),
    ("hop", 300.0),
    ("cbridge", 600.0),
    ("mayan", 900.0),
];

const DEFAULT_EXCHANGES: [(&str, f64); 4] = [
    ("1inch", 30.0),
    ("paraswap", 30.0),
    ("0x", 30.0),
    ("sushiswap", 30.0),
];

pub fn usdc(chain_id: u64) -> Token {
    Token {
        address: USDC_MAINNET.to_string(),
        chain_id,
        symbol: "USDC".to_string(),
        decimals: 6,
        name: Some("USD Coin".to_string()),
        price_usd: Some("1.00".to_string()),
    }
}

pub fn native(chain_id: u64) -> Token {
    Token {
        address: NATIVE_TOKEN_ADDRESSES[0].to_string(),
        chain_id,
        symbol: if chain_id == 5000 { "MNT" } else { "ETH" }.to_string(),
        decimals: 18,
        name: None,
        price_usd: None,
    }
}

fn action(from: Token, to: Token, amount: &str) -> Action {
    Action {
        from_chain_id: from.chain_id,
        to_chain_id: to.chain_id,
        from_token: from,
        to_token: to,
        from_amount: amount.to_string(),
        from_address: TEST_ACCOUNT.to_string(),
        to_address: TEST_ACCOUNT.to_string(),
        slippage: 0.0075,
    }
}

/// Upstream-shaped quote step: fee collection followed by the swap or bridge
pub fn sample_step(from_chain: u64, to_chain: u64, tool: &str, to_amount: u128, duration: f64) -> Step {
    let from_token = usdc(from_chain);
    let to_token = native(to_chain);
    let cross = from_chain != to_chain;

    let fee_step = Step {
        id: "fee".to_string(),
        step_type: StepType::Protocol,
        tool: "feeCollection".to_string(),
        tool_details: None,
        action: action(from_token.clone(), from_token.clone(), "100000000"),
        estimate: None,
        included_steps: Vec::new(),
        transaction_request: None,
        execution: None,
    };
    let main_step = Step {
        id: format!("{}-leg", tool),
        step_type: if cross { StepType::Cross } else { StepType::Swap },
        tool: tool.to_string(),
        tool_details: None,
        action: action(from_token.clone(), to_token.clone(), "99750000"),
        estimate: None,
        included_steps: Vec::new(),
        transaction_request: None,
        execution: None,
    };

    let estimate = Estimate {
        tool: tool.to_string(),
        from_amount: "100000000".to_string(),
        to_amount: to_amount.to_string(),
        to_amount_min: (to_amount / 1000 * 993).to_string(),
        approval_address: Some(LIFI_DIAMOND.to_string()),
        execution_duration: duration,
        fee_costs: vec![
            FeeCost {
                name: "LIFI Fixed Fee".to_string(),
                description: None,
                percentage: Some("0.0025".to_string()),
                token: from_token.clone(),
                amount: "250000".to_string(),
                amount_usd: Some("0.25".to_string()),
                included: true,
            },
            FeeCost {
                name: "Bridge Fee".to_string(),
                description: None,
                percentage: None,
                token: from_token.clone(),
                amount: "400000".to_string(),
                amount_usd: Some("0.40".to_string()),
                included: true,
            },
        ],
        gas_costs: vec![GasCost {
            kind: "SEND".to_string(),
            price: None,
            estimate: None,
            limit: Some("0x4c4b4".to_string()),
            amount: "1200000000000000".to_string(),
            amount_usd: Some("3.10".to_string()),
            token: native(from_chain),
        }],
        from_amount_usd: Some("100.00".to_string()),
        to_amount_usd: Some("99.10".to_string()),
    };

    Step {
        id: format!("quote-{}", tool),
        step_type: StepType::Lifi,
        tool: tool.to_string(),
        tool_details: Some(ToolDetails {
            key: tool.to_string(),
            name: tool.to_string(),
            logo_uri: None,
        }),
        action: action(from_token, to_token, "100000000"),
        estimate: Some(estimate),
        included_steps: vec![fee_step, main_step],
        transaction_request: Some(TransactionRequest {
            from: None,
            to: LIFI_DIAMOND.to_string(),
            data: "0xabcdef".to_string(),
            value: Some("0x0".to_string()),
            gas_limit: Some("0x4c4b4".to_string()),
            gas_price: None,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            chain_id: Some(from_chain),
        }),
        execution: None,
    }
}

/// Fresh USDC -> native quote from `TEST_ACCOUNT`
pub fn sample_quote(from_chain: u64, to_chain: u64) -> QuoteResponse {
    let tool = if from_chain == to_chain { "1inch" } else { "stargateV2" };
    let mut quote = QuoteResponse::from_step(sample_step(
        from_chain,
        to_chain,
        tool,
        152_000_000_000_000_000_000,
        180.0,
    ));
    quote.id = format!("quote-{}-{}", from_chain, to_chain);
    quote
}

/// What the next `execute_route` call does
#[derive(Debug, Clone)]
pub enum ExecutePlan {
    Succeed,
    Fail(String),
    /// Offer the output scaled by this ratio through the hooks first
    RateChange(f64),
    /// Ask the hooks for a signer on this chain first
    SwitchChain(u64),
    /// Sleep before succeeding
    Delay(Duration),
    /// Report the broadcast hash, then wait this long for confirmation
    SlowConfirmation(Duration),
}

/// Scripted stand-in for the upstream aggregator
pub struct FakeAggregator {
    quote_calls: AtomicUsize,
    execute_calls: AtomicUsize,
    status_calls: AtomicUsize,
    next_id: AtomicU64,
    quote_errors: Mutex<VecDeque<EngineError>>,
    plans: Mutex<VecDeque<ExecutePlan>>,
    statuses: Mutex<VecDeque<BridgeStatus>>,
    default_status: Mutex<BridgeStatus>,
    status_delay: Mutex<Option<Duration>>,
    failing_tools: Mutex<HashSet<String>>,
    executed_routes: Mutex<Vec<Route>>,
}

impl FakeAggregator {
    pub fn new() -> Self {
        Self {
            quote_calls: AtomicUsize::new(0),
            execute_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            quote_errors: Mutex::new(VecDeque::new()),
            plans: Mutex::new(VecDeque::new()),
            statuses: Mutex::new(VecDeque::new()),
            default_status: Mutex::new(BridgeStatus::pending()),
            status_delay: Mutex::new(None),
            failing_tools: Mutex::new(HashSet::new()),
            executed_routes: Mutex::new(Vec::new()),
        }
    }

    pub fn quote_calls(&self) -> usize {
        self.quote_calls.load(Ordering::SeqCst)
    }

    pub fn execute_calls(&self) -> usize {
        self.execute_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn push_quote_error(&self, error: EngineError) {
        self.quote_errors.lock().unwrap().push_back(error);
    }

    pub fn push_plan(&self, plan: ExecutePlan) {
        self.plans.lock().unwrap().push_back(plan);
    }

    pub fn push_status(&self, status: BridgeStatus) {
        self.statuses.lock().unwrap().push_back(status);
    }

    pub fn set_default_status(&self, status: BridgeStatus) {
        *self.default_status.lock().unwrap() = status;
    }

    /// Every status lookup hangs this long before answering
    pub fn set_status_delay(&self, delay: Duration) {
        *self.status_delay.lock().unwrap() = Some(delay);
    }

    /// Every route using this tool fails on execution
    pub fn fail_tool(&self, tool: &str) {
        self.failing_tools.lock().unwrap().insert(tool.to_lowercase());
    }

    pub fn executed_routes(&self) -> Vec<Route> {
        self.executed_routes.lock().unwrap().clone()
    }

    fn next_hash(&self) -> String {
        format!("0x{:064x}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn pick_tool(request: &QuoteRequest) -> (String, usize, f64) {
        let cross = request.is_cross_chain();
        let defaults: &[(&str, f64)] = if cross {
            &DEFAULT_BRIDGES[..]
        } else {
            &DEFAULT_EXCHANGES[..]
        };
        let (allow, deny) = if cross {
            (&request.allow_bridges, &request.deny_bridges)
        } else {
            (&request.allow_exchanges, &request.deny_exchanges)
        };

        let lookup = |tool: &str| {
            defaults
                .iter()
                .position(|(t, _)| t.eq_ignore_ascii_case(tool))
                .map(|i| (defaults[i].0.to_string(), i, defaults[i].1))
                .unwrap_or_else(|| (tool.to_string(), defaults.len(), 120.0))
        };

        if let Some(tool) = allow.as_ref().and_then(|a| a.first()) {
            return lookup(tool);
        }

        let denied: HashSet<String> = deny
            .iter()
            .flatten()
            .map(|t| t.to_lowercase())
            .collect();
        let tool = defaults
            .iter()
            .map(|(t, _)| *t)
            .find(|t| !denied.contains(&t.to_lowercase()))
            .unwrap_or(defaults[0].0);
        lookup(tool)
    }

    async fn run_plan(&self, plan: ExecutePlan, route: &Route, hooks: &Arc<dyn ExecutionHooks>) -> EngineResult<()> {
        match plan {
            ExecutePlan::Succeed | ExecutePlan::SlowConfirmation(_) => Ok(()),
            ExecutePlan::Fail(message) => Err(EngineError::Execution(message)),
            ExecutePlan::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            ExecutePlan::SwitchChain(chain_id) => hooks.switch_chain(chain_id).await.map(|_| ()),
            ExecutePlan::RateChange(ratio) => {
                let step = route.steps.first();
                let old: f64 = route.to_amount.parse().unwrap_or(0.0);
                let update = ExchangeRateUpdate {
                    step_id: step.map(|s| s.id.clone()).unwrap_or_default(),
                    tool: step.map(|s| s.tool.clone()).unwrap_or_default(),
                    old_to_amount: route.to_amount.clone(),
                    new_to_amount: format!("{:.0}", old * ratio),
                };
                if hooks.accept_exchange_rate_update(&update).await {
                    Ok(())
                } else {
                    Err(EngineError::Execution(format!(
                        "Exchange rate update for step {} was not accepted",
                        update.step_id
                    )))
                }
            }
        }
    }
}

#[async_trait]
impl Aggregator for FakeAggregator {
    async fn get_quote(&self, request: &QuoteRequest) -> EngineResult<Step> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.quote_errors.lock().unwrap().pop_front() {
            return Err(error);
        }

        let (tool, index, duration) = Self::pick_tool(request);
        let to_amount = 152_000_000_000_000_000_000u128 - index as u128 * 1_000_000_000_000_000_000;
        let mut step = sample_step(request.from_chain, request.to_chain, &tool, to_amount, duration);
        step.id = format!("quote-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        step.action.from_amount = request.from_amount.clone();
        step.action.from_address = request.from_address.clone();
        step.action.to_address = request.receiver().to_string();
        if let Some(slippage) = request.slippage {
            step.action.slippage = slippage;
        }
        Ok(step)
    }

    async fn execute_route(
        &self,
        mut route: Route,
        _signer: Arc<dyn Signer>,
        hooks: Arc<dyn ExecutionHooks>,
    ) -> EngineResult<Route> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        self.executed_routes.lock().unwrap().push(route.clone());

        let plan = self
            .plans
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ExecutePlan::Succeed);
        let confirmation = match &plan {
            ExecutePlan::SlowConfirmation(wait) => Some(*wait),
            _ => None,
        };
        self.run_plan(plan, &route, &hooks).await?;

        for index in 0..route.steps.len() {
            if route.steps[index].status() == StepStatus::Done {
                continue;
            }
            if route.steps[index].source_tx_hash().is_some() {
                if route.steps[index].is_cross_chain() {
                    break;
                }
                route.steps[index].set_status(StepStatus::Done);
                continue;
            }
            let tool = route.steps[index].tool.to_lowercase();
            if self.failing_tools.lock().unwrap().contains(&tool) {
                route.steps[index].set_status(StepStatus::Failed);
                hooks.on_route_update(&route).await;
                return Err(EngineError::Execution(format!(
                    "Transaction via {} reverted",
                    route.steps[index].tool
                )));
            }

            let cross = route.steps[index].is_cross_chain();
            let hash = self.next_hash();
            let step = &mut route.steps[index];
            step.set_status(StepStatus::Started);
            let process_type = if cross { ProcessType::CrossChain } else { ProcessType::Swap };
            let process = step.add_process(process_type, ProcessStatus::Pending);
            if let Some(process) = step.process_mut(process) {
                process.tx_hash = Some(hash);
                if !cross {
                    process.status = ProcessStatus::Done;
                }
            }
            step.set_status(if cross { StepStatus::Pending } else { StepStatus::Done });
            hooks.on_route_update(&route).await;
            if let Some(wait) = confirmation {
                tokio::time::sleep(wait).await;
            }

            if cross {
                break;
            }
        }

        Ok(route)
    }

    async fn get_status(&self, _request: &StatusRequest) -> EngineResult<BridgeStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.status_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.statuses.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| self.default_status.lock().unwrap().clone()))
    }

    async fn get_chains(&self) -> EngineResult<Vec<ChainInfo>> {
        Ok(vec![
            ChainInfo {
                id: 1,
                key: "eth".to_string(),
                name: "Ethereum".to_string(),
                chain_type: Some("EVM".to_string()),
                native_token: Some(native(1)),
            },
            ChainInfo {
                id: 5000,
                key: "mnt".to_string(),
                name: "Mantle".to_string(),
                chain_type: Some("EVM".to_string()),
                native_token: Some(native(5000)),
            },
        ])
    }

    async fn get_tokens(&self, chain_id: u64) -> EngineResult<Vec<Token>> {
        Ok(vec![native(chain_id), usdc(chain_id)])
    }
}

/// Signer that hands out sequential hashes without touching a chain
pub struct FakeSigner {
    address: String,
    chain_id: u64,
    sent: Arc<AtomicU64>,
}

impl FakeSigner {
    pub fn new(address: &str, chain_id: u64) -> Self {
        Self {
            address: address.to_string(),
            chain_id,
            sent: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[async_trait]
impl Signer for FakeSigner {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn send_transaction(&self, _tx: &TransactionRequest) -> EngineResult<String> {
        let n = self.sent.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("0x{:064x}", n))
    }

    async fn switch_chain(&self, chain_id: u64) -> EngineResult<Arc<dyn Signer>> {
        Ok(Arc::new(Self {
            address: self.address.clone(),
            chain_id,
            sent: self.sent.clone(),
        }))
    }
}

/// Serves a [`FakeSigner`] for any account, counting lookups
#[derive(Default)]
pub struct FakeSignerProvider {
    lookups: AtomicUsize,
}

impl FakeSignerProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignerProvider for FakeSignerProvider {
    async fn get_signer(&self, address: &str, chain_id: u64) -> EngineResult<Arc<dyn Signer>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeSigner::new(address, chain_id)))
    }
}
