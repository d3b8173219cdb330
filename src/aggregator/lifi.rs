//! LI.FI REST client
//!
//! Quotes, step transactions, transfer status and chain/token metadata come
//! from the public LI.FI API. Route execution walks the steps locally:
//! chain switch, rate check, allowance, broadcast, confirmation.

use super::{Aggregator, ExchangeRateUpdate, ExecutionHooks};
use crate::chain::ChainRpc;
use crate::config::AggregatorConfig;
use crate::error::{EngineError, EngineResult};
use crate::signer::Signer;
use crate::tx::approval::encode_approve;
use crate::types::{
    parse_u256, BridgeStatus, ChainInfo, ProcessStatus, ProcessType, QuoteRequest, Route,
    StatusRequest, Step, StepStatus, Token, TransactionRequest,
};

use async_trait::async_trait;
use ethers::types::{Address, H256};
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct ChainsResponse {
    chains: Vec<ChainInfo>,
}

#[derive(Debug, Deserialize)]
struct TokensResponse {
    tokens: HashMap<String, Vec<Token>>,
}

/// LI.FI aggregator client
pub struct LifiClient {
    client: Client,
    config: AggregatorConfig,
    chain: Arc<dyn ChainRpc>,
}

impl LifiClient {
    pub fn new(config: AggregatorConfig, chain: Arc<dyn ChainRpc>) -> EngineResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("Accept", HeaderValue::from_static("application/json"));
        if let Some(api_key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(api_key)
                .map_err(|e| EngineError::Config(format!("Invalid LI.FI API key: {}", e)))?;
            headers.insert("x-lifi-api-key", value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            chain,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> EngineResult<T> {
        let url = self.url(path);
        debug!("GET {} {:?}", url, query);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(map_request_error)?;

        decode(check_status(response).await?).await
    }

    /// Fresh transaction data and estimate for one step
    async fn step_transaction(&self, step: &Step) -> EngineResult<Step> {
        let mut body = step.clone();
        body.execution = None;

        let response = self
            .client
            .post(self.url("advanced/stepTransaction"))
            .json(&body)
            .send()
            .await
            .map_err(map_request_error)?;

        decode(check_status(response).await?).await
    }

    /// Approve the spender for the step amount when the current allowance is short
    async fn ensure_allowance(
        &self,
        route: &mut Route,
        index: usize,
        signer: &Arc<dyn Signer>,
        hooks: &Arc<dyn ExecutionHooks>,
    ) -> EngineResult<()> {
        let step = &route.steps[index];
        if step.action.from_token.is_native() {
            return Ok(());
        }
        let Some(spender) = step.estimate.as_ref().and_then(|e| e.approval_address.clone()) else {
            return Ok(());
        };

        let chain_id = step.action.from_chain_id;
        let amount = parse_u256(&step.action.from_amount).ok_or_else(|| {
            EngineError::Validation(format!("Invalid step amount {}", step.action.from_amount))
        })?;
        let token_address = step.action.from_token.address.clone();
        let token = parse_address(&token_address)?;
        let owner = parse_address(&signer.address())?;
        let spender_address = parse_address(&spender)?;

        let allowance = self
            .chain
            .token_allowance(chain_id, token, owner, spender_address)
            .await?;
        if allowance >= amount {
            debug!("Allowance for {} on chain {} already sufficient", token_address, chain_id);
            return Ok(());
        }

        let process = route.steps[index].add_process(ProcessType::TokenAllowance, ProcessStatus::Started);
        hooks.on_route_update(route).await;

        let approval = TransactionRequest {
            from: Some(signer.address()),
            to: token_address,
            data: encode_approve(&spender, amount)?,
            value: Some("0".to_string()),
            chain_id: Some(chain_id),
            ..Default::default()
        };

        let tx_hash = signer.send_transaction(&approval).await?;
        info!("Approval {} sent on chain {} for spender {}", tx_hash, chain_id, spender);
        if let Some(p) = route.steps[index].process_mut(process) {
            p.tx_hash = Some(tx_hash.clone());
            p.status = ProcessStatus::Pending;
        }
        hooks.on_route_update(route).await;

        self.wait_for_confirmation(chain_id, &tx_hash).await?;

        if let Some(p) = route.steps[index].process_mut(process) {
            p.status = ProcessStatus::Done;
        }
        hooks.on_route_update(route).await;
        Ok(())
    }

    /// Poll the receipt until mined, reverted, or the confirmation timeout
    async fn wait_for_confirmation(&self, chain_id: u64, tx_hash: &str) -> EngineResult<()> {
        let hash: H256 = tx_hash
            .parse()
            .map_err(|e| EngineError::Execution(format!("Invalid tx hash {}: {}", tx_hash, e)))?;
        let deadline = Instant::now() + Duration::from_secs(self.config.confirmation_timeout_secs);
        let interval = Duration::from_millis(self.config.status_poll_interval_ms);

        loop {
            match self.chain.transaction_status(chain_id, hash).await {
                Ok(Some(true)) => return Ok(()),
                Ok(Some(false)) => {
                    return Err(EngineError::Execution(format!(
                        "Transaction {} reverted on chain {}",
                        tx_hash, chain_id
                    )))
                }
                Ok(None) => {}
                Err(e) => warn!("Receipt lookup for {} failed: {}", tx_hash, e),
            }

            if Instant::now() >= deadline {
                return Err(EngineError::Timeout {
                    operation: format!("confirmation of {}", tx_hash),
                });
            }
            sleep(interval).await;
        }
    }

    async fn execute_step(
        &self,
        route: &mut Route,
        index: usize,
        signer: &mut Arc<dyn Signer>,
        hooks: &Arc<dyn ExecutionHooks>,
    ) -> EngineResult<()> {
        let chain_id = route.steps[index].action.from_chain_id;

        if signer.chain_id() != chain_id {
            route.steps[index].set_status(StepStatus::ChainSwitchRequired);
            let process =
                route.steps[index].add_process(ProcessType::SwitchChain, ProcessStatus::ActionRequired);
            hooks.on_route_update(route).await;

            *signer = hooks.switch_chain(chain_id).await?;

            if let Some(p) = route.steps[index].process_mut(process) {
                p.status = ProcessStatus::Done;
            }
        }

        route.steps[index].set_status(StepStatus::Started);
        hooks.on_route_update(route).await;

        let prepared = self.step_transaction(&route.steps[index]).await?;

        let old_to_amount = route.steps[index]
            .estimate
            .as_ref()
            .map(|e| e.to_amount.clone())
            .unwrap_or_default();
        let new_to_amount = prepared
            .estimate
            .as_ref()
            .map(|e| e.to_amount.clone())
            .unwrap_or_default();

        let update = ExchangeRateUpdate {
            step_id: route.steps[index].id.clone(),
            tool: route.steps[index].tool.clone(),
            old_to_amount,
            new_to_amount,
        };
        if update.decrease() > 0.0 {
            route.steps[index].set_status(StepStatus::ActionRequired);
            hooks.on_route_update(route).await;

            if !hooks.accept_exchange_rate_update(&update).await {
                return Err(EngineError::Execution(format!(
                    "Exchange rate update for step {} was not accepted ({:.2}% less output)",
                    update.step_id,
                    update.decrease() * 100.0
                )));
            }
            route.steps[index].set_status(StepStatus::Started);
        }

        route.steps[index].estimate = prepared.estimate;
        route.steps[index].transaction_request = prepared.transaction_request;

        self.ensure_allowance(route, index, signer, hooks).await?;

        let tx = route.steps[index].transaction_request.clone().ok_or_else(|| {
            EngineError::Config(format!(
                "Step {} has no transaction request",
                route.steps[index].id
            ))
        })?;

        let is_bridge = route.steps[index].is_cross_chain();
        let process_type = if is_bridge {
            ProcessType::CrossChain
        } else {
            ProcessType::Swap
        };
        let process = route.steps[index].add_process(process_type, ProcessStatus::Started);
        hooks.on_route_update(route).await;

        let tx_hash = signer.send_transaction(&tx).await?;
        if let Some(p) = route.steps[index].process_mut(process) {
            p.tx_hash = Some(tx_hash.clone());
            p.status = ProcessStatus::Pending;
        }
        route.steps[index].set_status(StepStatus::Pending);
        hooks.on_route_update(route).await;

        if is_bridge {
            info!(
                "Bridge step {} broadcast on chain {}: {}",
                route.steps[index].id, chain_id, tx_hash
            );
            return Ok(());
        }

        self.wait_for_confirmation(chain_id, &tx_hash).await?;
        if let Some(p) = route.steps[index].process_mut(process) {
            p.status = ProcessStatus::Done;
        }
        route.steps[index].set_status(StepStatus::Done);
        hooks.on_route_update(route).await;
        Ok(())
    }
}

#[async_trait]
impl Aggregator for LifiClient {
    async fn get_quote(&self, request: &QuoteRequest) -> EngineResult<Step> {
        let query = quote_query(request, &self.config.integrator);
        self.get_json("quote", &query).await
    }

    async fn execute_route(
        &self,
        route: Route,
        signer: Arc<dyn Signer>,
        hooks: Arc<dyn ExecutionHooks>,
    ) -> EngineResult<Route> {
        let mut route = route;
        let mut signer = signer;

        for index in 0..route.steps.len() {
            if matches!(route.steps[index].status(), StepStatus::Done) {
                continue;
            }

            // Already broadcast on an earlier attempt: never send twice
            if let Some(tx_hash) = route.steps[index].source_tx_hash().map(str::to_string) {
                if route.steps[index].is_cross_chain() {
                    route.steps[index].set_status(StepStatus::Pending);
                    hooks.on_route_update(&route).await;
                    break;
                }

                let chain_id = route.steps[index].action.from_chain_id;
                debug!("Resuming step {} at confirmation of {}", route.steps[index].id, tx_hash);
                if let Err(e) = self.wait_for_confirmation(chain_id, &tx_hash).await {
                    route.steps[index].set_status(StepStatus::Failed);
                    hooks.on_route_update(&route).await;
                    return Err(e);
                }
                route.steps[index].set_status(StepStatus::Done);
                hooks.on_route_update(&route).await;
                continue;
            }

            if let Err(e) = self.execute_step(&mut route, index, &mut signer, &hooks).await {
                route.steps[index].set_status(StepStatus::Failed);
                hooks.on_route_update(&route).await;
                return Err(e);
            }

            if route.steps[index].is_cross_chain() {
                break;
            }
        }

        Ok(route)
    }

    async fn get_status(&self, request: &StatusRequest) -> EngineResult<BridgeStatus> {
        let mut query = vec![("txHash", request.tx_hash.clone())];
        if let Some(bridge) = &request.bridge {
            query.push(("bridge", bridge.clone()));
        }
        if let Some(from_chain) = request.from_chain {
            query.push(("fromChain", from_chain.to_string()));
        }
        if let Some(to_chain) = request.to_chain {
            query.push(("toChain", to_chain.to_string()));
        }

        self.get_json("status", &query).await
    }

    async fn get_chains(&self) -> EngineResult<Vec<ChainInfo>> {
        let response: ChainsResponse = self.get_json("chains", &[]).await?;
        Ok(response.chains)
    }

    async fn get_tokens(&self, chain_id: u64) -> EngineResult<Vec<Token>> {
        let mut response: TokensResponse = self
            .get_json("tokens", &[("chains", chain_id.to_string())])
            .await?;
        Ok(response
            .tokens
            .remove(&chain_id.to_string())
            .unwrap_or_default())
    }
}

fn parse_address(value: &str) -> EngineResult<Address> {
    value
        .parse()
        .map_err(|e| EngineError::Validation(format!("Invalid address {}: {}", value, e)))
}

/// Query string for `GET /quote`
fn quote_query(request: &QuoteRequest, integrator: &str) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("fromChain", request.from_chain.to_string()),
        ("toChain", request.to_chain.to_string()),
        ("fromToken", request.from_token.clone()),
        ("toToken", request.to_token.clone()),
        ("fromAmount", request.from_amount.clone()),
        ("fromAddress", request.from_address.clone()),
        ("toAddress", request.receiver().to_string()),
        ("integrator", integrator.to_string()),
    ];

    if let Some(slippage) = request.slippage {
        query.push(("slippage", slippage.to_string()));
    }

    let lists = [
        ("allowBridges", &request.allow_bridges),
        ("denyBridges", &request.deny_bridges),
        ("allowExchanges", &request.allow_exchanges),
        ("denyExchanges", &request.deny_exchanges),
    ];
    for (name, list) in lists {
        if let Some(values) = list {
            if !values.is_empty() {
                query.push((name, values.join(",")));
            }
        }
    }

    if let Some(order) = request.order {
        let order = match order {
            crate::types::RouteOrder::Fastest => "FASTEST",
            crate::types::RouteOrder::Cheapest => "CHEAPEST",
        };
        query.push(("order", order.to_string()));
    }

    query
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: String) -> EngineError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        EngineError::RateLimited { retry_after }
    } else if status.is_server_error() {
        EngineError::Transient(format!("LI.FI returned {}: {}", status, body))
    } else {
        EngineError::Upstream {
            status: status.as_u16(),
            message: body,
        }
    }
}

async fn check_status(response: Response) -> EngineResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, retry_after, body))
}

async fn decode<T: DeserializeOwned>(response: Response) -> EngineResult<T> {
    response.json::<T>().await.map_err(|e| EngineError::Upstream {
        status: 200,
        message: format!("Failed to parse LI.FI response: {}", e),
    })
}

fn map_request_error(e: reqwest::Error) -> EngineError {
    if e.is_timeout() {
        EngineError::Timeout {
            operation: "LI.FI request".to_string(),
        }
    } else {
        EngineError::Transient(format!("network error calling LI.FI: {}", e))
    }
}
