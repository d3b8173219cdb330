//! Alternative routes after a failed attempt

use super::{CrossChainExecutionResult, CrossChainStatus};
use crate::error::EngineResult;
use crate::quote::{ComparisonOptions, QuoteManager};
use crate::types::{QuoteRequest, QuoteResponse};

use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct FallbackRoute {
    pub quote: QuoteResponse,
    /// `max_fallbacks - index`; higher runs first
    pub priority: i64,
}

#[derive(Debug, Clone)]
pub struct FallbackOutcome {
    pub result: CrossChainExecutionResult,
    /// Routes tried, primary included
    pub attempts: usize,
    /// Tool of the fallback that produced `result`, `None` for the primary
    pub fallback_tool: Option<String>,
}

pub struct FallbackRouter {
    quotes: Arc<QuoteManager>,
}

impl FallbackRouter {
    pub fn new(quotes: Arc<QuoteManager>) -> Self {
        Self { quotes }
    }

    /// Compared quotes without the failed tool, highest priority first
    pub async fn generate_fallback_routes(
        &self,
        original: &QuoteRequest,
        failed_tool: &str,
        max_fallbacks: usize,
    ) -> EngineResult<Vec<FallbackRoute>> {
        if max_fallbacks == 0 {
            return Ok(Vec::new());
        }

        let options = ComparisonOptions {
            max_quotes: Some(max_fallbacks),
            exclude_tools: vec![failed_tool.to_string()],
        };
        let comparison = self.quotes.get_quote_comparison(original, &options).await?;

        let mut routes: Vec<FallbackRoute> = comparison
            .quotes
            .into_iter()
            .filter(|q| !q.tool.eq_ignore_ascii_case(failed_tool))
            .take(max_fallbacks)
            .enumerate()
            .map(|(index, quote)| FallbackRoute {
                quote,
                priority: max_fallbacks as i64 - index as i64,
            })
            .collect();
        routes.sort_by(|a, b| b.priority.cmp(&a.priority));

        info!(
            "Generated {} fallback routes excluding {}",
            routes.len(),
            failed_tool
        );
        Ok(routes)
    }

    /// Run the primary route, then fallbacks in priority order until one succeeds.
    ///
    /// A failure after source funds were committed ends the search: another
    /// route would spend them twice. When everything fails the last failure
    /// is returned.
    pub async fn execute_route_with_fallback<F, Fut>(
        &self,
        original: &QuoteRequest,
        primary: QuoteResponse,
        max_fallbacks: usize,
        mut attempt: F,
    ) -> FallbackOutcome
    where
        F: FnMut(QuoteResponse, usize) -> Fut,
        Fut: Future<Output = CrossChainExecutionResult>,
    {
        let failed_tool = primary.tool.clone();
        let result = attempt(primary, 0).await;
        if !can_fall_back(&result) {
            return FallbackOutcome {
                result,
                attempts: 1,
                fallback_tool: None,
            };
        }

        let routes = match self
            .generate_fallback_routes(original, &failed_tool, max_fallbacks)
            .await
        {
            Ok(routes) => routes,
            Err(e) => {
                warn!("No fallback routes after {} failed: {}", failed_tool, e);
                return FallbackOutcome {
                    result,
                    attempts: 1,
                    fallback_tool: None,
                };
            }
        };

        let mut last = FallbackOutcome {
            result,
            attempts: 1,
            fallback_tool: None,
        };
        for (n, route) in routes.into_iter().enumerate() {
            let tool = route.quote.tool.clone();
            info!(
                "Trying fallback {} via {} (priority {})",
                n + 1,
                tool,
                route.priority
            );

            let result = attempt(route.quote, n + 1).await;
            let stop = !can_fall_back(&result);
            last = FallbackOutcome {
                result,
                attempts: n + 2,
                fallback_tool: Some(tool),
            };
            if stop {
                break;
            }
        }

        last
    }
}

/// Another route may run: this one failed before moving any funds
fn can_fall_back(result: &CrossChainExecutionResult) -> bool {
    result.status == CrossChainStatus::Failed && !result.source_committed()
}
