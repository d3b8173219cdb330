//! Quote to route conversion
//!
//! Upstream may list fee collection as a protocol step of its own. It is
//! never submitted alone: it travels nested inside the first swap or bridge
//! step.

use crate::error::{EngineError, EngineResult};
use crate::types::{QuoteResponse, Route, Step, TransactionRequest};

/// Move top-level fee collection steps into the first executable step
pub fn embed_fee_collection(steps: Vec<Step>) -> EngineResult<Vec<Step>> {
    let (fees, mut executable): (Vec<Step>, Vec<Step>) =
        steps.into_iter().partition(|s| s.is_fee_collection());

    let first = executable
        .iter_mut()
        .find(|s| s.is_executable())
        .ok_or_else(|| EngineError::Config("Route has no swap or bridge step".to_string()))?;

    for (position, fee) in fees.into_iter().enumerate() {
        if first.included_steps.iter().any(|s| s.id == fee.id) {
            continue;
        }
        first.included_steps.insert(position, fee);
    }

    executable.retain(|s| !s.is_fee_collection());
    Ok(executable)
}

/// Route for a quote, carrying the built transaction when there is one
pub fn quote_to_route(quote: &QuoteResponse, tx: Option<TransactionRequest>) -> EngineResult<Route> {
    let mut step = quote.to_step();
    if tx.is_some() {
        step.transaction_request = tx;
    }

    let to_amount = quote
        .estimate
        .as_ref()
        .map(|e| e.to_amount.clone())
        .unwrap_or_default();

    Ok(Route {
        id: quote.id.clone(),
        from_chain_id: quote.action.from_chain_id,
        to_chain_id: quote.action.to_chain_id,
        from_amount: quote.action.from_amount.clone(),
        to_amount,
        from_address: quote.action.from_address.clone(),
        to_address: quote.action.to_address.clone(),
        steps: embed_fee_collection(vec![step])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{sample_quote, sample_step};
    use crate::types::StepType;

    #[test]
    fn standalone_fee_steps_nest_into_first_real_step() {
        let quote_step = sample_step(1, 5000, "stargateV2", 1_000, 180.0);
        let mut fee = quote_step.included_steps[0].clone();
        fee.id = "fee-2".to_string();
        let mut bridge = quote_step.included_steps[1].clone();
        bridge.included_steps.clear();
        let swap = Step {
            id: "dest-swap".to_string(),
            step_type: StepType::Swap,
            ..bridge.clone()
        };

        let steps = embed_fee_collection(vec![fee.clone(), bridge, swap]).unwrap();

        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|s| !s.is_fee_collection()));
        assert_eq!(steps[0].included_steps[0].id, "fee-2");
        assert!(steps[1].included_steps.is_empty());
    }

    #[test]
    fn fee_only_routes_are_rejected() {
        let quote_step = sample_step(1, 5000, "stargateV2", 1_000, 180.0);
        let fee = quote_step.included_steps[0].clone();
        assert!(matches!(
            embed_fee_collection(vec![fee]),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn route_keeps_nested_fee_collection_once() {
        let quote = sample_quote(1, 5000);
        let route = quote_to_route(&quote, None).unwrap();

        assert_eq!(route.steps.len(), 1);
        let nested = &route.steps[0].included_steps;
        assert_eq!(nested.iter().filter(|s| s.is_fee_collection()).count(), 1);
        assert_eq!(route.to_amount, quote.estimate.as_ref().unwrap().to_amount);
        assert!(route.is_cross_chain());
    }
}
