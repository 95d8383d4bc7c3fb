//! Model pricing and per-call cost receipts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Usage;
use arbor_core::Usd;

/// Input tokens above which a call is billed at the extended-context tier
pub const EXTENDED_CONTEXT_THRESHOLD: u64 = 200_000;

/// Per-million-token prices for one model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    pub input_per_mtok: Usd,
    pub output_per_mtok: Usd,
    /// Prices once a single call crosses the threshold; None if the model has no such tier
    pub extended: Option<(Usd, Usd)>,
    pub extended_threshold: u64,
}

impl Pricing {
    pub fn flat(input_per_mtok: Usd, output_per_mtok: Usd) -> Self {
        Self {
            input_per_mtok,
            output_per_mtok,
            extended: None,
            extended_threshold: EXTENDED_CONTEXT_THRESHOLD,
        }
    }

    pub fn tiered(
        input_per_mtok: Usd,
        output_per_mtok: Usd,
        extended_input_per_mtok: Usd,
        extended_output_per_mtok: Usd,
    ) -> Self {
        Self {
            input_per_mtok,
            output_per_mtok,
            extended: Some((extended_input_per_mtok, extended_output_per_mtok)),
            extended_threshold: EXTENDED_CONTEXT_THRESHOLD,
        }
    }

    /// Whether this call's own input volume lands in the extended tier
    pub fn is_extended(&self, usage: &Usage) -> bool {
        self.extended.is_some() && usage.input_tokens > self.extended_threshold
    }

    /// Unit prices that apply to this call
    pub fn rates_for(&self, usage: &Usage) -> (Usd, Usd) {
        match self.extended {
            Some(rates) if self.is_extended(usage) => rates,
            _ => (self.input_per_mtok, self.output_per_mtok),
        }
    }

    /// Cost of a call; thinking tokens are billed at the output rate
    pub fn cost(&self, usage: &Usage) -> Usd {
        let (input_rate, output_rate) = self.rates_for(usage);
        Usd::per_million_tokens(input_rate, usage.input_tokens)
            + Usd::per_million_tokens(output_rate, usage.output_tokens + usage.thinking_tokens)
    }

    /// Price a token estimate at the standard input rate
    pub fn estimate_input(&self, input_tokens: u64) -> Usd {
        Usd::per_million_tokens(self.input_per_mtok, input_tokens)
    }

    /// Most a call can cost: the prompt plus every output token it may bill,
    /// at whichever tier the prompt lands in
    pub fn worst_case(&self, input_tokens: u64, max_output_tokens: u64) -> Usd {
        self.cost(&Usage::new(input_tokens, max_output_tokens))
    }
}

/// Immutable receipt for one reasoning call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEvent {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub thinking_tokens: u64,
    pub input_price_per_mtok: Usd,
    pub output_price_per_mtok: Usd,
    pub extended_context: bool,
    pub cost: Usd,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl CostEvent {
    /// Price a call's usage
    pub fn priced(model: impl Into<String>, usage: Usage, pricing: &Pricing, duration_ms: u64) -> Self {
        let (input_rate, output_rate) = pricing.rates_for(&usage);
        Self {
            model: model.into(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            thinking_tokens: usage.thinking_tokens,
            input_price_per_mtok: input_rate,
            output_price_per_mtok: output_rate,
            extended_context: pricing.is_extended(&usage),
            cost: pricing.cost(&usage),
            duration_ms,
            timestamp: Utc::now(),
        }
    }

    /// A receipt with a fixed cost, for providers that bill per call
    pub fn flat(model: impl Into<String>, usage: Usage, cost: Usd) -> Self {
        Self {
            model: model.into(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            thinking_tokens: usage.thinking_tokens,
            input_price_per_mtok: Usd::ZERO,
            output_price_per_mtok: Usd::ZERO,
            extended_context: false,
            cost,
            duration_ms: 0,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Model;

    #[test]
    fn test_standard_tier_cost() {
        let pricing = Model::Sonnet.pricing();
        let usage = Usage::new(100_000, 10_000);
        // 0.1M * $3 + 0.01M * $15 = $0.30 + $0.15
        assert_eq!(pricing.cost(&usage), Usd::from_cents(45));
        assert!(!pricing.is_extended(&usage));
    }

    #[test]
    fn test_extended_tier_is_per_call() {
        let pricing = Model::Sonnet.pricing();
        let big = Usage::new(250_000, 1_000);
        assert!(pricing.is_extended(&big));
        // 0.25M * $6 + 0.001M * $22.50
        assert_eq!(pricing.cost(&big), "1.5225".parse().unwrap());

        // A small call after a big one is standard again
        let small = Usage::new(1_000, 1_000);
        assert!(!pricing.is_extended(&small));
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let pricing = Model::Sonnet.pricing();
        assert!(!pricing.is_extended(&Usage::new(EXTENDED_CONTEXT_THRESHOLD, 0)));
        assert!(pricing.is_extended(&Usage::new(EXTENDED_CONTEXT_THRESHOLD + 1, 0)));
    }

    #[test]
    fn test_worst_case_bounds_any_output() {
        let pricing = Model::Sonnet.pricing();
        let bound = pricing.worst_case(10_000, 16_000);
        assert_eq!(bound, pricing.cost(&Usage::new(10_000, 16_000)));
        assert!(pricing.cost(&Usage::new(10_000, 4_000)) < bound);

        // A prompt past the threshold is bounded at the extended rates
        let big = pricing.worst_case(250_000, 1_000);
        assert!(big > pricing.estimate_input(250_000) + Usd::per_million_tokens(Usd::from_dollars(15), 1_000));
    }

    #[test]
    fn test_flat_model_never_extended() {
        let pricing = Model::Opus.pricing();
        assert!(!pricing.is_extended(&Usage::new(500_000, 0)));
    }

    #[test]
    fn test_thinking_billed_as_output() {
        let pricing = Model::Haiku.pricing();
        let usage = Usage {
            input_tokens: 0,
            output_tokens: 0,
            thinking_tokens: 1_000_000,
        };
        assert_eq!(pricing.cost(&usage), Usd::from_dollars(4));
    }

    #[test]
    fn test_cost_event_records_tier() {
        let pricing = Model::Sonnet.pricing();
        let event = CostEvent::priced("sonnet", Usage::new(300_000, 0), &pricing, 1200);
        assert!(event.extended_context);
        assert_eq!(event.input_price_per_mtok, Usd::from_dollars(6));
        assert_eq!(event.cost, Usd::from_cents(180));
        assert_eq!(event.duration_ms, 1200);
    }
}
