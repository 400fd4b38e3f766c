//! Model pricing registry.
//!
//! Costs are in nanodollars (1e-9 USD) per token.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Pricing information for a model.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub input_nanos_per_token: i64,
    pub output_nanos_per_token: i64,
}

impl ModelPricing {
    const fn new(input: i64, output: i64) -> Self {
        Self {
            input_nanos_per_token: input,
            output_nanos_per_token: output,
        }
    }

    pub fn calculate_cost(&self, input_tokens: u32, output_tokens: u32) -> i64 {
        (input_tokens as i64) * self.input_nanos_per_token
            + (output_tokens as i64) * self.output_nanos_per_token
    }
}

// =============================================================================
// PRICING DATA
// =============================================================================

// OpenRouter list prices (verify periodically against OpenRouter model pages)
// GPT-5: $1.25/1M input, $10.00/1M output
const GPT_5: ModelPricing = ModelPricing::new(1_250, 10_000);
// GPT-5-mini: $0.25/1M input, $2.00/1M output
const GPT_5_MINI: ModelPricing = ModelPricing::new(250, 2_000);
// GPT-4.1: $2.00/1M input, $8.00/1M output
const GPT_4_1: ModelPricing = ModelPricing::new(2_000, 8_000);
// GPT-4.1-mini: $0.40/1M input, $1.60/1M output
const GPT_4_1_MINI: ModelPricing = ModelPricing::new(400, 1_600);

static PRICING_MAP: OnceLock<HashMap<&'static str, ModelPricing>> = OnceLock::new();

fn init_pricing() -> HashMap<&'static str, ModelPricing> {
    let mut map = HashMap::new();
    map.insert("openai/gpt-5", GPT_5);
    map.insert("openai/gpt-5-2025-08-07", GPT_5);
    map.insert("openai/gpt-5-mini", GPT_5_MINI);
    map.insert("openai/gpt-4.1", GPT_4_1);
    map.insert("openai/gpt-4.1-2025-04-14", GPT_4_1);
    map.insert("openai/gpt-4.1-mini", GPT_4_1_MINI);
    map
}

pub fn get_pricing(model_id: &str) -> Option<ModelPricing> {
    let map = PRICING_MAP.get_or_init(init_pricing);
    map.get(model_id).copied()
}

/// Calculate chat cost.
pub fn chat_cost(model: &str, input_tokens: u32, output_tokens: u32) -> i64 {
    // Unknown models are billed as a mid-range model
    let default = ModelPricing::new(1_000, 5_000);
    get_pricing(model)
        .unwrap_or(default)
        .calculate_cost(input_tokens, output_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_cost() {
        // 1K input + 1K output for GPT-4.1
        // Input: 1000 * 2000 = 2,000,000 nanos
        // Output: 1000 * 8000 = 8,000,000 nanos
        let cost = chat_cost("openai/gpt-4.1", 1_000, 1_000);
        assert_eq!(cost, 10_000_000);
    }

    #[test]
    fn unknown_model_uses_fallback_rate() {
        assert!(get_pricing("acme/unknown").is_none());
        assert_eq!(chat_cost("acme/unknown", 1, 1), 6_000);
    }
}
