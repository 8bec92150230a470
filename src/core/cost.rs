//! Cost estimation for chat turns.
//!
//! Prices are per token and only ever produce an estimate. Models without a
//! price entry cost nothing rather than failing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ModelPrice {
    #[serde(default)]
    pub input_cost_per_token: f64,
    #[serde(default)]
    pub output_cost_per_token: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenDirection {
    Input,
    Output,
}

pub trait CostEstimator: Send + Sync {
    fn estimate_tokens(&self, model: &str, text: &str) -> u64;

    fn price(&self, model: &str) -> Option<ModelPrice>;

    fn message_cost(&self, model: &str, text: &str, direction: TokenDirection) -> f64 {
        let Some(price) = self.price(model) else {
            return 0.0;
        };
        let per_token = match direction {
            TokenDirection::Input => price.input_cost_per_token,
            TokenDirection::Output => price.output_cost_per_token,
        };
        self.estimate_tokens(model, text) as f64 * per_token
    }
}

/// Rough token count: one token per four characters, rounded up.
pub fn estimate_tokens_from_chars(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(4)
}

#[derive(Debug, Clone, Default)]
pub struct CostTable {
    prices: HashMap<String, ModelPrice>,
}

impl CostTable {
    pub fn new(prices: HashMap<String, ModelPrice>) -> Self {
        Self { prices }
    }

    /// Layers `overrides` on top of the current table.
    pub fn with_overrides(mut self, overrides: &HashMap<String, ModelPrice>) -> Self {
        for (model, price) in overrides {
            self.prices.insert(model.clone(), *price);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn display(&self, model: &str) -> String {
        match self.prices.get(model) {
            Some(price) => format!(
                "Input: ${:.4}/1M, Output: ${:.4}/1M",
                price.input_cost_per_token * 1_000_000.0,
                price.output_cost_per_token * 1_000_000.0
            ),
            None => format!(
                "Cost data not available for '{model}' (custom, new, or unpriced model)"
            ),
        }
    }
}

impl CostEstimator for CostTable {
    fn estimate_tokens(&self, _model: &str, text: &str) -> u64 {
        estimate_tokens_from_chars(text)
    }

    fn price(&self, model: &str) -> Option<ModelPrice> {
        self.prices.get(model).copied()
    }
}

/// Running cost of one chat tab.
#[derive(Debug, Clone, Default)]
pub struct CostAccountant {
    total: f64,
    last_message: f64,
}

impl CostAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn last_message_cost(&self) -> f64 {
        self.last_message
    }

    pub fn accrue(
        &mut self,
        estimator: &dyn CostEstimator,
        model: &str,
        text: &str,
        direction: TokenDirection,
    ) -> f64 {
        let cost = estimator.message_cost(model, text, direction).max(0.0);
        self.total += cost;
        self.last_message = cost;
        cost
    }

    pub fn reset(&mut self) {
        self.total = 0.0;
        self.last_message = 0.0;
    }
}
