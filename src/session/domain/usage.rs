//! Cost and token accounting.
//!
//! Costs are carried in micro-dollars so cumulative totals are exact integer
//! increments.

use serde::{Deserialize, Serialize};

/// Cost and token figures reported by the upstream for one turn.
///
/// # Examples
///
/// ```
/// use palaver::session::domain::TurnUsage;
///
/// let usage = TurnUsage::new(1_500, 120, 48);
/// assert_eq!(usage.cost_micro_usd, 1_500);
/// assert!(!usage.is_zero());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnUsage {
    /// Cost of the turn in millionths of a US dollar.
    #[serde(default)]
    pub cost_micro_usd: u64,
    /// Tokens consumed from the prompt side.
    #[serde(default)]
    pub input_tokens: u64,
    /// Tokens produced by the agent.
    #[serde(default)]
    pub output_tokens: u64,
}

impl TurnUsage {
    /// Creates a usage record.
    #[must_use]
    pub const fn new(cost_micro_usd: u64, input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            cost_micro_usd,
            input_tokens,
            output_tokens,
        }
    }

    /// Returns `true` if every figure is zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.cost_micro_usd == 0 && self.input_tokens == 0 && self.output_tokens == 0
    }
}

/// Cumulative usage of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    /// Total cost in millionths of a US dollar.
    pub cost_micro_usd: u64,
    /// Total prompt-side tokens.
    pub input_tokens: u64,
    /// Total agent-produced tokens.
    pub output_tokens: u64,
}

impl UsageTotals {
    /// Adds one turn's figures, saturating at `u64::MAX`.
    pub const fn add(&mut self, usage: &TurnUsage) {
        self.cost_micro_usd = self.cost_micro_usd.saturating_add(usage.cost_micro_usd);
        self.input_tokens = self.input_tokens.saturating_add(usage.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(usage.output_tokens);
    }
}
