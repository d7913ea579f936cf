//! Thread-safe token and cost ledger
//!
//! The only mutable state shared between pipeline workers. Every attempt that
//! reports token usage is recorded, including attempts that ultimately failed.

use crate::config::Pricing;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::trace;

/// One billed attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    pub timestamp_ms: u64,
    pub skill_id: String,
    pub stage_index: usize,
    pub noise_level: u8,
    pub repetition: u32,
    pub attempt: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
}

/// Where an attempt sits in the batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostContext<'a> {
    pub skill_id: &'a str,
    pub stage_index: usize,
    pub noise_level: u8,
    pub repetition: u32,
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenTotals {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub total_cost: f64,
    pub total_calls: usize,
    pub total_tokens: TokenTotals,
    pub cost_by_stage: BTreeMap<usize, f64>,
    pub cost_by_noise_level: BTreeMap<u8, f64>,
    pub average_cost_per_call: f64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostReport {
    pub generated_at_ms: u64,
    pub pricing: Pricing,
    pub summary: CostSummary,
    pub calls: Vec<CostEntry>,
}

/// Mutex-guarded append-only ledger
#[derive(Debug, Default)]
pub struct CostAccumulator {
    pricing: Pricing,
    entries: Mutex<Vec<CostEntry>>,
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl CostAccumulator {
    pub fn new(pricing: Pricing) -> Self {
        Self {
            pricing,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn pricing(&self) -> &Pricing {
        &self.pricing
    }

    // A panicked writer cannot leave a half-pushed entry, so poisoning is ignored
    fn lock(&self) -> MutexGuard<'_, Vec<CostEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record one attempt's usage and return its cost
    pub fn record(&self, ctx: CostContext<'_>, input_tokens: u64, output_tokens: u64) -> f64 {
        let cost = self.pricing.cost(input_tokens, output_tokens);
        let entry = CostEntry {
            timestamp_ms: now_ms(),
            skill_id: ctx.skill_id.to_string(),
            stage_index: ctx.stage_index,
            noise_level: ctx.noise_level,
            repetition: ctx.repetition,
            attempt: ctx.attempt,
            input_tokens,
            output_tokens,
            cost,
        };
        trace!(
            skill = ctx.skill_id,
            stage = ctx.stage_index,
            attempt = ctx.attempt,
            input_tokens,
            output_tokens,
            cost,
            "cost recorded"
        );
        self.lock().push(entry);
        cost
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn entries(&self) -> Vec<CostEntry> {
        self.lock().clone()
    }

    pub fn total_cost(&self) -> f64 {
        self.lock().iter().map(|e| e.cost).sum()
    }

    pub fn summary(&self) -> CostSummary {
        let entries = self.lock();
        let mut totals = TokenTotals::default();
        let mut by_stage: BTreeMap<usize, f64> = BTreeMap::new();
        let mut by_level: BTreeMap<u8, f64> = BTreeMap::new();
        let mut total_cost = 0.0;

        for entry in entries.iter() {
            totals.input += entry.input_tokens;
            totals.output += entry.output_tokens;
            total_cost += entry.cost;
            *by_stage.entry(entry.stage_index).or_insert(0.0) += entry.cost;
            *by_level.entry(entry.noise_level).or_insert(0.0) += entry.cost;
        }
        totals.total = totals.input + totals.output;

        let average = if entries.is_empty() {
            0.0
        } else {
            total_cost / entries.len() as f64
        };

        CostSummary {
            total_cost,
            total_calls: entries.len(),
            total_tokens: totals,
            cost_by_stage: by_stage,
            cost_by_noise_level: by_level,
            average_cost_per_call: average,
            currency: "USD".to_string(),
        }
    }

    pub fn report(&self) -> CostReport {
        CostReport {
            generated_at_ms: now_ms(),
            pricing: self.pricing.clone(),
            summary: self.summary(),
            calls: self.entries(),
        }
    }
}
