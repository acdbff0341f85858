//! Stage → cost tier → model routing, and cost estimation.
//!
//! The router is a pure lookup over its [`RouterConfig`]: no hidden state, no
//! clock, no I/O. The same configuration and job always yield the same model
//! choices and the same estimate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Job, ModelId, ModelTier, Stage, TokenCost};

/// Model identifier and per-call price for one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierSpec {
    pub model: ModelId,
    /// Estimated USD per model call.
    pub cost_per_call: f64,
}

/// Routing table configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub premium: TierSpec,
    pub standard: TierSpec,
    /// Per-stage tier overrides on top of the built-in table.
    pub stage_overrides: BTreeMap<Stage, ModelTier>,
    /// Lesson count assumed for the content stage before a curriculum exists.
    pub planned_lessons: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            premium: TierSpec {
                model: ModelId::new_unchecked("claude-opus-4"),
                cost_per_call: 0.075,
            },
            standard: TierSpec {
                model: ModelId::new_unchecked("claude-sonnet-4"),
                cost_per_call: 0.015,
            },
            stage_overrides: BTreeMap::new(),
            planned_lessons: 12,
        }
    }
}

/// Maps stages to model tiers and model identifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRouter {
    config: RouterConfig,
}

impl ModelRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    /// The built-in stage→tier table.
    ///
    /// Intent, curriculum and QA decisions shape everything downstream and run
    /// once per job; content and assessment generation is bulk work.
    pub fn default_tier(stage: Stage) -> ModelTier {
        match stage {
            Stage::Intent | Stage::Curriculum | Stage::Qa => ModelTier::Premium,
            Stage::Content | Stage::Assessment => ModelTier::Standard,
        }
    }

    /// Tier for `stage`: explicit override first, then configured overrides,
    /// then the built-in table.
    pub fn tier_for_stage(&self, stage: Stage, override_tier: Option<ModelTier>) -> ModelTier {
        override_tier
            .or_else(|| self.config.stage_overrides.get(&stage).copied())
            .unwrap_or_else(|| Self::default_tier(stage))
    }

    /// Model identifier for `stage`, honouring `override_tier` when given.
    pub fn get_model_for_stage(&self, stage: Stage, override_tier: Option<ModelTier>) -> ModelId {
        self.spec(self.tier_for_stage(stage, override_tier))
            .model
            .clone()
    }

    /// Per-call price for `tier`.
    pub fn cost_per_call(&self, tier: ModelTier) -> TokenCost {
        TokenCost::new(self.spec(tier).cost_per_call).unwrap_or_else(TokenCost::zero)
    }

    /// Estimated cost of `job`: completed stages at their recorded call count,
    /// remaining stages at their planned call count.
    ///
    /// Lessons rewritten after QA review and explicit regenerations count
    /// once they are committed. Rewrites a future review may ask for are not
    /// predicted.
    pub fn estimate_cost(&self, job: &Job) -> TokenCost {
        Stage::ALL
            .into_iter()
            .map(|stage| {
                let tier = self.tier_for_stage(stage, None);
                self.cost_per_call(tier).times(self.calls_for(job, stage))
            })
            .sum()
    }

    /// Model calls attributed to `stage` for `job`: one per attempt, except
    /// content, which makes one call per lesson plus one per lesson retry.
    /// Committed rewrites add their own calls on top.
    fn calls_for(&self, job: &Job, stage: Stage) -> u32 {
        let extra = job.retry_count(stage) + job.rewrite_calls.get(&stage).copied().unwrap_or(0);
        match stage {
            Stage::Content => {
                let lessons = job
                    .artifacts
                    .curriculum
                    .as_ref()
                    .map(|c| c.lesson_count() as u32)
                    .unwrap_or(self.config.planned_lessons);
                lessons + extra
            }
            _ => 1 + extra,
        }
    }

    fn spec(&self, tier: ModelTier) -> &TierSpec {
        match tier {
            ModelTier::Premium => &self.config.premium,
            ModelTier::Standard => &self.config.standard,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}
