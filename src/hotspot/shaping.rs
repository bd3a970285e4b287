//! Traffic shaping controllers built from hotspot rules.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use super::bucket::{Pacing, ParamPacer, ParamTokenBuckets};
use super::controller::TrafficShapingController;
use super::param::ParamKey;
use super::rules::{ControlBehavior, HotspotRule};
use super::token::{BlockError, TokenResult};
use crate::error::Result;

/// Build the controller matching a rule's control behavior.
pub fn build_controller(rule: &HotspotRule) -> Result<Arc<dyn TrafficShapingController>> {
    rule.validate()?;
    let controller: Arc<dyn TrafficShapingController> = match rule.control_behavior {
        ControlBehavior::Reject => Arc::new(RejectController::from_rule(rule)?),
        ControlBehavior::Throttling => Arc::new(ThrottlingController::from_rule(rule)?),
    };
    Ok(controller)
}

/// The parts every hotspot controller shares.
#[derive(Debug, Clone)]
struct RuleBinding {
    rule_id: Option<String>,
    param_index: isize,
    threshold: i64,
    duration_ms: i64,
    specific_items: HashMap<ParamKey, i64>,
}

impl RuleBinding {
    fn from_rule(rule: &HotspotRule) -> Result<Self> {
        Ok(Self {
            rule_id: rule.id.clone(),
            param_index: rule.param_index,
            threshold: rule.threshold,
            duration_ms: rule.duration_ms(),
            specific_items: rule.specific_thresholds()?,
        })
    }

    fn threshold_for(&self, arg: &ParamKey) -> i64 {
        self.specific_items.get(arg).copied().unwrap_or(self.threshold)
    }

    fn block(&self, message: &str, arg: &ParamKey) -> TokenResult {
        TokenResult::Block(
            BlockError::new(message)
                .with_rule_id(self.rule_id.clone())
                .with_triggered_value(arg.clone()),
        )
    }
}

/// Rejects calls once a parameter value has used up its tokens.
///
/// Each value owns a bucket of `threshold + burst_count` tokens that refills
/// at `threshold` tokens per `duration_in_sec`.
pub struct RejectController {
    binding: RuleBinding,
    burst_count: i64,
    buckets: ParamTokenBuckets,
}

impl RejectController {
    pub fn from_rule(rule: &HotspotRule) -> Result<Self> {
        Ok(Self {
            binding: RuleBinding::from_rule(rule)?,
            burst_count: rule.burst_count,
            buckets: ParamTokenBuckets::new(),
        })
    }

    /// Number of parameter values seen so far.
    pub fn tracked_values(&self) -> usize {
        self.buckets.len()
    }
}

impl TrafficShapingController for RejectController {
    fn bound_param_index(&self) -> isize {
        self.binding.param_index
    }

    fn perform_checking(&self, arg: &ParamKey, batch_count: i64) -> Option<TokenResult> {
        if batch_count <= 0 {
            return None;
        }

        let tokens = self.binding.threshold_for(arg);
        let max_tokens = tokens.saturating_add(self.burst_count);
        if batch_count > max_tokens {
            return Some(self.binding.block("hotspot batch exceeds capacity", arg));
        }

        let acquired = self.buckets.try_acquire(
            arg,
            batch_count,
            max_tokens,
            tokens,
            self.binding.duration_ms,
        );
        if acquired {
            None
        } else {
            trace!(arg = %arg, threshold = tokens, "Hotspot tokens exhausted");
            Some(self.binding.block("hotspot parameter limit exceeded", arg))
        }
    }
}

impl fmt::Debug for RejectController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RejectController")
            .field("rule_id", &self.binding.rule_id)
            .field("param_index", &self.binding.param_index)
            .field("threshold", &self.binding.threshold)
            .field("burst_count", &self.burst_count)
            .finish()
    }
}

/// Paces calls for each parameter value at `threshold` per `duration_in_sec`.
///
/// Calls that would have to queue for `max_queueing_time_ms` or longer are
/// rejected.
pub struct ThrottlingController {
    binding: RuleBinding,
    max_queueing_time_ms: i64,
    pacer: ParamPacer,
}

impl ThrottlingController {
    pub fn from_rule(rule: &HotspotRule) -> Result<Self> {
        Ok(Self {
            binding: RuleBinding::from_rule(rule)?,
            max_queueing_time_ms: rule.max_queueing_time_ms,
            pacer: ParamPacer::new(),
        })
    }

    /// Number of parameter values seen so far.
    pub fn tracked_values(&self) -> usize {
        self.pacer.len()
    }

    fn cost_ms(&self, batch_count: i64, tokens: i64) -> i64 {
        let total = batch_count.saturating_mul(self.binding.duration_ms) as f64;
        (total / tokens as f64).round() as i64
    }

    /// Check a call at `now_ms` on the pacer's clock.
    fn check_at(&self, arg: &ParamKey, batch_count: i64, now_ms: i64) -> Option<TokenResult> {
        if batch_count <= 0 {
            return None;
        }

        let tokens = self.binding.threshold_for(arg);
        if tokens <= 0 {
            return Some(self.binding.block("hotspot parameter threshold is zero", arg));
        }

        let cost = self.cost_ms(batch_count, tokens);
        match self.pacer.acquire_at(arg, cost, self.max_queueing_time_ms, now_ms) {
            Pacing::Pass => None,
            Pacing::Wait(wait_ms) => Some(TokenResult::should_wait(wait_ms)),
            Pacing::Reject => {
                trace!(arg = %arg, cost_ms = cost, "Hotspot queueing time exceeded");
                Some(self.binding.block("hotspot queueing time exceeded", arg))
            }
        }
    }
}

impl TrafficShapingController for ThrottlingController {
    fn bound_param_index(&self) -> isize {
        self.binding.param_index
    }

    fn perform_checking(&self, arg: &ParamKey, batch_count: i64) -> Option<TokenResult> {
        self.check_at(arg, batch_count, self.pacer.now_ms())
    }
}

impl fmt::Debug for ThrottlingController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottlingController")
            .field("rule_id", &self.binding.rule_id)
            .field("param_index", &self.binding.param_index)
            .field("threshold", &self.binding.threshold)
            .field("max_queueing_time_ms", &self.max_queueing_time_ms)
            .finish()
    }
}
