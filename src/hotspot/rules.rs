//! Hotspot rule configuration and validation.
//!
//! A rule binds one argument position of a resource to a threshold. Rules are
//! usually loaded from YAML, either as a bare list or under a `rules` key:
//!
//! ```yaml
//! rules:
//!   - id: user-qps
//!     resource: get_user
//!     param_index: 0
//!     control_behavior: reject
//!     threshold: 10
//!     duration_in_sec: 1
//!     specific_items:
//!       - value: vip
//!         threshold: 100
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tracing::info;

use super::param::{ParamKey, ParamValue};
use crate::error::{HotspotError, Result};

/// How a rule reacts once a parameter value runs over its threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlBehavior {
    /// Reject calls beyond the threshold (token bucket per value)
    #[default]
    Reject,
    /// Queue calls at a uniform rate, rejecting only past the queueing limit
    Throttling,
}

impl fmt::Display for ControlBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlBehavior::Reject => f.write_str("reject"),
            ControlBehavior::Throttling => f.write_str("throttling"),
        }
    }
}

/// A threshold override for one specific parameter value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecificItem {
    /// A scalar: bool, number, or string
    pub value: serde_yaml::Value,
    pub threshold: i64,
}

impl SpecificItem {
    /// The normalized key this item applies to.
    pub fn key(&self) -> Result<ParamKey> {
        let raw = match &self.value {
            serde_yaml::Value::Bool(b) => ParamValue::Bool(*b),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ParamValue::I64(i)
                } else if let Some(u) = n.as_u64() {
                    ParamValue::U64(u)
                } else if let Some(f) = n.as_f64() {
                    ParamValue::F64(f)
                } else {
                    return Err(HotspotError::InvalidRule(format!(
                        "unsupported specific item number: {}",
                        n
                    )));
                }
            }
            serde_yaml::Value::String(s) => ParamValue::Str(s.clone()),
            other => {
                return Err(HotspotError::InvalidRule(format!(
                    "specific item value must be a scalar, got {:?}",
                    other
                )))
            }
        };

        ParamKey::normalize(&raw).ok_or_else(|| {
            HotspotError::InvalidRule(format!("specific item value {:?} cannot be normalized", raw))
        })
    }
}

/// A hotspot parameter flow control rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotspotRule {
    /// Optional identifier, reported on blocked calls
    #[serde(default)]
    pub id: Option<String>,
    /// The resource this rule guards
    pub resource: String,
    /// Position of the monitored argument; negative counts from the end
    pub param_index: isize,
    #[serde(default)]
    pub control_behavior: ControlBehavior,
    /// Calls allowed per value and per duration
    pub threshold: i64,
    /// Length of the statistic window in seconds
    #[serde(default = "default_duration_in_sec")]
    pub duration_in_sec: i64,
    /// Extra tokens on top of the threshold (reject only)
    #[serde(default)]
    pub burst_count: i64,
    /// Longest acceptable queueing delay (throttling only)
    #[serde(default)]
    pub max_queueing_time_ms: i64,
    /// Per-value threshold overrides
    #[serde(default)]
    pub specific_items: Vec<SpecificItem>,
}

fn default_duration_in_sec() -> i64 {
    1
}

impl HotspotRule {
    /// A reject rule with the default window.
    pub fn new(resource: impl Into<String>, param_index: isize, threshold: i64) -> Self {
        Self {
            id: None,
            resource: resource.into(),
            param_index,
            control_behavior: ControlBehavior::Reject,
            threshold,
            duration_in_sec: default_duration_in_sec(),
            burst_count: 0,
            max_queueing_time_ms: 0,
            specific_items: Vec::new(),
        }
    }

    /// Check that the rule can be turned into a controller.
    pub fn validate(&self) -> Result<()> {
        if self.resource.is_empty() {
            return Err(self.invalid("empty resource name"));
        }
        if self.threshold < 0 {
            return Err(self.invalid("negative threshold"));
        }
        if self.duration_in_sec <= 0 {
            return Err(self.invalid("duration_in_sec must be positive"));
        }
        if self.burst_count < 0 {
            return Err(self.invalid("negative burst_count"));
        }
        if self.max_queueing_time_ms < 0 {
            return Err(self.invalid("negative max_queueing_time_ms"));
        }
        for item in &self.specific_items {
            if item.threshold < 0 {
                return Err(self.invalid("negative specific item threshold"));
            }
            item.key()?;
        }
        Ok(())
    }

    /// Specific item thresholds keyed by normalized value.
    pub fn specific_thresholds(&self) -> Result<HashMap<ParamKey, i64>> {
        self.specific_items
            .iter()
            .map(|item| Ok((item.key()?, item.threshold)))
            .collect()
    }

    /// Window length in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        self.duration_in_sec.saturating_mul(1000)
    }

    fn invalid(&self, reason: &str) -> HotspotError {
        HotspotError::InvalidRule(format!("{} (resource {:?}, id {:?})", reason, self.resource, self.id))
    }
}

/// A set of hotspot rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HotspotRuleSet {
    #[serde(default)]
    pub rules: Vec<HotspotRule>,
}

impl HotspotRuleSet {
    /// Create an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading hotspot rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string and validate them.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let parse_err =
            |e: serde_yaml::Error| HotspotError::Config(format!("Failed to parse hotspot rules: {}", e));

        // A sequence at the root is a bare list, anything else the `rules:` form
        let root: serde_yaml::Value = serde_yaml::from_str(yaml).map_err(parse_err)?;
        let set = if root.is_sequence() {
            HotspotRuleSet {
                rules: serde_yaml::from_value(root).map_err(parse_err)?,
            }
        } else {
            serde_yaml::from_value(root).map_err(parse_err)?
        };

        set.validate()?;
        Ok(set)
    }

    pub fn validate(&self) -> Result<()> {
        self.rules.iter().try_for_each(HotspotRule::validate)
    }

    /// Rules guarding `resource`, in file order.
    pub fn rules_for<'a>(&'a self, resource: &'a str) -> impl Iterator<Item = &'a HotspotRule> + 'a {
        self.rules.iter().filter(move |r| r.resource == resource)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
