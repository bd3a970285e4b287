//! Admission decisions shared by controllers and the rule check slot.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use super::param::ParamKey;

/// Coarse status of a [`TokenResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    /// The call may proceed
    Pass,
    /// The call must be rejected before doing any real work
    Block,
    /// The call may proceed after the suggested suspension
    Wait,
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenStatus::Pass => "pass",
            TokenStatus::Block => "block",
            TokenStatus::Wait => "wait",
        };
        f.write_str(s)
    }
}

/// Details attached to a blocked call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockError {
    /// Human readable reason
    pub message: String,
    /// Identifier of the rule that blocked the call, if it has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    /// The normalized parameter value that tripped the rule
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggered_value: Option<ParamKey>,
}

impl BlockError {
    /// Create a block description with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            rule_id: None,
            triggered_value: None,
        }
    }

    pub fn with_rule_id(mut self, rule_id: Option<String>) -> Self {
        self.rule_id = rule_id;
        self
    }

    pub fn with_triggered_value(mut self, value: ParamKey) -> Self {
        self.triggered_value = Some(value);
        self
    }
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref id) = self.rule_id {
            write!(f, " (rule {})", id)?;
        }
        if let Some(ref value) = self.triggered_value {
            write!(f, " [value {}]", value)?;
        }
        Ok(())
    }
}

/// The admission decision for one call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TokenResult {
    /// Admit the call
    #[default]
    Pass,
    /// Reject the call
    Block(BlockError),
    /// Admit the call after suspending for `wait_ms` milliseconds
    Wait { wait_ms: u64 },
}

impl TokenResult {
    /// Shorthand for a blocked result with only a message.
    pub fn blocked(message: impl Into<String>) -> Self {
        TokenResult::Block(BlockError::new(message))
    }

    pub fn should_wait(wait_ms: u64) -> Self {
        TokenResult::Wait { wait_ms }
    }

    pub fn status(&self) -> TokenStatus {
        match self {
            TokenResult::Pass => TokenStatus::Pass,
            TokenResult::Block(_) => TokenStatus::Block,
            TokenResult::Wait { .. } => TokenStatus::Wait,
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, TokenResult::Pass)
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, TokenResult::Block(_))
    }

    /// The suggested suspension, present only for `Wait`.
    pub fn wait_ms(&self) -> Option<u64> {
        match self {
            TokenResult::Wait { wait_ms } => Some(*wait_ms),
            _ => None,
        }
    }

    /// The suggested suspension as a `Duration`, zero unless `Wait`.
    pub fn wait_duration(&self) -> Duration {
        Duration::from_millis(self.wait_ms().unwrap_or(0))
    }

    pub fn block_error(&self) -> Option<&BlockError> {
        match self {
            TokenResult::Block(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for TokenResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenResult::Pass => write!(f, "pass"),
            TokenResult::Block(err) => write!(f, "block: {}", err),
            TokenResult::Wait { wait_ms } => write!(f, "wait {}ms", wait_ms),
        }
    }
}
