//! Traits for traffic shaping controllers and their lookup.

use std::sync::Arc;

use super::param::ParamKey;
use super::token::TokenResult;

/// A per-rule component that renders a decision for one parameter value.
///
/// Implementations are shared across concurrent callers and must keep each
/// `perform_checking` call atomic with respect to their own state.
pub trait TrafficShapingController: Send + Sync {
    /// Position of the monitored argument. Negative values count from the end
    /// of the argument list.
    fn bound_param_index(&self) -> isize;

    /// Account for `batch_count` units of `arg`.
    ///
    /// Returns `None` when the controller has nothing to say about this call.
    fn perform_checking(&self, arg: &ParamKey, batch_count: i64) -> Option<TokenResult>;
}

/// Maps a resource name to its ordered traffic shaping controllers.
pub trait ControllerLookup: Send + Sync {
    /// Controllers bound to `resource`, in registration order.
    fn controllers_for(&self, resource: &str) -> Vec<Arc<dyn TrafficShapingController>>;
}
