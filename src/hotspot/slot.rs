//! The hotspot rule check slot.
//!
//! For one call, this resolves the bound argument of every controller attached
//! to the resource and walks them in registration order: a block stops the
//! walk, a wait suspends the caller in place before moving on.

use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, instrument, trace};

use super::controller::ControllerLookup;
use super::param::{match_arg, ParamValue};
use super::token::{TokenResult, TokenStatus};

/// Name reported by the rule check slot.
pub const RULE_CHECK_SLOT_NAME: &str = "hotspot-rule-check-slot";

/// Everything the slot needs to know about one call.
#[derive(Debug, Clone)]
pub struct CallContext<'a> {
    /// The resource being entered
    pub resource: &'a str,
    /// Call arguments, read only
    pub args: &'a [ParamValue],
    /// Weight of the call, handed to controllers as is
    pub batch_count: i64,
    /// Returned unchanged unless a controller blocks
    pub default_result: TokenResult,
}

impl<'a> CallContext<'a> {
    /// A call of weight 1 whose default result is `Pass`.
    pub fn new(resource: &'a str, args: &'a [ParamValue]) -> Self {
        Self {
            resource,
            args,
            batch_count: 1,
            default_result: TokenResult::Pass,
        }
    }

    pub fn with_batch_count(mut self, batch_count: i64) -> Self {
        self.batch_count = batch_count;
        self
    }

    pub fn with_default_result(mut self, result: TokenResult) -> Self {
        self.default_result = result;
        self
    }
}

/// Stateless dispatcher over the controllers of a resource.
///
/// The checker only holds a handle to the lookup, so it can be cloned freely
/// and shared across tasks.
pub struct HotspotChecker<L: ?Sized> {
    lookup: Arc<L>,
}

impl<L: ?Sized> Clone for HotspotChecker<L> {
    fn clone(&self) -> Self {
        Self {
            lookup: Arc::clone(&self.lookup),
        }
    }
}

impl<L: ControllerLookup + ?Sized> HotspotChecker<L> {
    /// Create a checker over the given controller lookup.
    pub fn new(lookup: Arc<L>) -> Self {
        Self { lookup }
    }

    pub fn name(&self) -> &'static str {
        RULE_CHECK_SLOT_NAME
    }

    /// Decide whether a call may proceed.
    ///
    /// Controllers that do not apply to the call are skipped. The first
    /// `Block` is returned as is; a `Wait` with a positive duration suspends
    /// the current task for that long and then continues with the next
    /// controller. Otherwise the context's default result is returned.
    ///
    /// A started wait always runs to completion; dropping the returned future
    /// is the only way to abandon it.
    #[instrument(
        name = "hotspot_check",
        skip(self, ctx),
        fields(resource = %ctx.resource, batch_count = ctx.batch_count)
    )]
    pub async fn check(&self, ctx: CallContext<'_>) -> TokenResult {
        let controllers = self.lookup.controllers_for(ctx.resource);
        if controllers.is_empty() {
            return ctx.default_result;
        }

        for (position, controller) in controllers.iter().enumerate() {
            let Some(arg) = match_arg(controller.as_ref(), ctx.args) else {
                continue;
            };

            let Some(result) = controller.perform_checking(&arg, ctx.batch_count) else {
                continue;
            };

            match result.status() {
                TokenStatus::Block => {
                    debug!(
                        position = position,
                        arg = %arg,
                        result = %result,
                        "Hotspot parameter blocked"
                    );
                    return result;
                }
                TokenStatus::Wait => {
                    let wait = result.wait_duration();
                    if !wait.is_zero() {
                        trace!(
                            position = position,
                            arg = %arg,
                            wait_ms = wait.as_millis() as u64,
                            "Suspending call for hotspot throttling"
                        );
                        sleep(wait).await;
                    }
                }
                TokenStatus::Pass => {}
            }
        }

        ctx.default_result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotspot::controller::TrafficShapingController;
    use crate::hotspot::param::ParamKey;
    use crate::hotspot::token::BlockError;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::time::Instant;

    type Log = Arc<Mutex<Vec<(&'static str, i64)>>>;

    /// Returns a fixed result and records every invocation.
    struct Fixed {
        name: &'static str,
        index: isize,
        result: Option<TokenResult>,
        log: Log,
    }

    impl TrafficShapingController for Fixed {
        fn bound_param_index(&self) -> isize {
            self.index
        }

        fn perform_checking(&self, _arg: &ParamKey, batch_count: i64) -> Option<TokenResult> {
            self.log.lock().push((self.name, batch_count));
            self.result.clone()
        }
    }

    /// Blocks only the string argument "bad".
    struct DenyBad;

    impl TrafficShapingController for DenyBad {
        fn bound_param_index(&self) -> isize {
            0
        }

        fn perform_checking(&self, arg: &ParamKey, _batch_count: i64) -> Option<TokenResult> {
            match arg {
                ParamKey::Str(s) if s == "bad" => Some(TokenResult::blocked("bad value")),
                _ => None,
            }
        }
    }

    #[derive(Default)]
    struct StaticLookup {
        table: HashMap<String, Vec<Arc<dyn TrafficShapingController>>>,
    }

    impl StaticLookup {
        fn with(mut self, resource: &str, controller: Arc<dyn TrafficShapingController>) -> Self {
            self.table
                .entry(resource.to_string())
                .or_default()
                .push(controller);
            self
        }
    }

    impl ControllerLookup for StaticLookup {
        fn controllers_for(&self, resource: &str) -> Vec<Arc<dyn TrafficShapingController>> {
            self.table.get(resource).cloned().unwrap_or_default()
        }
    }

    fn fixed(name: &'static str, index: isize, result: Option<TokenResult>, log: &Log) -> Arc<Fixed> {
        Arc::new(Fixed {
            name,
            index,
            result,
            log: log.clone(),
        })
    }

    fn names(log: &Log) -> Vec<&'static str> {
        log.lock().iter().map(|(name, _)| *name).collect()
    }

    #[tokio::test]
    async fn test_block_short_circuits_remaining_controllers() {
        let log = Log::default();
        let block = TokenResult::Block(
            BlockError::new("too hot").with_rule_id(Some("B".to_string())),
        );
        let lookup = StaticLookup::default()
            .with("R", fixed("A", 0, Some(TokenResult::Pass), &log))
            .with("R", fixed("B", 0, Some(block.clone()), &log))
            .with("R", fixed("C", 0, Some(TokenResult::Pass), &log));
        let checker = HotspotChecker::new(Arc::new(lookup));

        let args = vec![ParamValue::from("k")];
        let result = checker.check(CallContext::new("R", &args)).await;

        assert_eq!(result, block);
        assert_eq!(names(&log), vec!["A", "B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_suspends_then_returns_default() {
        let log = Log::default();
        let lookup = StaticLookup::default()
            .with("R", fixed("A", 0, Some(TokenResult::should_wait(50)), &log));
        let checker = HotspotChecker::new(Arc::new(lookup));

        let args = vec![ParamValue::from(1)];
        let start = Instant::now();
        let result = checker.check(CallContext::new("R", &args)).await;

        assert_eq!(result, TokenResult::Pass);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_millis(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_accumulate_in_order() {
        let log = Log::default();
        let lookup = StaticLookup::default()
            .with("R", fixed("A", 0, Some(TokenResult::should_wait(30)), &log))
            .with("R", fixed("B", 0, Some(TokenResult::should_wait(20)), &log))
            .with("R", fixed("C", 0, Some(TokenResult::Pass), &log));
        let checker = HotspotChecker::new(Arc::new(lookup));

        let args = vec![ParamValue::from(1)];
        let start = Instant::now();
        let result = checker.check(CallContext::new("R", &args)).await;

        assert_eq!(result, TokenResult::Pass);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(names(&log), vec!["A", "B", "C"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_wait_does_not_suspend() {
        let log = Log::default();
        let lookup = StaticLookup::default()
            .with("R", fixed("A", 0, Some(TokenResult::should_wait(0)), &log));
        let checker = HotspotChecker::new(Arc::new(lookup));

        let args = vec![ParamValue::from(1)];
        let start = Instant::now();
        let result = checker.check(CallContext::new("R", &args)).await;

        assert_eq!(result, TokenResult::Pass);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_after_wait_is_returned() {
        let log = Log::default();
        let lookup = StaticLookup::default()
            .with("R", fixed("A", 0, Some(TokenResult::should_wait(10)), &log))
            .with("R", fixed("B", 0, Some(TokenResult::blocked("stop")), &log));
        let checker = HotspotChecker::new(Arc::new(lookup));

        let args = vec![ParamValue::from(1)];
        let start = Instant::now();
        let result = checker.check(CallContext::new("R", &args)).await;

        assert!(result.is_blocked());
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_unresolvable_argument_skips_controller() {
        let log = Log::default();
        let lookup = StaticLookup::default()
            .with("R", fixed("A", 0, Some(TokenResult::blocked("never")), &log));
        let checker = HotspotChecker::new(Arc::new(lookup));

        let result = checker.check(CallContext::new("R", &[])).await;

        assert_eq!(result, TokenResult::Pass);
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_skipped_controller_does_not_stop_later_ones() {
        let log = Log::default();
        let lookup = StaticLookup::default()
            .with("R", fixed("far", 5, Some(TokenResult::blocked("never")), &log))
            .with("R", fixed("nil", 1, Some(TokenResult::blocked("never")), &log))
            .with("R", fixed("silent", 0, None, &log))
            .with("R", fixed("last", -2, Some(TokenResult::blocked("last")), &log));
        let checker = HotspotChecker::new(Arc::new(lookup));

        let args = vec![ParamValue::from("a"), ParamValue::Nil];
        let result = checker.check(CallContext::new("R", &args)).await;

        assert_eq!(result, TokenResult::blocked("last"));
        assert_eq!(names(&log), vec!["silent", "last"]);
    }

    #[tokio::test]
    async fn test_no_controllers_returns_default_unchanged() {
        let checker = HotspotChecker::new(Arc::new(StaticLookup::default()));
        let preliminary = TokenResult::blocked("decided upstream");

        let args = vec![ParamValue::from(1)];
        let ctx = CallContext::new("unknown", &args).with_default_result(preliminary.clone());
        let result = checker.check(ctx).await;

        assert_eq!(result, preliminary);
    }

    #[tokio::test]
    async fn test_default_returned_when_nothing_blocks() {
        let log = Log::default();
        let lookup = StaticLookup::default()
            .with("R", fixed("A", 0, Some(TokenResult::Pass), &log));
        let checker = HotspotChecker::new(Arc::new(lookup));

        let args = vec![ParamValue::from(1)];
        let ctx = CallContext::new("R", &args).with_default_result(TokenResult::should_wait(0));
        let result = checker.check(ctx).await;

        assert_eq!(result, TokenResult::should_wait(0));
    }

    #[tokio::test]
    async fn test_batch_count_passed_through() {
        let log = Log::default();
        let lookup = StaticLookup::default().with("R", fixed("A", 0, None, &log));
        let checker = HotspotChecker::new(Arc::new(lookup));

        let args = vec![ParamValue::from(1)];
        for batch in [1, 0, -3, 40] {
            checker
                .check(CallContext::new("R", &args).with_batch_count(batch))
                .await;
        }

        let batches: Vec<i64> = log.lock().iter().map(|(_, b)| *b).collect();
        assert_eq!(batches, vec![1, 0, -3, 40]);
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_independent() {
        let lookup = StaticLookup::default().with("R", Arc::new(DenyBad));
        let checker = HotspotChecker::new(Arc::new(lookup));

        let inputs: Vec<Vec<ParamValue>> = (0..64)
            .map(|i| {
                let value = if i % 3 == 0 { "bad".to_string() } else { format!("ok-{}", i) };
                vec![ParamValue::from(value)]
            })
            .collect();

        let results = futures::future::join_all(inputs.iter().map(|args| {
            let checker = checker.clone();
            async move { checker.check(CallContext::new("R", args)).await }
        }))
        .await;

        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.is_blocked(), i % 3 == 0, "call {}", i);
        }
    }

    #[test]
    fn test_checker_name() {
        let checker = HotspotChecker::new(Arc::new(StaticLookup::default()));
        assert_eq!(checker.name(), RULE_CHECK_SLOT_NAME);
    }
}
