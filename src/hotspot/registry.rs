//! In-memory registry of traffic shaping controllers per resource.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::controller::{ControllerLookup, TrafficShapingController};
use super::rules::HotspotRule;
use super::shaping::build_controller;
use crate::error::Result;

type ControllerTable = HashMap<String, Vec<Arc<dyn TrafficShapingController>>>;

/// Holds the ordered controllers of every resource.
///
/// This struct is thread-safe and can be shared across multiple tasks. Readers
/// only take the lock long enough to clone one resource's controller list.
pub struct ControllerRegistry {
    controllers: RwLock<ControllerTable>,
}

impl ControllerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            controllers: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry holding controllers for the given rules.
    pub fn from_rules(rules: &[HotspotRule]) -> Result<Self> {
        let registry = Self::new();
        registry.load_rules(rules)?;
        Ok(registry)
    }

    /// Replace every registered controller with ones built from `rules`.
    ///
    /// All rules are built before anything is swapped in, so a bad rule leaves
    /// the current table untouched. Within a resource, controllers keep the
    /// order of their rules.
    pub fn load_rules(&self, rules: &[HotspotRule]) -> Result<()> {
        let mut table = ControllerTable::new();
        for rule in rules {
            let controller = build_controller(rule)?;
            debug!(
                resource = %rule.resource,
                rule_id = ?rule.id,
                param_index = rule.param_index,
                behavior = %rule.control_behavior,
                "Built hotspot controller"
            );
            table.entry(rule.resource.clone()).or_default().push(controller);
        }

        let resources = table.len();
        *self.controllers.write() = table;

        info!(rules = rules.len(), resources = resources, "Hotspot rules loaded");
        Ok(())
    }

    /// Append a controller to the end of a resource's list.
    pub fn register(&self, resource: impl Into<String>, controller: Arc<dyn TrafficShapingController>) {
        self.controllers
            .write()
            .entry(resource.into())
            .or_default()
            .push(controller);
    }

    /// Drop all controllers of a resource. Returns how many were removed.
    pub fn remove_resource(&self, resource: &str) -> usize {
        self.controllers
            .write()
            .remove(resource)
            .map_or(0, |removed| removed.len())
    }

    /// Clear all controllers.
    pub fn clear(&self) {
        self.controllers.write().clear();
    }

    /// Number of resources with at least one controller.
    pub fn resource_count(&self) -> usize {
        self.controllers.read().len()
    }

    pub fn controller_count(&self, resource: &str) -> usize {
        self.controllers.read().get(resource).map_or(0, Vec::len)
    }
}

impl Default for ControllerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerLookup for ControllerRegistry {
    fn controllers_for(&self, resource: &str) -> Vec<Arc<dyn TrafficShapingController>> {
        self.controllers
            .read()
            .get(resource)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotspot::param::{ParamKey, ParamValue};
    use crate::hotspot::rules::{ControlBehavior, HotspotRuleSet};
    use crate::hotspot::slot::{CallContext, HotspotChecker};
    use crate::hotspot::token::TokenResult;

    struct Bound(isize);

    impl TrafficShapingController for Bound {
        fn bound_param_index(&self) -> isize {
            self.0
        }

        fn perform_checking(&self, _arg: &ParamKey, _batch_count: i64) -> Option<TokenResult> {
            None
        }
    }

    fn indices(registry: &ControllerRegistry, resource: &str) -> Vec<isize> {
        registry
            .controllers_for(resource)
            .iter()
            .map(|c| c.bound_param_index())
            .collect()
    }

    #[test]
    fn test_register_keeps_order() {
        let registry = ControllerRegistry::new();
        registry.register("r", Arc::new(Bound(2)));
        registry.register("r", Arc::new(Bound(-1)));
        registry.register("r", Arc::new(Bound(0)));

        assert_eq!(indices(&registry, "r"), vec![2, -1, 0]);
        assert_eq!(registry.resource_count(), 1);
        assert!(registry.controllers_for("other").is_empty());
    }

    #[test]
    fn test_load_rules_groups_by_resource() {
        let mut throttle = HotspotRule::new("b", -1, 5);
        throttle.control_behavior = ControlBehavior::Throttling;
        let rules = vec![HotspotRule::new("a", 1, 5), throttle, HotspotRule::new("a", 0, 5)];

        let registry = ControllerRegistry::from_rules(&rules).unwrap();

        assert_eq!(registry.resource_count(), 2);
        assert_eq!(indices(&registry, "a"), vec![1, 0]);
        assert_eq!(indices(&registry, "b"), vec![-1]);
    }

    #[test]
    fn test_load_rules_replaces_table() {
        let registry = ControllerRegistry::from_rules(&[HotspotRule::new("a", 0, 1)]).unwrap();
        registry.load_rules(&[HotspotRule::new("b", 0, 1)]).unwrap();

        assert_eq!(registry.controller_count("a"), 0);
        assert_eq!(registry.controller_count("b"), 1);
    }

    #[test]
    fn test_bad_rule_leaves_table_untouched() {
        let registry = ControllerRegistry::from_rules(&[HotspotRule::new("a", 0, 1)]).unwrap();
        let result = registry.load_rules(&[HotspotRule::new("b", 0, 1), HotspotRule::new("c", 0, -1)]);

        assert!(result.is_err());
        assert_eq!(registry.controller_count("a"), 1);
        assert_eq!(registry.controller_count("b"), 0);
    }

    #[test]
    fn test_remove_and_clear() {
        let registry = ControllerRegistry::new();
        registry.register("a", Arc::new(Bound(0)));
        registry.register("a", Arc::new(Bound(1)));
        registry.register("b", Arc::new(Bound(0)));

        assert_eq!(registry.remove_resource("a"), 2);
        assert_eq!(registry.remove_resource("a"), 0);
        assert_eq!(registry.resource_count(), 1);

        registry.clear();
        assert_eq!(registry.resource_count(), 0);
    }

    #[tokio::test]
    async fn test_checker_over_loaded_rules() {
        let yaml = r#"
rules:
  - id: per-user
    resource: get_user
    param_index: 0
    threshold: 2
  - id: per-region
    resource: get_user
    param_index: -1
    threshold: 100
    specific_items:
      - value: blocked-region
        threshold: 0
"#;
        let set = HotspotRuleSet::from_yaml(yaml).unwrap();
        let registry = Arc::new(ControllerRegistry::from_rules(&set.rules).unwrap());
        let checker = HotspotChecker::new(registry);

        let alice = vec![ParamValue::from("alice"), ParamValue::from("eu")];
        for _ in 0..2 {
            let result = checker.check(CallContext::new("get_user", &alice)).await;
            assert_eq!(result, TokenResult::Pass);
        }
        let result = checker.check(CallContext::new("get_user", &alice)).await;
        let err = result.block_error().unwrap();
        assert_eq!(err.rule_id.as_deref(), Some("per-user"));

        let bob = vec![ParamValue::from("bob"), ParamValue::from("blocked-region")];
        let result = checker.check(CallContext::new("get_user", &bob)).await;
        let err = result.block_error().unwrap();
        assert_eq!(err.rule_id.as_deref(), Some("per-region"));

        // Other resources are not guarded
        let result = checker.check(CallContext::new("list_users", &alice)).await;
        assert_eq!(result, TokenResult::Pass);
    }
}
