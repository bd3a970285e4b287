//! Hotspot parameter flow control: argument resolution, the rule check slot,
//! and the controllers it dispatches to.

mod bucket;
mod controller;
mod param;
mod registry;
mod rules;
mod shaping;
mod slot;
mod token;

pub use bucket::{Pacing, ParamPacer, ParamTokenBuckets};
pub use controller::{ControllerLookup, TrafficShapingController};
pub use param::{match_arg, quantize, resolve_index, Opaque, ParamKey, ParamValue, FLOAT_PRECISION};
pub use registry::ControllerRegistry;
pub use rules::{ControlBehavior, HotspotRule, HotspotRuleSet, SpecificItem};
pub use shaping::{build_controller, RejectController, ThrottlingController};
pub use slot::{CallContext, HotspotChecker, RULE_CHECK_SLOT_NAME};
pub use token::{BlockError, TokenResult, TokenStatus};
