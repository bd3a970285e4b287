//! Hotspot - per-parameter admission control
//!
//! This crate decides, for a single call, whether it may proceed, must wait,
//! or must be rejected, based on rate limits attached to individual argument
//! values. Each rule watches one argument position; the value found there is
//! normalized into a comparable key and run through the rule's traffic shaping
//! controller.

pub mod config;
pub mod error;
pub mod hotspot;
