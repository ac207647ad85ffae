//! Session orchestration modules.
//!
//! Covers the silence watchdog, section reconciliation, scoped attempt
//! teardown, and the top-level session state machine.

pub mod attempt;
pub mod controller;
pub mod reconciler;
pub mod timeout;
