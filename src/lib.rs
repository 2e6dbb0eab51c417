//! Hamper
//!
//! Hamper is a deterministic multi-vendor shopping-plan optimisation engine written in Rust.
//!
//! Given a requested item list, a read-only snapshot of per-vendor offers, active
//! discount rules, delivery quotes and shopper preferences, it computes a
//! cost-minimising purchase plan, possibly split across vendors, under an optional
//! budget cap, and decides a delivery-or-pickup fulfilment mode per vendor.
//!
//! Identical `(request, snapshot)` pairs always produce byte-identical plans.

pub mod catalog;
pub mod config;
pub mod delivery;
pub mod error;
pub mod fixtures;
pub mod graph;
pub mod offers;
pub mod plan;
pub mod planner;
pub mod preferences;
pub mod request;
pub mod rules;
pub mod solver;
pub mod sources;
pub mod vendors;

pub use config::PlannerConfig;
pub use error::{InfeasibleReport, InputError, InvariantViolation, PlanError, PlanWarning};
pub use plan::{FulfillmentMode, Optimality, Plan, PlanLine};
pub use planner::Planner;
pub use request::{PlanRequest, PlanResponse};

/// Money amounts are carried internally as [`rusty_money::Money`] over ISO
/// currencies; every currency reference is `'static`, so a single alias keeps
/// signatures flat.
pub type Amount = rusty_money::Money<'static, rusty_money::iso::Currency>;
