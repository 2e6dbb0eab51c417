//! Optimisation engine.
//!
//! Delivery fees are fixed per activated vendor, so per-item cost is not
//! separable and greedy per-item vendor selection is suboptimal. The engine
//! therefore searches over *subsets of vendors to activate*: for a fixed
//! subset the optimal assignment is trivial (each item to its cheapest
//! eligible vendor within the subset), and subsets are explored with bounded
//! branch-and-bound. An exhausted search budget degrades the contract from
//! "optimal" to "optimal-or-flagged-heuristic" rather than blocking.

use std::time::Instant;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    catalog::{ItemId, VendorId},
    rules::{AssignedLine, RuleError},
};

pub mod bnb;
pub(crate) mod evaluation;

pub use bnb::solve;

/// Whether a returned plan is proven optimal within its search space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Optimality {
    /// The branch-and-bound search ran to completion.
    Optimal,

    /// The node, time or cancellation budget ran out first; this is the best
    /// plan found so far.
    Heuristic,
}

/// Solver errors.
#[derive(Debug, Error)]
pub enum SolverError {
    /// A discount rule could not be evaluated.
    #[error(transparent)]
    Rule(#[from] RuleError),

    /// Internal solver invariant was violated (this is a bug).
    #[error("solver invariant violated: {message}")]
    InvariantViolation {
        /// What invariant was violated.
        message: &'static str,
    },
}

/// Search limits and request constraints for one solve call.
#[derive(Clone, Debug)]
pub struct SolveOptions {
    /// Per-item candidate vendors kept (top-K cheapest).
    pub top_k: usize,

    /// Cap on the pruned candidate vendor set across all items.
    pub max_candidate_vendors: usize,

    /// Fixed-point iteration cap for the discount resolver.
    pub discount_iteration_cap: u32,

    /// Node budget before the search degrades to heuristic.
    pub node_budget: u64,

    /// Wall-clock deadline for the search.
    pub deadline: Instant,

    /// Worker threads the first-level frontier is partitioned across.
    pub workers: usize,

    /// Budget limit in minor units, if the request carries one.
    pub budget_limit_minor: Option<i64>,

    /// Whether the budget is a hard cap (else advisory).
    pub hard_cap: bool,

    /// Maximum number of distinct vendors a plan may use.
    pub max_vendor_spread: Option<usize>,
}

/// The winning assignment for one request.
#[derive(Clone, Debug)]
pub struct Solution {
    /// Assignment lines in request item order.
    pub lines: Vec<AssignedLine>,

    /// Resolved discount per line, parallel to `lines`.
    pub line_discounts: Vec<i64>,

    /// Vendors actually used, sorted.
    pub activated: Vec<VendorId>,

    /// Items that no vendor in the winning subset could cover.
    pub unmet: Vec<ItemId>,

    /// Items dropped to satisfy a hard budget cap, lowest preference weight
    /// first.
    pub dropped_for_budget: Vec<ItemId>,

    /// Total cost in minor units: line gross − discounts + delivery fees of
    /// activated vendors.
    pub total_cost_minor: i64,

    /// Aggregate preference score of the covered lines.
    pub preference_score: Decimal,

    /// Whether the search proved optimality.
    pub optimality: Optimality,

    /// Whether the discount fixed point stabilised.
    pub discount_stable: bool,

    /// Branch-and-bound nodes explored, for diagnostics.
    pub nodes_explored: u64,
}
