//! Error taxonomy for the planning pipeline.
//!
//! Input and infeasibility errors are terminal and descriptive; data
//! unavailability is retryable by the caller; search timeouts and partial
//! non-critical data degrade the response instead of failing it, surfacing as
//! warnings. Invariant violations are fatal and never masked.

use std::fmt;

use thiserror::Error;

use crate::{
    catalog::{ItemId, VendorId},
    graph::GraphError,
    rules::RuleError,
    sources::SourceError,
};

/// Rejections raised by request validation, before any collaborator call.
#[derive(Debug, Error, PartialEq)]
pub enum InputError {
    /// The request contains no items.
    #[error("request contains no items")]
    EmptyItems,

    /// The same item id appears on more than one line.
    #[error("item {0} is requested more than once")]
    DuplicateItem(ItemId),

    /// A line requests a non-positive quantity.
    #[error("item {0} has a non-positive quantity")]
    NonPositiveQuantity(ItemId),

    /// `hard_cap` was set without a budget limit to cap against.
    #[error("hard_cap set without a budget_limit")]
    MissingBudget,

    /// `max_vendor_spread` of zero can never cover anything.
    #[error("max_vendor_spread must be at least 1")]
    ZeroVendorSpread,
}

/// Why no plan could be produced, and the best that was achievable.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InfeasibleReport {
    /// Items with no eligible vendor in the snapshot.
    pub unfulfillable: Vec<ItemId>,

    /// Items dropped to get under a hard budget cap, lowest preference
    /// weight first.
    pub dropped_for_budget: Vec<ItemId>,

    /// Cost in minor units of the best under-budget partial coverage, if any
    /// items were coverable at all.
    pub best_partial_cost_minor: Option<i64>,
}

impl fmt::Display for InfeasibleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.unfulfillable.is_empty() {
            write!(f, "no eligible vendor for: ")?;
            write_ids(f, &self.unfulfillable)?;
        }
        if !self.dropped_for_budget.is_empty() {
            if !self.unfulfillable.is_empty() {
                write!(f, "; ")?;
            }
            write!(f, "over hard budget cap even after dropping: ")?;
            write_ids(f, &self.dropped_for_budget)?;
        }
        Ok(())
    }
}

fn write_ids(f: &mut fmt::Formatter<'_>, ids: &[ItemId]) -> fmt::Result {
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{id}")?;
    }
    Ok(())
}

/// A violated internal invariant. Fatal: the plan is discarded rather than
/// returned with silently wrong numbers.
#[derive(Debug, Error, PartialEq)]
pub enum InvariantViolation {
    /// The assembled totals do not match the solver's cost.
    #[error("total mismatch: assembled {assembled} minor units, solver reported {solved}")]
    TotalMismatch {
        /// Total recomputed from plan lines and fees.
        assembled: i64,

        /// Total the solver reported.
        solved: i64,
    },

    /// An item appears on more than one plan line.
    #[error("item {0} is assigned to more than one vendor")]
    DoubleAssignment(ItemId),

    /// A plan line references a vendor with no candidate offer for the item.
    #[error("line for {item} references vendor {vendor} without an eligible offer")]
    LineWithoutOffer {
        /// Item on the offending line.
        item: ItemId,

        /// Vendor without an eligible offer.
        vendor: VendorId,
    },

    /// The solver reported an internal inconsistency.
    #[error("solver invariant violated: {0}")]
    SolverInternal(&'static str),

    /// The request state machine was asked to skip a state.
    #[error("illegal state transition: {from} -> {to}")]
    IllegalTransition {
        /// State the request was in.
        from: &'static str,

        /// State the transition asked for.
        to: &'static str,
    },
}

/// Warnings that degrade a response without failing it, surfaced in the
/// response explanation.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PlanWarning {
    /// A non-critical source was unavailable and defaults were used.
    PartialData {
        /// Which source fell back.
        source: &'static str,
    },

    /// The search budget ran out before optimality was proven.
    SearchTimeout,

    /// The discount fixed point did not stabilise within its cap.
    HeuristicDiscountEstimate,

    /// The user forced pickup at a vendor that does not offer it.
    ForcedPickupUnavailable(VendorId),

    /// An advisory budget (no hard cap) was exceeded.
    BudgetExceeded {
        /// Overage in minor units.
        over_minor: i64,
    },
}

impl fmt::Display for PlanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanWarning::PartialData { source } => {
                write!(f, "{source} unavailable, defaults used")
            }
            PlanWarning::SearchTimeout => {
                write!(f, "search budget exhausted, best-found plan returned")
            }
            PlanWarning::HeuristicDiscountEstimate => {
                write!(f, "discounts are a heuristic estimate")
            }
            PlanWarning::ForcedPickupUnavailable(vendor) => {
                write!(f, "pickup forced but unavailable at {vendor}, delivering instead")
            }
            PlanWarning::BudgetExceeded { over_minor } => {
                write!(f, "plan exceeds the advisory budget by {over_minor} minor units")
            }
        }
    }
}

/// Everything that can end a planning request without a plan.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The request was malformed; rejected before any collaborator call.
    #[error(transparent)]
    Input(#[from] InputError),

    /// A critical source (offers, rules) was unreachable or timed out.
    /// Retryable by the caller.
    #[error("critical source {source} unavailable: {cause}")]
    DataUnavailable {
        /// Which collaborator failed.
        source: &'static str,

        /// The underlying failure.
        #[source]
        cause: SourceError,
    },

    /// No plan satisfies the constraints.
    #[error("no feasible plan: {0}")]
    Infeasible(InfeasibleReport),

    /// The request was cancelled before any result existed.
    #[error("planning request cancelled")]
    Cancelled,

    /// The snapshot could not be turned into a search space.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A rule could not be evaluated.
    #[error(transparent)]
    Rule(#[from] RuleError),

    /// An internal invariant was violated; the plan is not returned.
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infeasible_report_lists_both_causes() {
        let report = InfeasibleReport {
            unfulfillable: vec![ItemId::new("caviar")],
            dropped_for_budget: vec![ItemId::new("truffles"), ItemId::new("saffron")],
            best_partial_cost_minor: Some(1200),
        };

        assert_eq!(
            report.to_string(),
            "no eligible vendor for: caviar; over hard budget cap even after dropping: truffles, saffron"
        );
    }

    #[test]
    fn warnings_render_for_the_explanation() {
        let warning = PlanWarning::PartialData { source: "preferences" };

        assert_eq!(warning.to_string(), "preferences unavailable, defaults used");
    }
}
