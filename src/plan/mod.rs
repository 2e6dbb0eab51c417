//! Plan assembly: turning a winning assignment into an explainable plan.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    Amount,
    catalog::{ItemId, VendorId},
    error::PlanWarning,
};

pub mod assembler;
pub mod render;
pub mod state;

pub use assembler::assemble;
pub use state::PlanPhase;

pub use crate::solver::Optimality;

/// How the lines of one activated vendor reach the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FulfillmentMode {
    /// The vendor delivers; its delivery fee is part of the plan total.
    Delivery,

    /// The user collects; travel is the user's own cost, outside the total.
    Pickup,
}

/// One resolved item-to-vendor assignment.
#[derive(Clone, Debug, PartialEq)]
pub struct PlanLine {
    /// Assigned item.
    pub item: ItemId,

    /// Vendor the item is bought from.
    pub vendor: VendorId,

    /// Quantity bought.
    pub qty: u32,

    /// Unit price before discounts.
    pub unit_price: Amount,

    /// Discount applied to this line.
    pub discount: Amount,

    /// Fulfillment mode of the line's vendor.
    pub fulfillment: FulfillmentMode,
}

impl PlanLine {
    /// Line cost in minor units: `unit_price * qty - discount`.
    #[must_use]
    pub fn total_minor(&self) -> i64 {
        self.unit_price
            .to_minor_units()
            .saturating_mul(i64::from(self.qty))
            .saturating_sub(self.discount.to_minor_units())
    }
}

/// The full result for one planning request.
///
/// Ephemeral: the engine does not persist plans. The id is derived from the
/// (request, snapshot) pair, so re-planning unchanged inputs reproduces it.
#[derive(Clone, Debug)]
pub struct Plan {
    /// Deterministic plan id.
    pub id: Uuid,

    /// Resolved lines, in requested item order.
    pub lines: Vec<PlanLine>,

    /// Line costs minus discounts, plus delivery fees of activated vendors.
    pub total_cost: Amount,

    /// Plan total versus the naive cheapest-per-item baseline, floored at
    /// zero.
    pub total_savings: Amount,

    /// Requested items no eligible vendor could cover.
    pub unmet: Vec<ItemId>,

    /// Whether the search proved optimality.
    pub optimality: Optimality,

    /// Degradations the caller should surface alongside the plan.
    pub warnings: Vec<PlanWarning>,
}

impl Plan {
    /// Distinct vendors the plan buys from, sorted.
    #[must_use]
    pub fn activated_vendors(&self) -> Vec<VendorId> {
        let mut vendors: Vec<VendorId> =
            self.lines.iter().map(|line| line.vendor.clone()).collect();
        vendors.sort();
        vendors.dedup();
        vendors
    }
}
