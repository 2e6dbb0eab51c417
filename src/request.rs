//! Wire types for planning requests and responses.
//!
//! Money crosses the wire as integer minor units; the domain types hold
//! [`crate::Amount`] internally.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    catalog::{ItemId, RequestedItem, UserId, VendorId},
    error::InputError,
    plan::{FulfillmentMode, Plan},
    solver::Optimality,
};

/// The user's fulfillment choice, applied to every activated vendor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FulfillmentPreference {
    /// Per-vendor cheapest mode, ties favouring delivery.
    #[default]
    Auto,

    /// Always deliver.
    Delivery,

    /// Pick up wherever the vendor supports it.
    Pickup,
}

/// One planning request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanRequest {
    /// Requesting user.
    pub user_id: UserId,

    /// Requested item lines.
    pub items: Vec<RequestedItem>,

    /// Budget in minor units; advisory unless `hard_cap` is set.
    #[serde(default)]
    pub budget_limit: Option<i64>,

    /// Whether the budget is a hard cap.
    #[serde(default)]
    pub hard_cap: bool,

    /// Maximum number of distinct vendors the plan may use.
    #[serde(default)]
    pub max_vendor_spread: Option<usize>,

    /// Fulfillment choice.
    #[serde(default)]
    pub fulfillment_preference: FulfillmentPreference,
}

impl PlanRequest {
    /// Rejects malformed requests before any collaborator is called.
    ///
    /// # Errors
    ///
    /// Returns the first [`InputError`] found: an empty item list, a
    /// duplicated item id, a zero quantity, a hard cap without a budget, or
    /// a vendor spread of zero.
    pub fn validate(&self) -> Result<(), InputError> {
        if self.items.is_empty() {
            return Err(InputError::EmptyItems);
        }

        let mut seen: Vec<&ItemId> = Vec::with_capacity(self.items.len());
        for line in &self.items {
            if line.qty == 0 {
                return Err(InputError::NonPositiveQuantity(line.item.clone()));
            }
            if seen.contains(&&line.item) {
                return Err(InputError::DuplicateItem(line.item.clone()));
            }
            seen.push(&line.item);
        }

        if self.hard_cap && self.budget_limit.is_none() {
            return Err(InputError::MissingBudget);
        }
        if self.max_vendor_spread == Some(0) {
            return Err(InputError::ZeroVendorSpread);
        }

        Ok(())
    }

    /// Canonical rendering of the request for deterministic plan ids.
    /// Item lines keep request order; every constraint field participates.
    #[must_use]
    pub fn canonical_string(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        _ = write!(out, "user={};items=", self.user_id);
        for line in &self.items {
            _ = write!(out, "{}|{}x{};", line.item, line.category, line.qty);
        }
        _ = write!(
            out,
            "budget={:?};hard_cap={};spread={:?};fulfillment={:?}",
            self.budget_limit, self.hard_cap, self.max_vendor_spread, self.fulfillment_preference
        );
        out
    }
}

/// One resolved line on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseLine {
    /// Assigned item.
    pub item_id: ItemId,

    /// Vendor the item is bought from.
    pub vendor_id: VendorId,

    /// Quantity bought.
    pub qty: u32,

    /// Unit price in minor units, before discounts.
    pub unit_price: i64,

    /// Discount on the line in minor units.
    pub discount: i64,

    /// Fulfillment mode of the line's vendor.
    pub fulfillment_mode: FulfillmentMode,
}

/// The planning response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanResponse {
    /// Deterministic plan id.
    pub plan_id: Uuid,

    /// Resolved lines in requested item order.
    pub lines: Vec<ResponseLine>,

    /// Plan total in minor units.
    pub total_cost: i64,

    /// Savings versus the naive cheapest-per-item baseline, minor units.
    pub total_savings: i64,

    /// Requested items no eligible vendor could cover.
    pub unmet_items: Vec<ItemId>,

    /// Whether the plan is proven optimal.
    pub optimality: Optimality,

    /// Human-readable summary, including any degradation warnings.
    pub explanation: String,
}

impl PlanResponse {
    /// Flattens a plan onto the wire.
    #[must_use]
    pub fn from_plan(plan: &Plan) -> Self {
        let lines = plan
            .lines
            .iter()
            .map(|line| ResponseLine {
                item_id: line.item.clone(),
                vendor_id: line.vendor.clone(),
                qty: line.qty,
                unit_price: line.unit_price.to_minor_units(),
                discount: line.discount.to_minor_units(),
                fulfillment_mode: line.fulfillment,
            })
            .collect();

        Self {
            plan_id: plan.id,
            lines,
            total_cost: plan.total_cost.to_minor_units(),
            total_savings: plan.total_savings.to_minor_units(),
            unmet_items: plan.unmet.clone(),
            optimality: plan.optimality,
            explanation: explanation_for(plan),
        }
    }
}

/// Builds the user-facing explanation: vendor summary, then warnings.
fn explanation_for(plan: &Plan) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let vendors = plan.activated_vendors();

    match vendors.len() {
        0 => _ = write!(out, "no items could be planned"),
        1 => {
            _ = write!(out, "everything from {}", vendors.first().map_or("", VendorId::as_str));
        }
        n => {
            _ = write!(out, "split across {n} vendors: ");
            for (i, vendor) in vendors.iter().enumerate() {
                if i > 0 {
                    _ = write!(out, ", ");
                }
                _ = write!(out, "{vendor}");
            }
        }
    }

    if !plan.unmet.is_empty() {
        _ = write!(out, "; {} item(s) unavailable", plan.unmet.len());
    }
    for warning in &plan.warnings {
        _ = write!(out, "; {warning}");
    }

    out
}
