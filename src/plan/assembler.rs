//! Turns a solver solution into a plan: fulfillment modes, savings, audit.

use rustc_hash::FxHashMap;
use rusty_money::{Money, iso::Currency};
use uuid::Uuid;

use crate::{
    catalog::{ItemId, VendorId},
    delivery::{DeliveryQuote, pickup_travel_cost_minor},
    error::{InvariantViolation, PlanWarning},
    graph::OfferGraph,
    plan::{FulfillmentMode, Plan, PlanLine},
    request::FulfillmentPreference,
    solver::{Optimality, Solution},
};

/// Assembles the final plan from a solved assignment.
///
/// Decides one fulfillment mode per activated vendor, computes the savings
/// figure against the naive cheapest-per-item baseline, and audits the plan
/// before it is returned: every line must trace back to an eligible offer,
/// no item may appear twice, and the assembled total must reproduce the
/// solver's cost to the minor unit.
///
/// # Errors
///
/// Returns an [`InvariantViolation`] when the audit fails; the plan is
/// discarded rather than returned with wrong numbers.
pub fn assemble(
    plan_id: Uuid,
    solution: &Solution,
    graph: &OfferGraph,
    quotes: &FxHashMap<VendorId, DeliveryQuote>,
    preference: FulfillmentPreference,
    pickup_cost_per_km_minor: i64,
    currency: &'static Currency,
) -> Result<Plan, InvariantViolation> {
    audit(solution, graph, quotes)?;

    let mut warnings = Vec::new();
    let modes = fulfillment_modes(
        &solution.activated,
        quotes,
        preference,
        pickup_cost_per_km_minor,
        &mut warnings,
    );

    let lines: Vec<PlanLine> = solution
        .lines
        .iter()
        .zip(&solution.line_discounts)
        .map(|(line, &discount)| PlanLine {
            item: line.item.clone(),
            vendor: line.vendor.clone(),
            qty: line.qty,
            unit_price: Money::from_minor(line.unit_price_minor, currency),
            discount: Money::from_minor(discount, currency),
            fulfillment: modes
                .get(&line.vendor)
                .copied()
                .unwrap_or(FulfillmentMode::Delivery),
        })
        .collect();

    let savings_minor = baseline_cost_minor(solution, graph)
        .saturating_sub(solution.total_cost_minor)
        .max(0);

    let mut unmet: Vec<ItemId> = graph
        .unfulfillable()
        .iter()
        .chain(&solution.unmet)
        .cloned()
        .collect();
    unmet.sort();
    unmet.dedup();

    if solution.optimality == Optimality::Heuristic {
        warnings.push(PlanWarning::SearchTimeout);
    }
    if !solution.discount_stable {
        warnings.push(PlanWarning::HeuristicDiscountEstimate);
    }
    warnings.sort();
    warnings.dedup();

    Ok(Plan {
        id: plan_id,
        lines,
        total_cost: Money::from_minor(solution.total_cost_minor, currency),
        total_savings: Money::from_minor(savings_minor, currency),
        unmet,
        optimality: solution.optimality,
        warnings,
    })
}

/// One mode per activated vendor.
fn fulfillment_modes(
    activated: &[VendorId],
    quotes: &FxHashMap<VendorId, DeliveryQuote>,
    preference: FulfillmentPreference,
    pickup_cost_per_km_minor: i64,
    warnings: &mut Vec<PlanWarning>,
) -> FxHashMap<VendorId, FulfillmentMode> {
    let mut modes = FxHashMap::default();

    for vendor in activated {
        let quote = quotes.get(vendor);
        let mode = match preference {
            FulfillmentPreference::Delivery => FulfillmentMode::Delivery,
            FulfillmentPreference::Pickup => {
                if quote.is_some_and(|q| q.pickup_available) {
                    FulfillmentMode::Pickup
                } else {
                    warnings.push(PlanWarning::ForcedPickupUnavailable(vendor.clone()));
                    FulfillmentMode::Delivery
                }
            }
            FulfillmentPreference::Auto => auto_mode(quote, pickup_cost_per_km_minor),
        };
        modes.insert(vendor.clone(), mode);
    }

    modes
}

/// Cheaper of delivery and a round-trip pickup drive, ties favouring
/// delivery. Without a quote, or when pickup is unsupported, delivery.
fn auto_mode(quote: Option<&DeliveryQuote>, pickup_cost_per_km_minor: i64) -> FulfillmentMode {
    let Some(quote) = quote else {
        return FulfillmentMode::Delivery;
    };
    if !quote.pickup_available {
        return FulfillmentMode::Delivery;
    }

    match pickup_travel_cost_minor(quote.distance_km, pickup_cost_per_km_minor) {
        Some(travel) if quote.fee.to_minor_units() > travel => FulfillmentMode::Pickup,
        _ => FulfillmentMode::Delivery,
    }
}

/// What the request would have cost buying each covered item at its cheapest
/// fresh offer, ignoring delivery and discounts. The "you saved X" anchor.
fn baseline_cost_minor(solution: &Solution, graph: &OfferGraph) -> i64 {
    solution
        .lines
        .iter()
        .filter_map(|line| {
            let node = graph.get(&line.item)?;
            let cheapest = node.cheapest()?;
            Some(
                cheapest
                    .unit_price
                    .to_minor_units()
                    .saturating_mul(i64::from(line.qty)),
            )
        })
        .sum()
}

/// Post-solve audit: provenance, single assignment, totals identity.
fn audit(
    solution: &Solution,
    graph: &OfferGraph,
    quotes: &FxHashMap<VendorId, DeliveryQuote>,
) -> Result<(), InvariantViolation> {
    let mut seen: Vec<&ItemId> = Vec::with_capacity(solution.lines.len());
    for line in &solution.lines {
        if seen.contains(&&line.item) {
            return Err(InvariantViolation::DoubleAssignment(line.item.clone()));
        }
        seen.push(&line.item);

        let offer = graph
            .get(&line.item)
            .and_then(|node| node.candidate_at(&line.vendor));
        if offer.is_none() {
            return Err(InvariantViolation::LineWithoutOffer {
                item: line.item.clone(),
                vendor: line.vendor.clone(),
            });
        }
    }

    let gross: i64 = solution
        .lines
        .iter()
        .map(crate::rules::AssignedLine::gross_minor)
        .sum();
    let discounts: i64 = solution.line_discounts.iter().sum();
    let fees: i64 = solution
        .activated
        .iter()
        .map(|vendor| {
            quotes
                .get(vendor)
                .map_or(0, |quote| quote.fee.to_minor_units())
        })
        .sum();

    let assembled = gross - discounts + fees;
    if assembled != solution.total_cost_minor {
        return Err(InvariantViolation::TotalMismatch {
            assembled,
            solved: solution.total_cost_minor,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::AtomicBool,
        time::{Duration, Instant},
    };

    use jiff::Timestamp;
    use rusty_money::iso::EUR;
    use testresult::TestResult;

    use crate::{
        catalog::{Category, RequestedItem},
        graph::OfferGraphBuilder,
        offers::Offer,
        preferences::PreferenceWeights,
        solver::{SolveOptions, solve},
    };

    use super::*;

    fn offer(vendor: &str, item: &str, minor: i64) -> Offer {
        Offer {
            vendor: VendorId::new(vendor),
            item: ItemId::new(item),
            category: Category::new("pantry"),
            unit_price: Money::from_minor(minor, EUR),
            available_qty: 50,
            seen_at: Timestamp::UNIX_EPOCH,
        }
    }

    fn quote(minor: i64, pickup: bool, distance_km: f64) -> DeliveryQuote {
        DeliveryQuote {
            fee: Money::from_minor(minor, EUR),
            pickup_available: pickup,
            distance_km,
        }
    }

    fn options() -> SolveOptions {
        SolveOptions {
            top_k: 5,
            max_candidate_vendors: 20,
            discount_iteration_cap: 4,
            node_budget: 200_000,
            deadline: Instant::now() + Duration::from_secs(5),
            workers: 1,
            budget_limit_minor: None,
            hard_cap: false,
            max_vendor_spread: None,
        }
    }

    fn solved(
        graph: &OfferGraph,
        quotes: &FxHashMap<VendorId, DeliveryQuote>,
    ) -> Result<Solution, crate::solver::SolverError> {
        solve(
            graph,
            &[],
            quotes,
            &PreferenceWeights::uniform(),
            &options(),
            &AtomicBool::new(false),
        )
    }

    #[test]
    fn assembled_totals_match_the_solver() -> TestResult {
        let requested = [
            RequestedItem::new("milk", "pantry", 1),
            RequestedItem::new("rice", "pantry", 2),
        ];
        let offers = [
            offer("vendor-a", "milk", 100),
            offer("vendor-a", "rice", 50),
        ];
        let graph = OfferGraphBuilder::new(Timestamp::UNIX_EPOCH, 900)
            .build(&requested, &offers, &[], EUR)?;
        let quotes =
            FxHashMap::from_iter([(VendorId::new("vendor-a"), quote(40, true, 10.0))]);

        let solution = solved(&graph, &quotes)?;
        let plan = assemble(
            Uuid::nil(),
            &solution,
            &graph,
            &quotes,
            FulfillmentPreference::Auto,
            60,
            EUR,
        )?;

        // 100 + 2*50 + 40 fee.
        assert_eq!(plan.total_cost.to_minor_units(), 240);
        let line_sum: i64 = plan.lines.iter().map(PlanLine::total_minor).sum();
        assert_eq!(line_sum + 40, plan.total_cost.to_minor_units());

        Ok(())
    }

    #[test]
    fn auto_mode_picks_up_when_the_fee_exceeds_the_drive() -> TestResult {
        let requested = [RequestedItem::new("milk", "pantry", 1)];
        let offers = [offer("vendor-a", "milk", 100)];
        let graph = OfferGraphBuilder::new(Timestamp::UNIX_EPOCH, 900)
            .build(&requested, &offers, &[], EUR)?;

        // Round trip costs 2 * 0.5km * 60 = 60; a 500 fee loses to it.
        let quotes =
            FxHashMap::from_iter([(VendorId::new("vendor-a"), quote(500, true, 0.5))]);
        let solution = solved(&graph, &quotes)?;
        let plan = assemble(
            Uuid::nil(),
            &solution,
            &graph,
            &quotes,
            FulfillmentPreference::Auto,
            60,
            EUR,
        )?;

        assert_eq!(
            plan.lines.first().map(|l| l.fulfillment),
            Some(FulfillmentMode::Pickup)
        );

        Ok(())
    }

    #[test]
    fn auto_mode_ties_favour_delivery() -> TestResult {
        let requested = [RequestedItem::new("milk", "pantry", 1)];
        let offers = [offer("vendor-a", "milk", 100)];
        let graph = OfferGraphBuilder::new(Timestamp::UNIX_EPOCH, 900)
            .build(&requested, &offers, &[], EUR)?;

        // Fee 60 exactly equals the 2 * 0.5km * 60 round trip.
        let quotes =
            FxHashMap::from_iter([(VendorId::new("vendor-a"), quote(60, true, 0.5))]);
        let solution = solved(&graph, &quotes)?;
        let plan = assemble(
            Uuid::nil(),
            &solution,
            &graph,
            &quotes,
            FulfillmentPreference::Auto,
            60,
            EUR,
        )?;

        assert_eq!(
            plan.lines.first().map(|l| l.fulfillment),
            Some(FulfillmentMode::Delivery)
        );

        Ok(())
    }

    #[test]
    fn forced_pickup_falls_back_with_a_warning_when_unsupported() -> TestResult {
        let requested = [RequestedItem::new("milk", "pantry", 1)];
        let offers = [offer("vendor-a", "milk", 100)];
        let graph = OfferGraphBuilder::new(Timestamp::UNIX_EPOCH, 900)
            .build(&requested, &offers, &[], EUR)?;
        let quotes =
            FxHashMap::from_iter([(VendorId::new("vendor-a"), quote(40, false, 1.0))]);

        let solution = solved(&graph, &quotes)?;
        let plan = assemble(
            Uuid::nil(),
            &solution,
            &graph,
            &quotes,
            FulfillmentPreference::Pickup,
            60,
            EUR,
        )?;

        assert_eq!(
            plan.lines.first().map(|l| l.fulfillment),
            Some(FulfillmentMode::Delivery)
        );
        assert!(plan.warnings.contains(&PlanWarning::ForcedPickupUnavailable(
            VendorId::new("vendor-a")
        )));

        Ok(())
    }

    #[test]
    fn a_corrupted_total_fails_the_audit() -> TestResult {
        let requested = [RequestedItem::new("milk", "pantry", 1)];
        let offers = [offer("vendor-a", "milk", 100)];
        let graph = OfferGraphBuilder::new(Timestamp::UNIX_EPOCH, 900)
            .build(&requested, &offers, &[], EUR)?;
        let quotes =
            FxHashMap::from_iter([(VendorId::new("vendor-a"), quote(0, true, 1.0))]);

        let mut solution = solved(&graph, &quotes)?;
        solution.total_cost_minor += 1;

        let err = assemble(
            Uuid::nil(),
            &solution,
            &graph,
            &quotes,
            FulfillmentPreference::Auto,
            60,
            EUR,
        );

        assert!(matches!(
            err,
            Err(InvariantViolation::TotalMismatch {
                assembled: 100,
                solved: 101,
            })
        ));

        Ok(())
    }

    #[test]
    fn unfulfillable_items_surface_as_unmet() -> TestResult {
        let requested = [
            RequestedItem::new("milk", "pantry", 1),
            RequestedItem::new("caviar", "pantry", 1),
        ];
        let offers = [offer("vendor-a", "milk", 100)];
        let graph = OfferGraphBuilder::new(Timestamp::UNIX_EPOCH, 900)
            .build(&requested, &offers, &[], EUR)?;
        let quotes =
            FxHashMap::from_iter([(VendorId::new("vendor-a"), quote(0, true, 1.0))]);

        let solution = solved(&graph, &quotes)?;
        let plan = assemble(
            Uuid::nil(),
            &solution,
            &graph,
            &quotes,
            FulfillmentPreference::Auto,
            60,
            EUR,
        )?;

        assert_eq!(plan.unmet, vec![ItemId::new("caviar")]);
        assert_eq!(plan.lines.len(), 1);

        Ok(())
    }
}
