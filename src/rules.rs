//! Discount rules and the fixed-point resolver.
//!
//! Rules form a closed set of tagged variants evaluated by a pure function over
//! a candidate assignment. Threshold and bundle rules depend on per-vendor
//! subtotals, which themselves depend on discounts, so resolution iterates to a
//! fixed point under a small cap instead of recursing.

use rust_decimal::{
    Decimal, RoundingStrategy,
    prelude::{FromPrimitive, ToPrimitive},
};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use thiserror::Error;

use crate::{
    Amount,
    catalog::{Category, ItemId, RuleId, VendorId},
};

/// Errors raised while evaluating discount rules.
#[derive(Debug, Error, PartialEq)]
pub enum RuleError {
    /// A rule's percentage is outside `0..=1`.
    #[error("rule {0} has a percentage outside 0..=1")]
    InvalidPercent(RuleId),

    /// A percentage application overflowed or could not be represented.
    #[error("percentage application overflowed for rule {0}")]
    PercentConversion(RuleId),
}

/// The closed set of promotion predicates the engine understands.
#[derive(Clone, Debug, PartialEq)]
pub enum RuleKind {
    /// Percent off a vendor's whole order once its merchandise subtotal
    /// (net of other rules' discounts) reaches a threshold.
    SpendThreshold {
        /// Vendor the threshold applies at.
        vendor: VendorId,

        /// Minimum qualifying subtotal.
        min_subtotal: Amount,

        /// Fractional discount, e.g. `0.10` for 10% off.
        percent: Decimal,
    },

    /// Fixed amount off when every listed item is routed to the same vendor.
    Bundle {
        /// Vendor the bundle must be assembled at.
        vendor: VendorId,

        /// Items that must all be present at that vendor.
        items: Vec<ItemId>,

        /// Amount taken off the bundle lines.
        amount_off: Amount,
    },

    /// Percent off every unit in a category, at any vendor.
    CategoryPercent {
        /// Category the discount applies to.
        category: Category,

        /// Fractional discount per unit.
        percent: Decimal,
    },
}

/// A promotion, read-only for the lifetime of a planning request.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscountRule {
    /// Rule id; the final determinism tie-break in stacking order.
    pub id: RuleId,

    /// Stacking priority. Lower numbers apply first.
    pub priority: u32,

    /// The rule's predicate and effect.
    pub kind: RuleKind,
}

impl DiscountRule {
    /// The statically-knowable per-unit fractional discount for a category,
    /// used by the offer graph to compute effective unit costs. Only
    /// [`RuleKind::CategoryPercent`] qualifies; subtotal-dependent rules are
    /// not static.
    #[must_use]
    pub fn static_unit_percent(&self, category: &Category) -> Option<Decimal> {
        match &self.kind {
            RuleKind::CategoryPercent {
                category: rule_category,
                percent,
            } if rule_category == category => Some(*percent),
            RuleKind::CategoryPercent { .. }
            | RuleKind::SpendThreshold { .. }
            | RuleKind::Bundle { .. } => None,
        }
    }
}

/// One resolved item→vendor assignment line, the unit the resolver prices.
#[derive(Clone, Debug, PartialEq)]
pub struct AssignedLine {
    /// Item on the line.
    pub item: ItemId,

    /// Item category.
    pub category: Category,

    /// Vendor the line is routed to.
    pub vendor: VendorId,

    /// Quantity purchased.
    pub qty: u32,

    /// Pre-discount unit price in minor units.
    pub unit_price_minor: i64,
}

impl AssignedLine {
    /// Pre-discount line value in minor units.
    #[must_use]
    pub fn gross_minor(&self) -> i64 {
        self.unit_price_minor.saturating_mul(i64::from(self.qty))
    }
}

/// Outcome of resolving discounts for one candidate assignment.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    /// Discount in minor units per line, parallel to the input slice.
    pub line_discounts: Vec<i64>,

    /// Sum of all line discounts.
    pub total_discount_minor: i64,

    /// Whether the iteration reached a fixed point within the cap. When
    /// `false`, the last pass's values are a heuristic discount estimate.
    pub stable: bool,

    /// Number of passes performed.
    pub iterations: u32,
}

/// Resolve all rules against a candidate assignment.
///
/// Pure function of its inputs: each pass consumes only the previous pass's
/// output. Rules are applied in `(priority, id)` order; a threshold rule
/// judges the vendor subtotal net of *other* rules' discounts from the
/// previous pass, so a lone threshold rule is stable in one pass instead of
/// oscillating against its own effect. If the per-line discounts have not
/// stabilised after `iteration_cap` passes, the last pass's values are kept
/// and [`Resolution::stable`] is `false`.
///
/// # Errors
///
/// Returns a [`RuleError`] if a rule carries a percentage outside `0..=1` or
/// a percentage application cannot be represented in minor units.
pub fn resolve(
    lines: &[AssignedLine],
    rules: &[DiscountRule],
    iteration_cap: u32,
) -> Result<Resolution, RuleError> {
    validate_percents(rules)?;

    let order = stacking_order(rules);

    // Discounts attributed per rule per line; the threshold predicate needs
    // to subtract a rule's own prior contribution from the subtotal it judges.
    let mut prev = vec![vec![0i64; lines.len()]; rules.len()];
    let mut iterations = 0;
    let mut stable = false;

    while iterations < iteration_cap.max(1) {
        iterations += 1;

        let next = single_pass(lines, rules, &order, &prev)?;
        if next == prev {
            stable = true;
            break;
        }
        prev = next;
    }

    let mut line_discounts = vec![0i64; lines.len()];
    for per_rule in &prev {
        for (slot, d) in line_discounts.iter_mut().zip(per_rule) {
            *slot = slot.saturating_add(*d);
        }
    }

    // A line can never be discounted below zero.
    for (slot, line) in line_discounts.iter_mut().zip(lines) {
        *slot = (*slot).min(line.gross_minor());
    }

    let total_discount_minor = line_discounts.iter().sum();

    Ok(Resolution {
        line_discounts,
        total_discount_minor,
        stable,
        iterations,
    })
}

/// Apply every rule once against the previous pass's attribution matrix.
fn single_pass(
    lines: &[AssignedLine],
    rules: &[DiscountRule],
    order: &[usize],
    prev: &[Vec<i64>],
) -> Result<Vec<Vec<i64>>, RuleError> {
    let gross_by_vendor = vendor_gross(lines);
    let prev_vendor_discounts = vendor_discounts(lines, prev);

    let mut next = vec![vec![0i64; lines.len()]; rules.len()];

    for &rule_idx in order {
        let Some(rule) = rules.get(rule_idx) else {
            continue;
        };

        let Some(slot) = next.get_mut(rule_idx) else {
            continue;
        };

        match &rule.kind {
            RuleKind::CategoryPercent { category, percent } => {
                for (line_idx, line) in lines.iter().enumerate() {
                    if &line.category != category {
                        continue;
                    }
                    if let Some(d) = slot.get_mut(line_idx) {
                        *d = percent_of_minor(*percent, line.gross_minor())
                            .ok_or_else(|| RuleError::PercentConversion(rule.id.clone()))?;
                    }
                }
            }
            RuleKind::SpendThreshold {
                vendor,
                min_subtotal,
                percent,
            } => {
                let gross = gross_by_vendor.get(vendor).copied().unwrap_or(0);
                let others = prev_vendor_discounts
                    .get(vendor)
                    .map_or(0, |per_rule| total_excluding(per_rule, rule_idx));

                if gross.saturating_sub(others) >= min_subtotal.to_minor_units() {
                    for (line_idx, line) in lines.iter().enumerate() {
                        if &line.vendor != vendor {
                            continue;
                        }
                        if let Some(d) = slot.get_mut(line_idx) {
                            *d = percent_of_minor(*percent, line.gross_minor())
                                .ok_or_else(|| RuleError::PercentConversion(rule.id.clone()))?;
                        }
                    }
                }
            }
            RuleKind::Bundle {
                vendor,
                items,
                amount_off,
            } => {
                apply_bundle(lines, vendor, items, amount_off.to_minor_units(), slot);
            }
        }
    }

    Ok(next)
}

/// Spread a bundle's amount off across its lines, sorted by item id for
/// determinism, each line clamped at its gross value.
fn apply_bundle(
    lines: &[AssignedLine],
    vendor: &VendorId,
    items: &[ItemId],
    amount_off_minor: i64,
    slot: &mut [i64],
) {
    let present: FxHashSet<&ItemId> = lines
        .iter()
        .filter(|line| &line.vendor == vendor)
        .map(|line| &line.item)
        .collect();

    if items.is_empty() || !items.iter().all(|item| present.contains(item)) {
        return;
    }

    let mut bundle_lines: SmallVec<[usize; 5]> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| &line.vendor == vendor && items.contains(&line.item))
        .map(|(idx, _)| idx)
        .collect();
    bundle_lines.sort_by(|a, b| {
        let left = lines.get(*a).map(|l| &l.item);
        let right = lines.get(*b).map(|l| &l.item);
        left.cmp(&right)
    });

    let mut remaining = amount_off_minor;
    for line_idx in bundle_lines {
        if remaining <= 0 {
            break;
        }
        let Some(line) = lines.get(line_idx) else {
            continue;
        };
        let Some(d) = slot.get_mut(line_idx) else {
            continue;
        };

        let take = remaining.min(line.gross_minor());
        *d = take;
        remaining -= take;
    }
}

/// Deterministic stacking order: priority ascending, then rule id.
fn stacking_order(rules: &[DiscountRule]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..rules.len()).collect();
    order.sort_by(|a, b| {
        let left = rules.get(*a).map(|r| (r.priority, &r.id));
        let right = rules.get(*b).map(|r| (r.priority, &r.id));
        left.cmp(&right)
    });
    order
}

fn vendor_gross(lines: &[AssignedLine]) -> FxHashMap<VendorId, i64> {
    let mut gross: FxHashMap<VendorId, i64> = FxHashMap::default();
    for line in lines {
        *gross.entry(line.vendor.clone()).or_default() += line.gross_minor();
    }
    gross
}

/// Per-vendor, per-rule discount totals from the previous pass.
fn vendor_discounts(lines: &[AssignedLine], prev: &[Vec<i64>]) -> FxHashMap<VendorId, Vec<i64>> {
    let mut by_vendor: FxHashMap<VendorId, Vec<i64>> = FxHashMap::default();

    for (rule_idx, per_line) in prev.iter().enumerate() {
        for (line_idx, d) in per_line.iter().enumerate() {
            if *d == 0 {
                continue;
            }
            let Some(line) = lines.get(line_idx) else {
                continue;
            };
            let entry = by_vendor
                .entry(line.vendor.clone())
                .or_insert_with(|| vec![0i64; prev.len()]);
            if let Some(slot) = entry.get_mut(rule_idx) {
                *slot = slot.saturating_add(*d);
            }
        }
    }

    by_vendor
}

fn total_excluding(per_rule: &[i64], excluded: usize) -> i64 {
    per_rule
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != excluded)
        .map(|(_, d)| *d)
        .sum()
}

fn validate_percents(rules: &[DiscountRule]) -> Result<(), RuleError> {
    for rule in rules {
        let percent = match &rule.kind {
            RuleKind::SpendThreshold { percent, .. }
            | RuleKind::CategoryPercent { percent, .. } => *percent,
            RuleKind::Bundle { .. } => continue,
        };

        if percent < Decimal::ZERO || percent > Decimal::ONE {
            return Err(RuleError::InvalidPercent(rule.id.clone()));
        }
    }
    Ok(())
}

/// Round `percent * minor` to whole minor units, half away from zero.
///
/// Returns `None` on overflow; the caller attributes the failure to a rule.
#[must_use]
pub(crate) fn percent_of_minor(percent: Decimal, minor: i64) -> Option<i64> {
    let minor = Decimal::from_i64(minor)?;
    let applied = percent.checked_mul(minor)?;

    applied
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

#[cfg(test)]
mod tests {
    use rusty_money::{Money, iso::EUR};
    use testresult::TestResult;

    use super::*;

    fn line(item: &str, category: &str, vendor: &str, qty: u32, unit_minor: i64) -> AssignedLine {
        AssignedLine {
            item: ItemId::new(item),
            category: Category::new(category),
            vendor: VendorId::new(vendor),
            qty,
            unit_price_minor: unit_minor,
        }
    }

    fn threshold(id: &str, vendor: &str, min_minor: i64, percent: Decimal) -> DiscountRule {
        DiscountRule {
            id: RuleId::new(id),
            priority: 10,
            kind: RuleKind::SpendThreshold {
                vendor: VendorId::new(vendor),
                min_subtotal: Money::from_minor(min_minor, EUR),
                percent,
            },
        }
    }

    #[test]
    fn threshold_applies_and_is_stable_in_one_extra_pass() -> TestResult {
        // Vendor subtotal 520 with "10% off orders >= 500": expect 52 off and
        // a stable resolution, since the rule judges the subtotal net of
        // other rules only.
        let lines = [
            line("rice", "pantry", "vendor-a", 2, 160),
            line("milk", "dairy", "vendor-a", 2, 100),
        ];
        let rules = [threshold("r-threshold", "vendor-a", 500, Decimal::new(10, 2))];

        let resolution = resolve(&lines, &rules, 4)?;

        assert!(resolution.stable, "single threshold rule must stabilise");
        assert_eq!(resolution.total_discount_minor, 52);
        assert_eq!(resolution.line_discounts, vec![32, 20]);

        Ok(())
    }

    #[test]
    fn threshold_not_met_is_zero() -> TestResult {
        let lines = [line("milk", "dairy", "vendor-a", 1, 499)];
        let rules = [threshold("r-threshold", "vendor-a", 500, Decimal::new(10, 2))];

        let resolution = resolve(&lines, &rules, 4)?;

        assert!(resolution.stable, "no rules firing is trivially stable");
        assert_eq!(resolution.total_discount_minor, 0);

        Ok(())
    }

    #[test]
    fn category_percent_discounts_each_matching_line() -> TestResult {
        let lines = [
            line("milk", "dairy", "vendor-a", 2, 100),
            line("bread", "bakery", "vendor-b", 1, 250),
        ];
        let rules = [DiscountRule {
            id: RuleId::new("r-dairy"),
            priority: 1,
            kind: RuleKind::CategoryPercent {
                category: Category::new("dairy"),
                percent: Decimal::new(25, 2),
            },
        }];

        let resolution = resolve(&lines, &rules, 4)?;

        assert_eq!(resolution.line_discounts, vec![50, 0]);

        Ok(())
    }

    #[test]
    fn bundle_requires_all_items_at_one_vendor() -> TestResult {
        let bundle = DiscountRule {
            id: RuleId::new("r-breakfast"),
            priority: 5,
            kind: RuleKind::Bundle {
                vendor: VendorId::new("vendor-a"),
                items: vec![ItemId::new("cheese"), ItemId::new("butter")],
                amount_off: Money::from_minor(120, EUR),
            },
        };

        let split = [
            line("cheese", "dairy", "vendor-a", 1, 300),
            line("butter", "dairy", "vendor-b", 1, 250),
        ];
        let together = [
            line("cheese", "dairy", "vendor-a", 1, 300),
            line("butter", "dairy", "vendor-a", 1, 250),
        ];

        let rules = [bundle];

        assert_eq!(resolve(&split, &rules, 4)?.total_discount_minor, 0);

        let resolution = resolve(&together, &rules, 4)?;
        assert_eq!(resolution.total_discount_minor, 120);
        // Spread in item-id order: butter first.
        assert_eq!(resolution.line_discounts, vec![0, 120]);

        Ok(())
    }

    #[test]
    fn category_discount_disarming_a_threshold_settles() -> TestResult {
        // 20% off dairy drops the vendor subtotal seen by the spend threshold
        // below its minimum; the threshold switches off once and the system
        // settles with only the category discount applied.
        let lines = [line("milk", "dairy", "vendor-a", 5, 110)];
        let rules = [
            DiscountRule {
                id: RuleId::new("r-dairy"),
                priority: 1,
                kind: RuleKind::CategoryPercent {
                    category: Category::new("dairy"),
                    percent: Decimal::new(20, 2),
                },
            },
            threshold("r-threshold", "vendor-a", 500, Decimal::new(10, 2)),
        ];

        let resolution = resolve(&lines, &rules, 4)?;

        assert!(resolution.stable, "one-way disarm settles below the cap");
        assert_eq!(resolution.total_discount_minor, 110);

        Ok(())
    }

    #[test]
    fn mutually_defeating_thresholds_hit_the_cap() -> TestResult {
        // Two 50%-off thresholds at the same vendor: each pass, each rule sees
        // the other's discount push net spend below the minimum, switches off,
        // which re-arms both. A genuine two-cycle the cap must break.
        let lines = [line("ham", "deli", "vendor-a", 1, 1000)];
        let rules = [
            threshold("r-x", "vendor-a", 600, Decimal::new(50, 2)),
            threshold("r-y", "vendor-a", 600, Decimal::new(50, 2)),
        ];

        let resolution = resolve(&lines, &rules, 4)?;

        assert!(!resolution.stable, "two-cycle must be cut off at the cap");
        assert_eq!(resolution.iterations, 4);

        Ok(())
    }

    #[test]
    fn line_discount_never_exceeds_gross() -> TestResult {
        let lines = [line("sample", "misc", "vendor-a", 1, 50)];
        let rules = [DiscountRule {
            id: RuleId::new("r-big-bundle"),
            priority: 1,
            kind: RuleKind::Bundle {
                vendor: VendorId::new("vendor-a"),
                items: vec![ItemId::new("sample")],
                amount_off: Money::from_minor(500, EUR),
            },
        }];

        let resolution = resolve(&lines, &rules, 4)?;

        assert_eq!(resolution.total_discount_minor, 50, "clamped at line gross");

        Ok(())
    }

    #[test]
    fn invalid_percent_is_rejected() {
        let rules = [threshold("r-bad", "vendor-a", 100, Decimal::new(15, 1))];

        let result = resolve(&[], &rules, 4);

        assert_eq!(result, Err(RuleError::InvalidPercent(RuleId::new("r-bad"))));
    }

    #[test]
    fn stacking_order_is_priority_then_id() {
        let rules = [
            threshold("r-b", "vendor-a", 1, Decimal::ZERO),
            threshold("r-a", "vendor-a", 1, Decimal::ZERO),
            DiscountRule {
                id: RuleId::new("r-z"),
                priority: 0,
                kind: RuleKind::CategoryPercent {
                    category: Category::new("dairy"),
                    percent: Decimal::ZERO,
                },
            },
        ];

        assert_eq!(stacking_order(&rules), vec![2, 1, 0]);
    }

    #[test]
    fn percent_of_minor_rounds_half_away_from_zero() {
        assert_eq!(percent_of_minor(Decimal::new(10, 2), 525), Some(53));
        assert_eq!(percent_of_minor(Decimal::new(10, 2), 520), Some(52));
    }
}
