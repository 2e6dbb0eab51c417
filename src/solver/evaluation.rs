//! Subset evaluation: pricing a proposed set of activated vendors.

use std::cmp::Ordering;

use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::{
    catalog::{Category, ItemId, VendorId},
    delivery::DeliveryQuote,
    graph::{ItemNode, OfferGraph},
    preferences::PreferenceWeights,
    rules::{AssignedLine, DiscountRule, RuleKind, resolve},
    solver::{SolveOptions, SolverError},
};

/// Borrowed, read-only inputs shared by every node of one search.
#[derive(Debug)]
pub(crate) struct SearchContext<'a> {
    pub(crate) items: Vec<&'a ItemNode>,
    pub(crate) rules: &'a [DiscountRule],
    pub(crate) quotes: &'a FxHashMap<VendorId, DeliveryQuote>,
    pub(crate) weights: &'a PreferenceWeights,
    pub(crate) options: &'a SolveOptions,
}

impl<'a> SearchContext<'a> {
    pub(crate) fn new(
        graph: &'a OfferGraph,
        rules: &'a [DiscountRule],
        quotes: &'a FxHashMap<VendorId, DeliveryQuote>,
        weights: &'a PreferenceWeights,
        options: &'a SolveOptions,
    ) -> Self {
        Self {
            items: graph.items().collect(),
            rules,
            quotes,
            weights,
            options,
        }
    }

    /// The top-K candidate slice for one item.
    pub(crate) fn top_candidates(&self, item: &'a ItemNode) -> &'a [crate::graph::Candidate] {
        let k = self.options.top_k.max(1).min(item.candidates.len());
        item.candidates.get(..k).unwrap_or(&item.candidates)
    }

    fn delivery_fee_minor(&self, vendor: &VendorId) -> i64 {
        self.quotes
            .get(vendor)
            .map_or(0, |quote| quote.fee.to_minor_units())
    }
}

/// The pruned candidate vendor list in deterministic branching order:
/// vendors covering more items first, ties by id.
pub(crate) fn candidate_vendors(ctx: &SearchContext<'_>) -> Vec<VendorId> {
    let mut coverage: FxHashMap<&VendorId, usize> = FxHashMap::default();
    for &item in &ctx.items {
        for candidate in ctx.top_candidates(item) {
            *coverage.entry(&candidate.vendor).or_default() += 1;
        }
    }

    let mut vendors: Vec<(&VendorId, usize)> =
        coverage.into_iter().collect();
    vendors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    vendors.truncate(ctx.options.max_candidate_vendors.max(1));

    vendors.into_iter().map(|(vendor, _)| vendor.clone()).collect()
}

/// The "globally cheapest per item, ignoring delivery" baseline subset used
/// to seed the incumbent.
pub(crate) fn baseline_subset(ctx: &SearchContext<'_>, allowed: &[VendorId]) -> Vec<VendorId> {
    let mut subset: Vec<VendorId> = ctx
        .items
        .iter()
        .filter_map(|&item| {
            ctx.top_candidates(item)
                .iter()
                .find(|c| allowed.contains(&c.vendor))
                .map(|c| c.vendor.clone())
        })
        .collect();
    subset.sort();
    subset.dedup();
    subset
}

/// A fully priced candidate solution for one vendor subset.
#[derive(Clone, Debug)]
pub(crate) struct Evaluated {
    pub(crate) lines: Vec<AssignedLine>,
    pub(crate) line_discounts: Vec<i64>,
    pub(crate) vendors_used: Vec<VendorId>,
    pub(crate) unmet: Vec<ItemId>,
    pub(crate) dropped_for_budget: Vec<ItemId>,
    pub(crate) total_cost_minor: i64,
    pub(crate) preference_score: Decimal,
    pub(crate) discount_stable: bool,
}

impl Evaluated {
    /// Number of covered items.
    pub(crate) fn covered(&self) -> usize {
        self.lines.len()
    }

    /// Whether this solution may seed the shared cost bound: it must cover
    /// every coverable item without budget drops, otherwise its cost is not
    /// comparable to full-coverage completions.
    pub(crate) fn is_full_coverage(&self, coverable: usize) -> bool {
        self.dropped_for_budget.is_empty() && self.covered() == coverable
    }

    /// Total order over candidate solutions; `Less` means better.
    ///
    /// Coverage first, then cost, then the determinism tie-breaks: higher
    /// aggregate preference score, fewer distinct vendors, lexicographically
    /// smallest vendor-id set.
    pub(crate) fn compare(&self, other: &Evaluated) -> Ordering {
        other
            .covered()
            .cmp(&self.covered())
            .then_with(|| self.total_cost_minor.cmp(&other.total_cost_minor))
            .then_with(|| other.preference_score.cmp(&self.preference_score))
            .then_with(|| self.vendors_used.len().cmp(&other.vendors_used.len()))
            .then_with(|| self.vendors_used.cmp(&other.vendors_used))
    }

    pub(crate) fn is_better_than(&self, other: &Evaluated) -> bool {
        self.compare(other) == Ordering::Less
    }
}

/// Price the optimal assignment for a fixed activated-vendor subset.
///
/// Each item goes to its cheapest eligible vendor within `subset` (ties by
/// vendor id, already encoded in candidate order) or is left unmet. Discounts
/// are resolved by fixed point over the resulting assignment; delivery fees
/// are charged only for vendors that actually received a line. Under a hard
/// budget cap, items are dropped lowest-preference-weight first until the
/// remainder fits.
pub(crate) fn evaluate_subset(
    ctx: &SearchContext<'_>,
    subset: &[VendorId],
) -> Result<Evaluated, SolverError> {
    let mut assigned: Vec<(&ItemNode, AssignedLine)> = Vec::with_capacity(ctx.items.len());
    let mut unmet = Vec::new();

    for &item in &ctx.items {
        let candidate = ctx
            .top_candidates(item)
            .iter()
            .find(|c| subset.contains(&c.vendor));

        match candidate {
            Some(c) => assigned.push((
                item,
                AssignedLine {
                    item: item.id.clone(),
                    category: item.category.clone(),
                    vendor: c.vendor.clone(),
                    qty: item.qty,
                    unit_price_minor: c.unit_price.to_minor_units(),
                },
            )),
            None => unmet.push(item.id.clone()),
        }
    }

    let mut dropped_for_budget = Vec::new();
    let mut priced = price_assignment(ctx, &assigned)?;

    if ctx.options.hard_cap {
        if let Some(budget) = ctx.options.budget_limit_minor {
            // Drop the lowest-weighted item (ties by id) and re-price until
            // the plan fits the cap or nothing is left.
            while priced.total_cost_minor > budget && !assigned.is_empty() {
                let drop_idx = index_of_lowest_weight(ctx, &assigned);
                let Some((item, _)) = assigned.get(drop_idx) else {
                    break;
                };
                dropped_for_budget.push(item.id.clone());
                assigned.remove(drop_idx);
                priced = price_assignment(ctx, &assigned)?;
            }
        }
    }

    let preference_score = assigned
        .iter()
        .map(|(item, _)| ctx.weights.weight(&item.category) * Decimal::from(item.qty))
        .sum();

    let lines: Vec<AssignedLine> = assigned.into_iter().map(|(_, line)| line).collect();

    Ok(Evaluated {
        lines,
        line_discounts: priced.line_discounts,
        vendors_used: priced.vendors_used,
        unmet,
        dropped_for_budget,
        total_cost_minor: priced.total_cost_minor,
        preference_score,
        discount_stable: priced.discount_stable,
    })
}

struct PricedAssignment {
    line_discounts: Vec<i64>,
    vendors_used: Vec<VendorId>,
    total_cost_minor: i64,
    discount_stable: bool,
}

fn price_assignment(
    ctx: &SearchContext<'_>,
    assigned: &[(&ItemNode, AssignedLine)],
) -> Result<PricedAssignment, SolverError> {
    let lines: Vec<AssignedLine> = assigned.iter().map(|(_, line)| line.clone()).collect();

    let resolution = resolve(&lines, ctx.rules, ctx.options.discount_iteration_cap)?;

    let mut vendors_used: Vec<VendorId> =
        lines.iter().map(|line| line.vendor.clone()).collect();
    vendors_used.sort();
    vendors_used.dedup();

    let gross: i64 = lines.iter().map(AssignedLine::gross_minor).sum();
    let fees: i64 = vendors_used
        .iter()
        .map(|vendor| ctx.delivery_fee_minor(vendor))
        .sum();

    Ok(PricedAssignment {
        line_discounts: resolution.line_discounts,
        vendors_used,
        total_cost_minor: gross - resolution.total_discount_minor + fees,
        discount_stable: resolution.stable,
    })
}

/// Index of the line to drop first under a hard cap: lowest preference
/// weight, ties by item id.
fn index_of_lowest_weight(
    ctx: &SearchContext<'_>,
    assigned: &[(&ItemNode, AssignedLine)],
) -> usize {
    let mut best = 0;
    let mut best_key: Option<(Decimal, &ItemId)> = None;

    for (idx, (item, _)) in assigned.iter().enumerate() {
        let key = (ctx.weights.weight(&item.category), &item.id);
        if best_key.is_none_or(|current| key < current) {
            best_key = Some(key);
            best = idx;
        }
    }

    best
}

/// Per-rule percentages grouped for the bound, so each rule's largest
/// possible discount is rounded exactly the way [`resolve`] rounds it.
/// Percent rules discount the raw line gross additively; rounding a combined
/// percentage once would drift from the resolver's per-rule rounding and
/// could overstate the floor.
#[derive(Debug)]
pub(crate) struct DiscountCeiling {
    category_percents: FxHashMap<Category, SmallVec<[Decimal; 2]>>,
    threshold_percents: FxHashMap<VendorId, SmallVec<[Decimal; 2]>>,
    bundle_off_minor: i64,
}

impl DiscountCeiling {
    pub(crate) fn new(rules: &[DiscountRule]) -> Self {
        let mut category_percents: FxHashMap<Category, SmallVec<[Decimal; 2]>> =
            FxHashMap::default();
        let mut threshold_percents: FxHashMap<VendorId, SmallVec<[Decimal; 2]>> =
            FxHashMap::default();
        let mut bundle_off_minor = 0i64;

        for rule in rules {
            match &rule.kind {
                RuleKind::CategoryPercent { category, percent } => {
                    category_percents
                        .entry(category.clone())
                        .or_default()
                        .push(*percent);
                }
                RuleKind::SpendThreshold {
                    vendor, percent, ..
                } => {
                    threshold_percents
                        .entry(vendor.clone())
                        .or_default()
                        .push(*percent);
                }
                RuleKind::Bundle { amount_off, .. } => {
                    bundle_off_minor =
                        bundle_off_minor.saturating_add(amount_off.to_minor_units());
                }
            }
        }

        Self {
            category_percents,
            threshold_percents,
            bundle_off_minor,
        }
    }

    /// The largest total discount [`resolve`] could grant a line of this
    /// category routed to this vendor, given its raw gross.
    fn line_off_minor(&self, category: &Category, vendor: &VendorId, gross_minor: i64) -> i64 {
        let category_off = self
            .category_percents
            .get(category)
            .map_or(0, |percents| rounded_percent_sum(percents, gross_minor));
        let threshold_off = self
            .threshold_percents
            .get(vendor)
            .map_or(0, |percents| rounded_percent_sum(percents, gross_minor));
        category_off.saturating_add(threshold_off)
    }
}

/// Each percentage rounded against the gross separately, matching the
/// resolver's one-round-per-rule arithmetic.
fn rounded_percent_sum(percents: &[Decimal], gross_minor: i64) -> i64 {
    percents
        .iter()
        .map(|percent| crate::rules::percent_of_minor(*percent, gross_minor).unwrap_or(0))
        .fold(0i64, i64::saturating_add)
}

/// A cost lower bound for every completion of a partial subset decision.
///
/// `allowed` is the union of already-included vendors and still-undecided
/// vendors. Per item: the cheapest allowed candidate, priced from its raw
/// line gross less the ceiling of every discount the resolver could grant
/// that line at that vendor; bundle amounts are subtracted once globally.
/// Fees are counted for included vendors only — a completion that leaves one
/// unused is equivalent to a sibling branch that excluded it, which the
/// search also visits.
///
/// Returns `None` when some item has no allowed vendor, i.e. no completion
/// of this subtree reaches full coverage.
pub(crate) fn lower_bound(
    ctx: &SearchContext<'_>,
    included: &[VendorId],
    undecided: &[VendorId],
    ceiling: &DiscountCeiling,
) -> Option<i64> {
    let mut total = 0i64;

    for &item in &ctx.items {
        let floor = ctx
            .top_candidates(item)
            .iter()
            .filter(|c| included.contains(&c.vendor) || undecided.contains(&c.vendor))
            .map(|c| {
                let gross = c
                    .unit_price
                    .to_minor_units()
                    .saturating_mul(i64::from(item.qty));
                gross
                    .saturating_sub(ceiling.line_off_minor(&item.category, &c.vendor, gross))
                    .max(0)
            })
            .min()?;

        total = total.saturating_add(floor);
    }

    for vendor in included {
        total = total.saturating_add(
            ctx.quotes
                .get(vendor)
                .map_or(0, |quote| quote.fee.to_minor_units()),
        );
    }

    Some(total.saturating_sub(ceiling.bundle_off_minor).max(0))
}
