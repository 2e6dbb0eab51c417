//! Builder for constructing offer graphs from snapshots.

use jiff::Timestamp;
use rustc_hash::FxHashMap;
use rusty_money::iso::Currency;
use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::{
    catalog::{Category, ItemId, RequestedItem, VendorId},
    graph::{Candidate, GraphError, ItemKey, ItemNode, OfferGraph},
    offers::Offer,
    rules::{DiscountRule, RuleError, percent_of_minor},
};

/// Builder for constructing an [`OfferGraph`].
///
/// Pure transform of a `(request, snapshot)` pair: filters offers for
/// freshness, sufficient quantity and category compatibility, prices the
/// survivors with statically-knowable per-unit discounts, and orders each
/// item's candidates by `(effective unit cost, vendor id)` so downstream
/// search is deterministic.
#[derive(Debug)]
pub struct OfferGraphBuilder {
    now: Timestamp,
    freshness_ttl_secs: i64,
}

impl OfferGraphBuilder {
    /// Create a builder evaluating freshness at `now` under a TTL in seconds.
    #[must_use]
    pub fn new(now: Timestamp, freshness_ttl_secs: i64) -> Self {
        Self {
            now,
            freshness_ttl_secs,
        }
    }

    /// Build the graph.
    ///
    /// Items with zero surviving offers are recorded as unfulfillable and are
    /// not retried later in the pipeline.
    ///
    /// # Errors
    ///
    /// Returns a [`GraphError`] if an item is requested twice, an offer is
    /// priced in a different currency than the snapshot, or a static
    /// percentage cannot be applied to a unit price.
    pub fn build(
        &self,
        requested: &[RequestedItem],
        offers: &[Offer],
        rules: &[DiscountRule],
        currency: &'static Currency,
    ) -> Result<OfferGraph, GraphError> {
        let mut items: SlotMap<ItemKey, ItemNode> = SlotMap::with_key();
        let mut by_id: FxHashMap<ItemId, ItemKey> = FxHashMap::default();
        let mut unfulfillable = Vec::new();

        for line in requested {
            if by_id.contains_key(&line.item) {
                return Err(GraphError::DuplicateItem(line.item.clone()));
            }

            let candidates = self.candidates_for(line, offers, rules, currency)?;

            if candidates.is_empty() {
                unfulfillable.push(line.item.clone());
                // Reserve the id so a duplicate request line is still caught.
                by_id.insert(line.item.clone(), ItemKey::default());
                continue;
            }

            let key = items.insert(ItemNode {
                id: line.item.clone(),
                category: line.category.clone(),
                qty: line.qty,
                candidates,
            });
            by_id.insert(line.item.clone(), key);
        }

        // Unfulfillable entries point at a sentinel key; drop them from the
        // lookup map so `get` answers only for fulfillable items.
        for id in &unfulfillable {
            by_id.remove(id);
        }

        Ok(OfferGraph::new(items, by_id, unfulfillable, currency))
    }

    /// Eligible candidates for one requested line, cheapest first.
    fn candidates_for(
        &self,
        line: &RequestedItem,
        offers: &[Offer],
        rules: &[DiscountRule],
        currency: &'static Currency,
    ) -> Result<SmallVec<[Candidate; 5]>, GraphError> {
        // Deterministic pass order regardless of snapshot row order.
        let mut rows: Vec<&Offer> = offers.iter().filter(|o| o.item == line.item).collect();
        rows.sort_by(|a, b| {
            (
                &a.vendor,
                std::cmp::Reverse(a.seen_at),
                a.unit_price.to_minor_units(),
            )
                .cmp(&(
                    &b.vendor,
                    std::cmp::Reverse(b.seen_at),
                    b.unit_price.to_minor_units(),
                ))
        });

        let mut per_vendor: FxHashMap<&VendorId, &Offer> = FxHashMap::default();

        for offer in rows {
            if offer.unit_price.currency() != currency {
                return Err(GraphError::CurrencyMismatch {
                    item: offer.item.clone(),
                    vendor: offer.vendor.clone(),
                    found: offer.unit_price.currency().iso_alpha_code,
                    expected: currency.iso_alpha_code,
                });
            }

            if !offer.is_fresh(self.now, self.freshness_ttl_secs) {
                continue;
            }

            if offer.available_qty < line.qty {
                continue;
            }

            // Rows disagreeing with the requested category are
            // category-incompatible snapshot noise.
            if offer.category != line.category {
                continue;
            }

            // Freshest row per vendor wins; the sort above puts it first.
            per_vendor.entry(&offer.vendor).or_insert(offer);
        }

        let mut candidates: SmallVec<[Candidate; 5]> = SmallVec::new();
        for offer in per_vendor.into_values() {
            let unit_minor = offer.unit_price.to_minor_units();
            let effective_unit_minor = effective_unit_minor(unit_minor, &line.category, rules)
                .map_err(GraphError::Rule)?;

            candidates.push(Candidate {
                vendor: offer.vendor.clone(),
                unit_price: offer.unit_price,
                effective_unit_minor,
                available_qty: offer.available_qty,
            });
        }

        candidates.sort_by(|a, b| {
            (a.effective_unit_minor, &a.vendor).cmp(&(b.effective_unit_minor, &b.vendor))
        });

        Ok(candidates)
    }
}

/// Unit price less all static category-percent discounts, floored at zero.
fn effective_unit_minor(
    unit_minor: i64,
    category: &Category,
    rules: &[DiscountRule],
) -> Result<i64, RuleError> {
    let mut effective = unit_minor;

    for rule in rules {
        if let Some(percent) = rule.static_unit_percent(category) {
            let off = percent_of_minor(percent, unit_minor)
                .ok_or_else(|| RuleError::PercentConversion(rule.id.clone()))?;
            effective = effective.saturating_sub(off);
        }
    }

    Ok(effective.max(0))
}
