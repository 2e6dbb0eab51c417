//! Offer Graph
//!
//! A bipartite item-to-vendor structure built from a read-only offer snapshot.
//! Each requested item maps to an ordered list of eligible `(vendor,
//! effective unit cost)` candidates; items with no surviving offer are marked
//! unfulfillable at build time and never retried.

use rustc_hash::FxHashMap;
use rusty_money::iso::Currency;
use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

use crate::{
    Amount,
    catalog::{Category, ItemId, VendorId},
};

pub mod builder;
pub mod error;

pub use builder::OfferGraphBuilder;
pub use error::GraphError;

new_key_type! {
    /// Key of a requested item inside an offer graph.
    pub struct ItemKey;
}

/// One eligible vendor for an item, with its effective unit cost.
///
/// The effective cost excludes delivery (charged per activated vendor, not per
/// item) but includes statically-knowable per-unit discounts, so it is the
/// right metric for candidate ordering and search bounds. Actual plan costing
/// always re-prices raw unit prices through the discount resolver.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    /// Vendor stating the offer.
    pub vendor: VendorId,

    /// Raw, pre-discount unit price.
    pub unit_price: Amount,

    /// Unit cost in minor units after static per-unit discounts.
    pub effective_unit_minor: i64,

    /// Units available at this vendor.
    pub available_qty: u32,
}

/// A requested item together with its eligible candidates, ordered by
/// `(effective unit cost, vendor id)`.
#[derive(Clone, Debug, PartialEq)]
pub struct ItemNode {
    /// Item id.
    pub id: ItemId,

    /// Item category, taken from the surviving snapshot rows.
    pub category: Category,

    /// Requested quantity.
    pub qty: u32,

    /// Eligible vendors, cheapest first.
    pub candidates: SmallVec<[Candidate; 5]>,
}

impl ItemNode {
    /// The cheapest candidate, if any.
    #[must_use]
    pub fn cheapest(&self) -> Option<&Candidate> {
        self.candidates.first()
    }

    /// The candidate at a specific vendor, if eligible.
    #[must_use]
    pub fn candidate_at(&self, vendor: &VendorId) -> Option<&Candidate> {
        self.candidates.iter().find(|c| &c.vendor == vendor)
    }
}

/// The search space for one planning request: a pure transform of the
/// `(request, snapshot)` pair, immutable once built.
#[derive(Clone, Debug)]
pub struct OfferGraph {
    items: SlotMap<ItemKey, ItemNode>,
    by_id: FxHashMap<ItemId, ItemKey>,
    unfulfillable: Vec<ItemId>,
    currency: &'static Currency,
}

impl OfferGraph {
    pub(crate) fn new(
        items: SlotMap<ItemKey, ItemNode>,
        by_id: FxHashMap<ItemId, ItemKey>,
        unfulfillable: Vec<ItemId>,
        currency: &'static Currency,
    ) -> Self {
        Self {
            items,
            by_id,
            unfulfillable,
            currency,
        }
    }

    /// Fulfillable items in request order.
    pub fn items(&self) -> impl Iterator<Item = &ItemNode> {
        self.items.values()
    }

    /// Number of fulfillable items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no item has any eligible vendor.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Look up an item node by id.
    #[must_use]
    pub fn get(&self, id: &ItemId) -> Option<&ItemNode> {
        self.by_id.get(id).and_then(|key| self.items.get(*key))
    }

    /// Items that had zero surviving offers, in request order.
    #[must_use]
    pub fn unfulfillable(&self) -> &[ItemId] {
        &self.unfulfillable
    }

    /// Snapshot currency.
    #[must_use]
    pub fn currency(&self) -> &'static Currency {
        self.currency
    }

    /// All candidate vendors across items, sorted and de-duplicated.
    #[must_use]
    pub fn vendors(&self) -> Vec<VendorId> {
        let mut vendors: Vec<VendorId> = self
            .items
            .values()
            .flat_map(|item| item.candidates.iter().map(|c| c.vendor.clone()))
            .collect();
        vendors.sort();
        vendors.dedup();
        vendors
    }
}
