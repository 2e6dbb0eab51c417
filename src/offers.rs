//! Offer snapshot rows.

use jiff::Timestamp;

use crate::{
    Amount,
    catalog::{Category, ItemId, VendorId},
};

/// A vendor's stated price and availability for one item at a point in time.
///
/// Offers arrive as a read-only snapshot from an external source and are never
/// mutated during planning. Rows older than the freshness TTL are excluded
/// before the search begins.
#[derive(Clone, Debug, PartialEq)]
pub struct Offer {
    /// The vendor stating the offer.
    pub vendor: VendorId,

    /// The offered item.
    pub item: ItemId,

    /// Category of the offered item, denormalised onto the snapshot row.
    pub category: Category,

    /// Stated price per unit.
    pub unit_price: Amount,

    /// Units available at this vendor.
    pub available_qty: u32,

    /// When the price/availability was last observed.
    pub seen_at: Timestamp,
}

impl Offer {
    /// Whether the offer is fresh at `now` under a TTL in seconds.
    #[must_use]
    pub fn is_fresh(&self, now: Timestamp, ttl_secs: i64) -> bool {
        now.as_second().saturating_sub(self.seen_at.as_second()) <= ttl_secs
    }
}

#[cfg(test)]
mod tests {
    use rusty_money::{Money, iso::EUR};

    use super::*;

    fn offer(seen_at: Timestamp) -> Offer {
        Offer {
            vendor: VendorId::new("vendor-a"),
            item: ItemId::new("milk"),
            category: Category::new("dairy"),
            unit_price: Money::from_minor(100, EUR),
            available_qty: 3,
            seen_at,
        }
    }

    #[test]
    fn fresh_within_ttl() {
        let now = Timestamp::UNIX_EPOCH;

        assert!(offer(now).is_fresh(now, 0), "same-instant offer is fresh");
    }

    #[test]
    fn stale_beyond_ttl() -> testresult::TestResult {
        let seen = Timestamp::from_second(0)?;
        let now = Timestamp::from_second(901)?;

        assert!(!offer(seen).is_fresh(now, 900), "past the TTL must be stale");

        Ok(())
    }

    #[test]
    fn future_timestamps_count_as_fresh() -> testresult::TestResult {
        // Clock skew between sources must not discard otherwise-valid rows.
        let seen = Timestamp::from_second(100)?;
        let now = Timestamp::from_second(0)?;

        assert!(offer(seen).is_fresh(now, 900), "future-seen offer is fresh");

        Ok(())
    }
}
