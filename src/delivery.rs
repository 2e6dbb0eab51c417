//! Distance and delivery cost estimation.

use std::sync::Mutex;

use jiff::Timestamp;
use rust_decimal::{
    Decimal, RoundingStrategy,
    prelude::{FromPrimitive, ToPrimitive},
};
use rustc_hash::FxHashMap;

use crate::{
    Amount,
    catalog::VendorId,
    vendors::{Location, Vendor},
};

/// Per-vendor delivery terms for one user location.
///
/// The fee is charged once per vendor activated in a plan. The distance rides
/// along so the assembler can price the pickup alternative.
#[derive(Clone, Debug, PartialEq)]
pub struct DeliveryQuote {
    /// Delivery fee for this vendor and location.
    pub fee: Amount,

    /// Whether in-person pickup is possible at this vendor.
    pub pickup_available: bool,

    /// Straight-line distance between vendor and user in kilometres.
    pub distance_km: f64,
}

/// Time-bounded cache of vendor distance calculations.
///
/// The only state shared across planning requests: concurrent reads and
/// writes go through a mutex, entries expire after a TTL, and nothing in here
/// carries planning-request identity. User locations are bucketed to a
/// 100-metre grid so nearby requests share entries.
#[derive(Debug)]
pub struct DistanceCache {
    entries: Mutex<FxHashMap<(VendorId, GridCell), CachedDistance>>,
    ttl_secs: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct GridCell(i64, i64);

impl GridCell {
    fn from_location(location: Location) -> Self {
        // 0.1 km buckets; `round` keeps the mapping stable either side of zero.
        #[expect(
            clippy::cast_possible_truncation,
            reason = "coordinates are city-scale kilometres, far inside i64 range"
        )]
        Self(
            (location.x_km * 10.0).round() as i64,
            (location.y_km * 10.0).round() as i64,
        )
    }
}

#[derive(Clone, Copy, Debug)]
struct CachedDistance {
    distance_km: f64,
    computed_at: Timestamp,
}

impl DistanceCache {
    /// Create a cache whose entries expire after `ttl_secs`.
    #[must_use]
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
            ttl_secs,
        }
    }

    /// Distance between a vendor and a user location, cached under the TTL.
    ///
    /// Falls back to a direct computation if the cache mutex was poisoned by
    /// a panicking thread; a stale lock must never fail a planning request.
    #[must_use]
    pub fn distance_km(&self, vendor: &Vendor, user: Location, now: Timestamp) -> f64 {
        let cell = GridCell::from_location(user);
        let key = (vendor.id.clone(), cell);

        let Ok(mut entries) = self.entries.lock() else {
            return vendor.location.distance_km(user);
        };

        if let Some(cached) = entries.get(&key) {
            if now.as_second().saturating_sub(cached.computed_at.as_second()) <= self.ttl_secs {
                return cached.distance_km;
            }
        }

        let distance_km = vendor.location.distance_km(user);
        entries.insert(
            key,
            CachedDistance {
                distance_km,
                computed_at: now,
            },
        );

        distance_km
    }

    /// Number of live entries, for tests and diagnostics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Computes per-vendor delivery quotes for a user location.
///
/// This is the engine's built-in distance/delivery collaborator; deployments
/// with a real logistics service swap it out behind the same source trait.
#[derive(Debug)]
pub struct DeliveryEstimator {
    vendors: FxHashMap<VendorId, Vendor>,
    cache: DistanceCache,
}

impl DeliveryEstimator {
    /// Create an estimator over a vendor table, caching distances for
    /// `cache_ttl_secs`.
    pub fn new(vendors: impl IntoIterator<Item = Vendor>, cache_ttl_secs: i64) -> Self {
        Self {
            vendors: vendors
                .into_iter()
                .map(|vendor| (vendor.id.clone(), vendor))
                .collect(),
            cache: DistanceCache::new(cache_ttl_secs),
        }
    }

    /// The delivery quote for one vendor at a user location, if the vendor is
    /// known.
    #[must_use]
    pub fn quote(&self, vendor_id: &VendorId, user: Location, now: Timestamp) -> Option<DeliveryQuote> {
        let vendor = self.vendors.get(vendor_id)?;
        let distance_km = self.cache.distance_km(vendor, user, now);
        let currency = match &vendor.fees {
            crate::vendors::DeliveryFeeSchedule::Flat(fee) => fee.currency(),
            crate::vendors::DeliveryFeeSchedule::DistanceTiered(tiers) => {
                tiers.first().map(|t| t.fee.currency())?
            }
        };

        Some(DeliveryQuote {
            fee: vendor.fees.fee_for(distance_km, currency),
            pickup_available: vendor.pickup_available,
            distance_km,
        })
    }

    /// Ids of all known vendors, sorted.
    #[must_use]
    pub fn vendor_ids(&self) -> Vec<VendorId> {
        let mut ids: Vec<VendorId> = self.vendors.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Round-trip pickup travel cost in minor units for a distance, at a per-km
/// rate. `None` when the inputs cannot be represented exactly.
#[must_use]
pub fn pickup_travel_cost_minor(distance_km: f64, per_km_minor: i64) -> Option<i64> {
    let distance = Decimal::from_f64_retain(distance_km)?;
    let rate = Decimal::from_i64(per_km_minor)?;

    distance
        .checked_mul(rate)?
        .checked_mul(Decimal::TWO)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}
