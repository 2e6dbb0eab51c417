//! Vendors, locations and delivery fee schedules.

use serde::{Deserialize, Serialize};

use crate::{Amount, catalog::VendorId};

/// A planar location in kilometres from an arbitrary city origin.
///
/// The engine only ever needs relative distances, so a flat grid is enough;
/// geodesic precision is a concern of the upstream distance service.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// East-west coordinate in kilometres.
    pub x_km: f64,

    /// North-south coordinate in kilometres.
    pub y_km: f64,
}

impl Location {
    /// Straight-line distance to another location in kilometres.
    #[must_use]
    pub fn distance_km(&self, other: Location) -> f64 {
        (self.x_km - other.x_km).hypot(self.y_km - other.y_km)
    }
}

/// One tier of a distance-tiered delivery fee schedule.
#[derive(Clone, Debug, PartialEq)]
pub struct DistanceTier {
    /// Upper bound of the tier in kilometres (inclusive).
    pub up_to_km: f64,

    /// Fee charged for deliveries within this tier.
    pub fee: Amount,
}

/// How a vendor charges for delivery.
///
/// The fee is charged once per vendor activated in a plan, never per item.
#[derive(Clone, Debug, PartialEq)]
pub enum DeliveryFeeSchedule {
    /// Same fee regardless of distance.
    Flat(Amount),

    /// Fee by distance band; tiers must be sorted ascending by `up_to_km`.
    /// Distances beyond the last tier pay the last tier's fee.
    DistanceTiered(Vec<DistanceTier>),
}

impl DeliveryFeeSchedule {
    /// The delivery fee for a given straight-line distance.
    ///
    /// An empty tier list charges nothing; schedules from fixtures and
    /// collaborators are validated before they get here.
    #[must_use]
    pub fn fee_for(&self, distance_km: f64, currency: &'static rusty_money::iso::Currency) -> Amount {
        match self {
            DeliveryFeeSchedule::Flat(fee) => *fee,
            DeliveryFeeSchedule::DistanceTiered(tiers) => tiers
                .iter()
                .find(|tier| distance_km <= tier.up_to_km)
                .or_else(|| tiers.last())
                .map_or_else(|| rusty_money::Money::from_minor(0, currency), |tier| tier.fee),
        }
    }
}

/// A sellable location, read-only for the lifetime of a planning request.
#[derive(Clone, Debug, PartialEq)]
pub struct Vendor {
    /// Vendor id.
    pub id: VendorId,

    /// Human-readable vendor name.
    pub name: String,

    /// Vendor location on the planning grid.
    pub location: Location,

    /// How this vendor charges for delivery.
    pub fees: DeliveryFeeSchedule,

    /// Whether customers may collect orders in person.
    pub pickup_available: bool,
}

#[cfg(test)]
mod tests {
    use rusty_money::{Money, iso::EUR};

    use super::*;

    #[test]
    fn distance_is_euclidean() {
        let a = Location { x_km: 0.0, y_km: 0.0 };
        let b = Location { x_km: 3.0, y_km: 4.0 };

        assert!((a.distance_km(b) - 5.0).abs() < f64::EPSILON, "3-4-5 triangle");
    }

    #[test]
    fn flat_fee_ignores_distance() {
        let schedule = DeliveryFeeSchedule::Flat(Money::from_minor(300, EUR));

        assert_eq!(schedule.fee_for(0.1, EUR), Money::from_minor(300, EUR));
        assert_eq!(schedule.fee_for(99.0, EUR), Money::from_minor(300, EUR));
    }

    #[test]
    fn tiered_fee_picks_first_matching_band() {
        let schedule = DeliveryFeeSchedule::DistanceTiered(vec![
            DistanceTier {
                up_to_km: 2.0,
                fee: Money::from_minor(200, EUR),
            },
            DistanceTier {
                up_to_km: 5.0,
                fee: Money::from_minor(450, EUR),
            },
        ]);

        assert_eq!(schedule.fee_for(1.5, EUR), Money::from_minor(200, EUR));
        assert_eq!(schedule.fee_for(3.0, EUR), Money::from_minor(450, EUR));
        // Beyond the last band, the last band's fee applies.
        assert_eq!(schedule.fee_for(12.0, EUR), Money::from_minor(450, EUR));
    }
}
