//! In-memory collaborator sources for tests and the CLI.

use std::time::Duration;

use jiff::Timestamp;
use tokio::time::sleep;

use crate::{
    catalog::{ItemId, UserId, VendorId},
    delivery::{DeliveryEstimator, DeliveryQuote},
    offers::Offer,
    preferences::UserProfile,
    rules::DiscountRule,
    sources::{DeliverySource, OfferSource, ProfileSource, RuleSource, SourceError},
    vendors::{Location, Vendor},
};

/// Sources backed by fixed in-memory data.
///
/// Per-source artificial delays and outages make the planner's timeout
/// classes testable: delay a source past its class budget and the planner
/// must either fail retryably (critical) or degrade with a warning
/// (non-critical).
#[derive(Debug)]
pub struct StaticSources {
    offers: Vec<Offer>,
    rules: Vec<DiscountRule>,
    profile: UserProfile,
    estimator: DeliveryEstimator,
    offer_delay: Option<Duration>,
    rule_delay: Option<Duration>,
    profile_delay: Option<Duration>,
    delivery_delay: Option<Duration>,
    profile_unavailable: bool,
    offers_unavailable: bool,
}

impl StaticSources {
    /// Sources serving the given data with no delays or outages.
    #[must_use]
    pub fn new(
        offers: Vec<Offer>,
        rules: Vec<DiscountRule>,
        profile: UserProfile,
        vendors: Vec<Vendor>,
        distance_cache_ttl_secs: i64,
    ) -> Self {
        Self {
            offers,
            rules,
            profile,
            estimator: DeliveryEstimator::new(vendors, distance_cache_ttl_secs),
            offer_delay: None,
            rule_delay: None,
            profile_delay: None,
            delivery_delay: None,
            profile_unavailable: false,
            offers_unavailable: false,
        }
    }

    /// Delays every offer read.
    #[must_use]
    pub fn with_offer_delay(mut self, delay: Duration) -> Self {
        self.offer_delay = Some(delay);
        self
    }

    /// Delays every rule read.
    #[must_use]
    pub fn with_rule_delay(mut self, delay: Duration) -> Self {
        self.rule_delay = Some(delay);
        self
    }

    /// Delays every profile read.
    #[must_use]
    pub fn with_profile_delay(mut self, delay: Duration) -> Self {
        self.profile_delay = Some(delay);
        self
    }

    /// Delays every delivery quote.
    #[must_use]
    pub fn with_delivery_delay(mut self, delay: Duration) -> Self {
        self.delivery_delay = Some(delay);
        self
    }

    /// Makes profile reads fail outright.
    #[must_use]
    pub fn with_profile_unavailable(mut self) -> Self {
        self.profile_unavailable = true;
        self
    }

    /// Makes offer reads fail outright.
    #[must_use]
    pub fn with_offers_unavailable(mut self) -> Self {
        self.offers_unavailable = true;
        self
    }
}

impl OfferSource for StaticSources {
    async fn offers(&self, items: &[ItemId]) -> Result<Vec<Offer>, SourceError> {
        if let Some(delay) = self.offer_delay {
            sleep(delay).await;
        }
        if self.offers_unavailable {
            return Err(SourceError::Unavailable("offer feed offline".into()));
        }
        Ok(self
            .offers
            .iter()
            .filter(|offer| items.contains(&offer.item))
            .cloned()
            .collect())
    }
}

impl RuleSource for StaticSources {
    async fn active_rules(&self, vendors: &[VendorId]) -> Result<Vec<DiscountRule>, SourceError> {
        if let Some(delay) = self.rule_delay {
            sleep(delay).await;
        }
        Ok(self
            .rules
            .iter()
            .filter(|rule| rule_applies(rule, vendors))
            .cloned()
            .collect())
    }
}

impl ProfileSource for StaticSources {
    async fn profile(&self, user: &UserId) -> Result<UserProfile, SourceError> {
        if let Some(delay) = self.profile_delay {
            sleep(delay).await;
        }
        if self.profile_unavailable || &self.profile.user != user {
            return Err(SourceError::Unavailable(format!("no profile for {user}")));
        }
        Ok(self.profile.clone())
    }
}

impl DeliverySource for StaticSources {
    async fn quote(&self, vendor: &VendorId, at: Location) -> Result<DeliveryQuote, SourceError> {
        if let Some(delay) = self.delivery_delay {
            sleep(delay).await;
        }
        self.estimator
            .quote(vendor, at, Timestamp::now())
            .ok_or_else(|| SourceError::Unavailable(format!("unknown vendor {vendor}")))
    }
}

/// Vendor-scoped rules apply only when their vendor has offers in play;
/// category rules always apply.
fn rule_applies(rule: &DiscountRule, vendors: &[VendorId]) -> bool {
    match &rule.kind {
        crate::rules::RuleKind::SpendThreshold { vendor, .. }
        | crate::rules::RuleKind::Bundle { vendor, .. } => vendors.contains(vendor),
        crate::rules::RuleKind::CategoryPercent { .. } => true,
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use rusty_money::{Money, iso::EUR};
    use testresult::TestResult;

    use crate::{
        catalog::{Category, RuleId},
        preferences::PreferenceWeights,
        rules::RuleKind,
        vendors::DeliveryFeeSchedule,
    };

    use super::*;

    fn sources() -> StaticSources {
        let vendor = Vendor {
            id: VendorId::new("vendor-a"),
            name: "Alba Market".into(),
            location: Location { x_km: 3.0, y_km: 4.0 },
            fees: DeliveryFeeSchedule::Flat(Money::from_minor(250, EUR)),
            pickup_available: true,
        };
        let offer = Offer {
            vendor: VendorId::new("vendor-a"),
            item: ItemId::new("milk"),
            category: Category::new("dairy"),
            unit_price: Money::from_minor(100, EUR),
            available_qty: 5,
            seen_at: Timestamp::now(),
        };
        let rule = DiscountRule {
            id: RuleId::new("threshold-a"),
            priority: 10,
            kind: RuleKind::SpendThreshold {
                vendor: VendorId::new("vendor-b"),
                min_subtotal: Money::from_minor(500, EUR),
                percent: Decimal::new(10, 2),
            },
        };
        let profile = UserProfile {
            user: UserId::new("user-1"),
            weights: PreferenceWeights::uniform(),
            home: Location { x_km: 0.0, y_km: 0.0 },
        };

        StaticSources::new(vec![offer], vec![rule], profile, vec![vendor], 600)
    }

    #[tokio::test]
    async fn offers_filter_to_the_requested_items() -> TestResult {
        let sources = sources();

        let hits = sources.offers(&[ItemId::new("milk")]).await?;
        assert_eq!(hits.len(), 1);

        let misses = sources.offers(&[ItemId::new("rice")]).await?;
        assert!(misses.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn vendor_scoped_rules_need_their_vendor_in_play() -> TestResult {
        let sources = sources();

        let none = sources.active_rules(&[VendorId::new("vendor-a")]).await?;
        assert!(none.is_empty());

        let one = sources.active_rules(&[VendorId::new("vendor-b")]).await?;
        assert_eq!(one.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn quotes_come_from_the_estimator() -> TestResult {
        let sources = sources();

        let quote = sources
            .quote(&VendorId::new("vendor-a"), Location { x_km: 0.0, y_km: 0.0 })
            .await?;

        // 3-4-5 triangle, flat fee.
        assert!((quote.distance_km - 5.0).abs() < 1e-9);
        assert_eq!(quote.fee, Money::from_minor(250, EUR));
        assert!(quote.pickup_available);

        Ok(())
    }

    #[tokio::test]
    async fn unknown_users_and_vendors_are_unavailable() {
        let sources = sources();

        let profile = sources.profile(&UserId::new("stranger")).await;
        assert!(matches!(profile, Err(SourceError::Unavailable(_))));

        let quote = sources
            .quote(&VendorId::new("vendor-x"), Location { x_km: 0.0, y_km: 0.0 })
            .await;
        assert!(matches!(quote, Err(SourceError::Unavailable(_))));
    }
}
