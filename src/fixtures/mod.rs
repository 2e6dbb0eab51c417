//! YAML scenario fixtures for tests and the CLI.
//!
//! A scenario file bundles everything one planning request needs: a vendor
//! table, an offer snapshot, discount rules, a shopper profile and the
//! request itself. [`Scenario::sources`] turns it into an in-memory
//! [`StaticSources`] for the planner.

use std::{fs, path::Path};

use jiff::{SignedDuration, Timestamp};
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use rusty_money::{Money, iso::Currency};
use serde::Deserialize;
use thiserror::Error;

use crate::{
    catalog::{Category, ItemId, RuleId, UserId, VendorId},
    offers::Offer,
    preferences::{PreferenceWeights, UserProfile},
    request::PlanRequest,
    rules::{DiscountRule, RuleKind},
    vendors::{DeliveryFeeSchedule, DistanceTier, Location, Vendor},
};

pub mod sources;

pub use sources::StaticSources;

/// Fixture parsing errors.
#[derive(Debug, Error)]
pub enum FixtureError {
    /// IO error reading a fixture file.
    #[error("failed to read fixture file: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_norway::Error),

    /// Unknown currency code.
    #[error("unknown currency code: {0}")]
    UnknownCurrency(String),

    /// An offer references a vendor the scenario does not define.
    #[error("offer references unknown vendor: {0}")]
    UnknownVendor(String),
}

#[derive(Debug, Deserialize)]
struct ScenarioFile {
    currency: String,
    user: String,
    home: Location,
    vendors: Vec<VendorFixture>,
    offers: Vec<OfferFixture>,
    #[serde(default)]
    rules: Vec<RuleFixture>,
    #[serde(default)]
    weights: FxHashMap<String, Decimal>,
    request: PlanRequest,
}

#[derive(Debug, Deserialize)]
struct VendorFixture {
    id: String,
    name: String,
    location: Location,
    #[serde(with = "serde_norway::with::singleton_map")]
    fees: FeeFixture,
    pickup_available: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum FeeFixture {
    /// Flat fee in minor units.
    Flat(i64),

    /// Distance tiers, fees in minor units.
    Tiers(Vec<TierFixture>),
}

#[derive(Debug, Deserialize)]
struct TierFixture {
    up_to_km: f64,
    fee: i64,
}

#[derive(Debug, Deserialize)]
struct OfferFixture {
    vendor: String,
    item: String,
    category: String,
    unit_price: i64,
    available_qty: u32,
    #[serde(default)]
    age_secs: i64,
}

#[derive(Debug, Deserialize)]
struct RuleFixture {
    id: String,
    priority: u32,
    #[serde(with = "serde_norway::with::singleton_map")]
    kind: RuleKindFixture,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RuleKindFixture {
    SpendThreshold {
        vendor: String,
        min_subtotal: i64,
        percent: Decimal,
    },
    Bundle {
        vendor: String,
        items: Vec<String>,
        amount_off: i64,
    },
    CategoryPercent {
        category: String,
        percent: Decimal,
    },
}

/// A fully resolved scenario.
#[derive(Debug)]
pub struct Scenario {
    /// Scenario currency.
    pub currency: &'static Currency,

    /// Vendor table.
    pub vendors: Vec<Vendor>,

    /// Offer snapshot, ages resolved against `loaded_at`.
    pub offers: Vec<Offer>,

    /// Active discount rules.
    pub rules: Vec<DiscountRule>,

    /// Shopper profile.
    pub profile: UserProfile,

    /// The planning request to run.
    pub request: PlanRequest,

    /// When the scenario was loaded; offer ages are relative to this.
    pub loaded_at: Timestamp,
}

impl Scenario {
    /// Loads a scenario from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns a [`FixtureError`] if the file cannot be read or parsed, the
    /// currency is unknown, or an offer references an undefined vendor.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FixtureError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Loads the named scenario from the crate's `fixtures/` directory.
    ///
    /// # Errors
    ///
    /// See [`Scenario::load`].
    pub fn from_set(name: &str) -> Result<Self, FixtureError> {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("fixtures")
            .join(format!("{name}.yaml"));
        Self::load(path)
    }

    /// Parses a scenario from YAML text.
    ///
    /// # Errors
    ///
    /// See [`Scenario::load`].
    pub fn from_yaml(contents: &str) -> Result<Self, FixtureError> {
        let file: ScenarioFile = serde_norway::from_str(contents)?;
        let loaded_at = Timestamp::now();

        let currency = rusty_money::iso::find(&file.currency)
            .ok_or_else(|| FixtureError::UnknownCurrency(file.currency.clone()))?;

        let vendors: Vec<Vendor> = file
            .vendors
            .into_iter()
            .map(|v| resolve_vendor(v, currency))
            .collect();

        let offers = file
            .offers
            .into_iter()
            .map(|o| {
                if !vendors.iter().any(|v| v.id.as_str() == o.vendor) {
                    return Err(FixtureError::UnknownVendor(o.vendor));
                }
                Ok(Offer {
                    vendor: VendorId::new(o.vendor),
                    item: ItemId::new(o.item),
                    category: Category::new(o.category),
                    unit_price: Money::from_minor(o.unit_price, currency),
                    available_qty: o.available_qty,
                    seen_at: loaded_at - SignedDuration::from_secs(o.age_secs),
                })
            })
            .collect::<Result<Vec<Offer>, FixtureError>>()?;

        let rules = file
            .rules
            .into_iter()
            .map(|r| resolve_rule(r, currency))
            .collect();

        let weights = PreferenceWeights::from_pairs(
            file.weights
                .into_iter()
                .map(|(category, weight)| (Category::new(category), weight)),
        );

        let profile = UserProfile {
            user: UserId::new(file.user),
            weights,
            home: file.home,
        };

        Ok(Self {
            currency,
            vendors,
            offers,
            rules,
            profile,
            request: file.request,
            loaded_at,
        })
    }

    /// In-memory sources serving this scenario's data.
    #[must_use]
    pub fn sources(&self, distance_cache_ttl_secs: i64) -> StaticSources {
        StaticSources::new(
            self.offers.clone(),
            self.rules.clone(),
            self.profile.clone(),
            self.vendors.clone(),
            distance_cache_ttl_secs,
        )
    }
}

fn resolve_vendor(fixture: VendorFixture, currency: &'static Currency) -> Vendor {
    let fees = match fixture.fees {
        FeeFixture::Flat(minor) => DeliveryFeeSchedule::Flat(Money::from_minor(minor, currency)),
        FeeFixture::Tiers(tiers) => DeliveryFeeSchedule::DistanceTiered(
            tiers
                .into_iter()
                .map(|t| DistanceTier {
                    up_to_km: t.up_to_km,
                    fee: Money::from_minor(t.fee, currency),
                })
                .collect(),
        ),
    };

    Vendor {
        id: VendorId::new(fixture.id),
        name: fixture.name,
        location: fixture.location,
        fees,
        pickup_available: fixture.pickup_available,
    }
}

fn resolve_rule(fixture: RuleFixture, currency: &'static Currency) -> DiscountRule {
    let kind = match fixture.kind {
        RuleKindFixture::SpendThreshold {
            vendor,
            min_subtotal,
            percent,
        } => RuleKind::SpendThreshold {
            vendor: VendorId::new(vendor),
            min_subtotal: Money::from_minor(min_subtotal, currency),
            percent,
        },
        RuleKindFixture::Bundle {
            vendor,
            items,
            amount_off,
        } => RuleKind::Bundle {
            vendor: VendorId::new(vendor),
            items: items.into_iter().map(ItemId::new).collect(),
            amount_off: Money::from_minor(amount_off, currency),
        },
        RuleKindFixture::CategoryPercent { category, percent } => RuleKind::CategoryPercent {
            category: Category::new(category),
            percent,
        },
    };

    DiscountRule {
        id: RuleId::new(fixture.id),
        priority: fixture.priority,
        kind,
    }
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;

    use super::*;

    const SCENARIO: &str = r#"
currency: EUR
user: user-1
home: { x_km: 0.0, y_km: 0.0 }
vendors:
  - id: vendor-a
    name: Alba Market
    location: { x_km: 1.0, y_km: 0.0 }
    fees: { flat: 0 }
    pickup_available: true
  - id: vendor-b
    name: Borgo Foods
    location: { x_km: 0.0, y_km: 2.0 }
    fees:
      tiers:
        - { up_to_km: 1.0, fee: 100 }
        - { up_to_km: 5.0, fee: 300 }
    pickup_available: false
offers:
  - { vendor: vendor-a, item: milk, category: dairy, unit_price: 100, available_qty: 10 }
  - { vendor: vendor-b, item: milk, category: dairy, unit_price: 90, available_qty: 10, age_secs: 60 }
rules:
  - id: dairy-sale
    priority: 10
    kind:
      category_percent: { category: dairy, percent: "0.10" }
weights:
  dairy: "1.5"
request:
  user_id: user-1
  items:
    - { item_id: milk, category: dairy, qty: 1 }
"#;

    #[test]
    fn scenarios_parse_into_domain_types() -> TestResult {
        let scenario = Scenario::from_yaml(SCENARIO)?;

        assert_eq!(scenario.currency.iso_alpha_code, "EUR");
        assert_eq!(scenario.vendors.len(), 2);
        assert_eq!(scenario.offers.len(), 2);
        assert_eq!(scenario.rules.len(), 1);
        assert_eq!(scenario.request.items.len(), 1);
        assert_eq!(
            scenario.profile.weights.weight(&Category::new("dairy")),
            Decimal::new(15, 1)
        );

        let aged = scenario
            .offers
            .iter()
            .find(|o| o.vendor == VendorId::new("vendor-b"))
            .ok_or("vendor-b offer missing")?;
        assert!(aged.seen_at < scenario.loaded_at);

        Ok(())
    }

    #[test]
    fn scenarios_load_from_files() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("scenario.yaml");
        std::fs::write(&path, SCENARIO)?;

        let scenario = Scenario::load(&path)?;

        assert_eq!(scenario.vendors.len(), 2);

        Ok(())
    }

    #[test]
    fn offers_must_reference_defined_vendors() {
        let bad = SCENARIO.replace("vendor: vendor-b", "vendor: vendor-x");
        let err = Scenario::from_yaml(&bad);

        assert!(matches!(err, Err(FixtureError::UnknownVendor(v)) if v == "vendor-x"));
    }

    #[test]
    fn unknown_currencies_are_rejected() {
        let bad = SCENARIO.replace("currency: EUR", "currency: ZZZ");
        let err = Scenario::from_yaml(&bad);

        assert!(matches!(err, Err(FixtureError::UnknownCurrency(c)) if c == "ZZZ"));
    }
}
