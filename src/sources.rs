//! Collaborator contracts and snapshot assembly.
//!
//! All four collaborators are read-only with snapshot semantics. Offers and
//! discount rules are critical: if they cannot be fetched in time the request
//! fails with a retryable error. Preferences and delivery quotes are
//! non-critical: on timeout the engine proceeds with defaults and surfaces a
//! warning in the response.

use std::time::Duration;

use jiff::Timestamp;
use rustc_hash::FxHashMap;
use rusty_money::{Money, iso::Currency};
use thiserror::Error;
use tokio::time::timeout;

use crate::{
    catalog::{ItemId, UserId, VendorId},
    config::PlannerConfig,
    delivery::DeliveryQuote,
    error::{PlanError, PlanWarning},
    offers::Offer,
    preferences::UserProfile,
    rules::{DiscountRule, RuleKind},
    vendors::Location,
};

/// Failure of a single collaborator read.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source is unreachable or returned an error.
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// The source did not answer within its timeout class.
    #[error("source timed out after {after_ms}ms")]
    Timeout {
        /// The timeout that elapsed.
        after_ms: u64,
    },
}

/// Live per-vendor price and availability data.
pub trait OfferSource {
    /// All current offers for the given items.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] if the source is unreachable.
    async fn offers(&self, items: &[ItemId]) -> Result<Vec<Offer>, SourceError>;
}

/// Active promotion rules.
pub trait RuleSource {
    /// Rules active at the given vendors (plus any vendor-independent rules).
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] if the source is unreachable.
    async fn active_rules(&self, vendors: &[VendorId]) -> Result<Vec<DiscountRule>, SourceError>;
}

/// Shopper profiles from the personalisation collaborator.
pub trait ProfileSource {
    /// The profile (preference weights, home location) for a shopper.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] if the source is unreachable.
    async fn profile(&self, user: &UserId) -> Result<UserProfile, SourceError>;
}

/// Delivery fees and pickup feasibility per vendor.
pub trait DeliverySource {
    /// The delivery quote for one vendor at a location.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] if the source is unreachable.
    async fn quote(&self, vendor: &VendorId, at: Location) -> Result<DeliveryQuote, SourceError>;
}

/// All four collaborators behind one bound, for the planner's convenience.
pub trait Sources: OfferSource + RuleSource + ProfileSource + DeliverySource {}

impl<T: OfferSource + RuleSource + ProfileSource + DeliverySource> Sources for T {}

/// A read-only snapshot of everything one planning request needs.
///
/// Taken once per request; the engine never re-reads a source mid-search, so
/// the same snapshot always produces the same plan.
#[derive(Debug)]
pub struct Snapshot {
    /// When the snapshot was taken.
    pub taken_at: Timestamp,

    /// Snapshot currency.
    pub currency: &'static Currency,

    /// Offer rows for the requested items.
    pub offers: Vec<Offer>,

    /// Active discount rules.
    pub rules: Vec<DiscountRule>,

    /// Shopper profile, possibly a fallback.
    pub profile: UserProfile,

    /// Delivery quotes per candidate vendor, possibly fallbacks.
    pub quotes: FxHashMap<VendorId, DeliveryQuote>,

    /// Degradations that occurred while taking the snapshot.
    pub warnings: Vec<PlanWarning>,
}

impl Snapshot {
    /// A canonical, order-independent rendering of the snapshot contents,
    /// used to derive deterministic plan ids.
    #[must_use]
    pub fn canonical_string(&self) -> String {
        use std::fmt::Write as _;

        let mut out = String::new();
        let _ = write!(out, "currency={};", self.currency.iso_alpha_code);

        let mut offers: Vec<&Offer> = self.offers.iter().collect();
        offers.sort_by(|a, b| {
            (&a.item, &a.vendor, a.seen_at).cmp(&(&b.item, &b.vendor, b.seen_at))
        });
        for o in offers {
            let _ = write!(
                out,
                "offer={}|{}|{}|{}|{};",
                o.item,
                o.vendor,
                o.unit_price.to_minor_units(),
                o.available_qty,
                o.seen_at.as_second()
            );
        }

        let mut rules: Vec<&DiscountRule> = self.rules.iter().collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        for r in rules {
            let _ = write!(out, "rule={}|{}|", r.id, r.priority);
            match &r.kind {
                RuleKind::SpendThreshold {
                    vendor,
                    min_subtotal,
                    percent,
                } => {
                    let _ = write!(
                        out,
                        "threshold|{}|{}|{};",
                        vendor,
                        min_subtotal.to_minor_units(),
                        percent
                    );
                }
                RuleKind::Bundle {
                    vendor,
                    items,
                    amount_off,
                } => {
                    let _ = write!(out, "bundle|{vendor}|");
                    for item in items {
                        let _ = write!(out, "{item},");
                    }
                    let _ = write!(out, "|{};", amount_off.to_minor_units());
                }
                RuleKind::CategoryPercent { category, percent } => {
                    let _ = write!(out, "category|{category}|{percent};");
                }
            }
        }

        for (category, weight) in self.profile.weights.sorted_pairs() {
            let _ = write!(out, "weight={category}|{weight};");
        }

        let mut quotes: Vec<(&VendorId, &DeliveryQuote)> = self.quotes.iter().collect();
        quotes.sort_by(|a, b| a.0.cmp(b.0));
        for (vendor, quote) in quotes {
            let _ = write!(
                out,
                "quote={}|{}|{};",
                vendor,
                quote.fee.to_minor_units(),
                quote.pickup_available
            );
        }

        out
    }
}

/// Fetch all sources for one request, applying per-class timeouts.
///
/// Critical reads (offers, rules) fail the request on timeout; non-critical
/// reads (profile, delivery quotes) fall back to defaults with a warning.
///
/// # Errors
///
/// Returns [`PlanError::DataUnavailable`] if a critical source is unreachable
/// or times out.
pub async fn fetch_snapshot<S: Sources>(
    sources: &S,
    user: &UserId,
    items: &[ItemId],
    config: &PlannerConfig,
    currency: &'static Currency,
    taken_at: Timestamp,
) -> Result<Snapshot, PlanError> {
    let critical = Duration::from_millis(config.critical_timeout_ms);
    let noncritical = Duration::from_millis(config.noncritical_timeout_ms);
    let mut warnings = Vec::new();

    let offers = match timeout(critical, sources.offers(items)).await {
        Ok(Ok(offers)) => offers,
        Ok(Err(cause)) => {
            return Err(PlanError::DataUnavailable {
                source: "offers",
                cause,
            });
        }
        Err(_) => {
            return Err(PlanError::DataUnavailable {
                source: "offers",
                cause: SourceError::Timeout {
                    after_ms: config.critical_timeout_ms,
                },
            });
        }
    };

    let mut vendors: Vec<VendorId> = offers.iter().map(|o| o.vendor.clone()).collect();
    vendors.sort();
    vendors.dedup();

    // Rules are critical, the profile is not; fetch both concurrently.
    let (rules_result, profile_result) = tokio::join!(
        timeout(critical, sources.active_rules(&vendors)),
        timeout(noncritical, sources.profile(user)),
    );

    let rules = match rules_result {
        Ok(Ok(rules)) => rules,
        Ok(Err(cause)) => {
            return Err(PlanError::DataUnavailable {
                source: "rules",
                cause,
            });
        }
        Err(_) => {
            return Err(PlanError::DataUnavailable {
                source: "rules",
                cause: SourceError::Timeout {
                    after_ms: config.critical_timeout_ms,
                },
            });
        }
    };

    let profile = match profile_result {
        Ok(Ok(profile)) => profile,
        Ok(Err(_)) | Err(_) => {
            warnings.push(PlanWarning::PartialData {
                source: "preferences",
            });
            UserProfile::fallback(user.clone(), config.default_location)
        }
    };

    let quotes = match timeout(
        noncritical,
        fetch_quotes(sources, &vendors, profile.home),
    )
    .await
    {
        Ok(quotes) => quotes,
        Err(_) => FxHashMap::default(),
    };

    let mut all_quotes = FxHashMap::default();
    let mut degraded = false;
    for vendor in &vendors {
        match quotes.get(vendor) {
            Some(quote) => {
                all_quotes.insert(vendor.clone(), quote.clone());
            }
            None => {
                degraded = true;
                all_quotes.insert(
                    vendor.clone(),
                    DeliveryQuote {
                        fee: Money::from_minor(config.fallback_delivery_fee_minor, currency),
                        pickup_available: false,
                        distance_km: 0.0,
                    },
                );
            }
        }
    }
    if degraded {
        warnings.push(PlanWarning::PartialData { source: "delivery" });
    }

    Ok(Snapshot {
        taken_at,
        currency,
        offers,
        rules,
        profile,
        quotes: all_quotes,
        warnings,
    })
}

/// Quote every vendor; individual failures leave gaps for fallbacks.
async fn fetch_quotes<S: DeliverySource>(
    sources: &S,
    vendors: &[VendorId],
    home: Location,
) -> FxHashMap<VendorId, DeliveryQuote> {
    let mut quotes = FxHashMap::default();
    for vendor in vendors {
        if let Ok(quote) = sources.quote(vendor, home).await {
            quotes.insert(vendor.clone(), quote);
        }
    }
    quotes
}
