//! Shopper preference weights by category.

use rust_decimal::Decimal;
use rustc_hash::FxHashMap;

use crate::{
    catalog::{Category, UserId},
    vendors::Location,
};

/// Per-category preference weights supplied by the personalisation collaborator.
///
/// Unknown categories weigh `1.0`, so an absent or partial source degrades to
/// neutral scoring rather than failing the request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PreferenceWeights {
    weights: FxHashMap<Category, Decimal>,
}

impl PreferenceWeights {
    /// Neutral weights; every category scores `1.0`.
    #[must_use]
    pub fn uniform() -> Self {
        Self::default()
    }

    /// Build from explicit `(category, weight)` pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Category, Decimal)>) -> Self {
        Self {
            weights: pairs.into_iter().collect(),
        }
    }

    /// The weight for a category, defaulting to `1.0`.
    #[must_use]
    pub fn weight(&self, category: &Category) -> Decimal {
        self.weights.get(category).copied().unwrap_or(Decimal::ONE)
    }

    /// The explicit `(category, weight)` pairs, sorted by category for
    /// canonical renderings.
    #[must_use]
    pub fn sorted_pairs(&self) -> Vec<(&Category, Decimal)> {
        let mut pairs: Vec<(&Category, Decimal)> =
            self.weights.iter().map(|(c, w)| (c, *w)).collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        pairs
    }
}

/// Shopper context consumed by the engine, read-only per request.
///
/// Budget and fulfilment preference travel on the request itself; the profile
/// carries the parts the personalisation source owns.
#[derive(Clone, Debug, PartialEq)]
pub struct UserProfile {
    /// The shopper this profile belongs to.
    pub user: UserId,

    /// Preference weights by category.
    pub weights: PreferenceWeights,

    /// Where deliveries go and pickup trips start from.
    pub home: Location,
}

impl UserProfile {
    /// A neutral profile at the given location, used when the personalisation
    /// source is unavailable.
    #[must_use]
    pub fn fallback(user: UserId, home: Location) -> Self {
        Self {
            user,
            weights: PreferenceWeights::uniform(),
            home,
        }
    }
}
