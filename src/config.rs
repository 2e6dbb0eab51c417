//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::vendors::Location;

/// Tunables for the planning pipeline.
///
/// Every knob has a sensible default; scenarios and deployments override only
/// what they need.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Offers older than this many seconds are excluded before the search.
    pub freshness_ttl_secs: i64,

    /// Per-item candidate vendors kept for the search (top-K cheapest).
    pub top_k: usize,

    /// Upper bound on the pruned candidate vendor set across all items.
    pub max_candidate_vendors: usize,

    /// Fixed-point iteration cap for the discount resolver.
    pub discount_iteration_cap: u32,

    /// Branch-and-bound node budget before the search degrades to heuristic.
    pub node_budget: u64,

    /// Wall-clock search budget in milliseconds.
    pub search_deadline_ms: u64,

    /// Worker tasks the subset-search frontier is partitioned across.
    pub search_workers: usize,

    /// Timeout for critical collaborator reads (offers, rules).
    pub critical_timeout_ms: u64,

    /// Timeout for non-critical collaborator reads (preferences, delivery).
    pub noncritical_timeout_ms: u64,

    /// Round-trip travel cost per kilometre, in minor units, used to price
    /// the pickup alternative against a delivery fee.
    pub pickup_cost_per_km_minor: i64,

    /// Delivery fee assumed for a vendor when the delivery source is
    /// unavailable, in minor units.
    pub fallback_delivery_fee_minor: i64,

    /// TTL for the shared vendor distance cache, in seconds.
    pub distance_cache_ttl_secs: i64,

    /// Where deliveries go when the profile source is unavailable.
    pub default_location: Location,

    /// ISO 4217 code of the snapshot currency.
    pub currency: String,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            freshness_ttl_secs: 900,
            top_k: 5,
            max_candidate_vendors: 20,
            discount_iteration_cap: 4,
            node_budget: 200_000,
            search_deadline_ms: 250,
            search_workers: 1,
            critical_timeout_ms: 2_000,
            noncritical_timeout_ms: 500,
            pickup_cost_per_km_minor: 60,
            fallback_delivery_fee_minor: 500,
            distance_cache_ttl_secs: 600,
            default_location: Location { x_km: 0.0, y_km: 0.0 },
            currency: "EUR".to_owned(),
        }
    }
}

impl PlannerConfig {
    /// Resolve the configured currency against the ISO table.
    #[must_use]
    pub fn currency_ref(&self) -> Option<&'static rusty_money::iso::Currency> {
        rusty_money::iso::find(&self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete_and_resolve_a_currency() {
        let config = PlannerConfig::default();

        assert!(config.top_k >= 1, "top-K must keep at least one candidate");
        assert!(config.currency_ref().is_some(), "default currency must resolve");
    }

    #[test]
    fn partial_yaml_overrides_merge_over_defaults() -> testresult::TestResult {
        let config: PlannerConfig = serde_norway::from_str("top_k: 3\ncurrency: GBP\n")?;

        assert_eq!(config.top_k, 3);
        assert_eq!(config.currency, "GBP");
        assert_eq!(config.node_budget, PlannerConfig::default().node_budget);

        Ok(())
    }
}
