//! The planning pipeline: validate, snapshot, build, search, assemble.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use jiff::Timestamp;
use rusty_money::iso::{self, Currency};
use tokio::sync::watch;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    catalog::ItemId,
    config::PlannerConfig,
    error::{InfeasibleReport, InvariantViolation, PlanError, PlanWarning},
    graph::{OfferGraph, OfferGraphBuilder},
    plan::{self, Plan, PlanPhase},
    request::{PlanRequest, PlanResponse},
    solver::{self, Optimality, Solution, SolveOptions, SolverError},
    sources::{Snapshot, Sources, fetch_snapshot},
};

/// The deterministic multi-vendor shopping planner.
///
/// One instance serves many concurrent requests; the only cross-request
/// state lives in the delivery estimator's distance cache, behind the
/// caller's [`Sources`] implementation.
#[derive(Debug)]
pub struct Planner<S> {
    sources: S,
    config: PlannerConfig,
}

impl<S: Sources> Planner<S> {
    /// Creates a planner over the given collaborators.
    pub fn new(sources: S, config: PlannerConfig) -> Self {
        Self { sources, config }
    }

    /// The planner's configuration.
    #[must_use]
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    fn currency(&self) -> &'static Currency {
        match self.config.currency_ref() {
            Some(currency) => currency,
            None => {
                warn!(code = %self.config.currency, "unknown configured currency, using EUR");
                iso::EUR
            }
        }
    }

    /// Plans without external cancellation.
    ///
    /// # Errors
    ///
    /// See [`Planner::plan_with_cancel`].
    pub async fn plan(&self, request: &PlanRequest) -> Result<PlanResponse, PlanError> {
        let (_guard, rx) = watch::channel(false);
        self.plan_with_cancel(request, rx).await
    }

    /// Plans without external cancellation, returning the assembled [`Plan`]
    /// rather than its wire-shaped response.
    ///
    /// # Errors
    ///
    /// See [`Planner::plan_with_cancel`].
    pub async fn plan_detailed(&self, request: &PlanRequest) -> Result<Plan, PlanError> {
        let (_guard, rx) = watch::channel(false);
        self.run(request, rx).await
    }

    /// Plans one request, observing a cancellation signal.
    ///
    /// Cancellation during the snapshot fetch aborts with
    /// [`PlanError::Cancelled`]; cancellation mid-search stops the search at
    /// the next node and returns the best-found plan flagged heuristic.
    ///
    /// # Errors
    ///
    /// [`PlanError::Input`] for malformed requests,
    /// [`PlanError::DataUnavailable`] when a critical source fails,
    /// [`PlanError::Infeasible`] when no plan satisfies the constraints, and
    /// [`PlanError::Invariant`] when the post-assembly audit fails.
    pub async fn plan_with_cancel(
        &self,
        request: &PlanRequest,
        cancel: watch::Receiver<bool>,
    ) -> Result<PlanResponse, PlanError> {
        Ok(PlanResponse::from_plan(&self.run(request, cancel).await?))
    }

    #[instrument(skip_all, fields(user = %request.user_id, items = request.items.len()))]
    async fn run(
        &self,
        request: &PlanRequest,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<Plan, PlanError> {
        request.validate()?;
        let mut phase = PlanPhase::Received;

        let currency = self.currency();
        let taken_at = Timestamp::now();
        let item_ids: Vec<ItemId> = request.items.iter().map(|l| l.item.clone()).collect();

        let snapshot = tokio::select! {
            snapshot = fetch_snapshot(
                &self.sources,
                &request.user_id,
                &item_ids,
                &self.config,
                currency,
                taken_at,
            ) => snapshot?,
            () = cancelled(&mut cancel) => return Err(PlanError::Cancelled),
        };
        phase = phase.advance(PlanPhase::SnapshotTaken)?;
        info!(
            offers = snapshot.offers.len(),
            rules = snapshot.rules.len(),
            warnings = snapshot.warnings.len(),
            "snapshot taken"
        );

        let graph = OfferGraphBuilder::new(taken_at, self.config.freshness_ttl_secs).build(
            &request.items,
            &snapshot.offers,
            &snapshot.rules,
            currency,
        )?;
        phase = phase.advance(PlanPhase::GraphBuilt)?;

        phase = phase.advance(PlanPhase::Searching)?;
        if graph.is_empty() {
            phase.advance(PlanPhase::Infeasible)?;
            return Err(PlanError::Infeasible(InfeasibleReport {
                unfulfillable: graph.unfulfillable().to_vec(),
                dropped_for_budget: Vec::new(),
                best_partial_cost_minor: None,
            }));
        }

        let solution = self
            .search(&graph, &snapshot, request, &mut cancel)
            .await?;
        info!(
            nodes = solution.nodes_explored,
            total_minor = solution.total_cost_minor,
            optimality = ?solution.optimality,
            "search finished"
        );

        if request.hard_cap && !solution.dropped_for_budget.is_empty() {
            phase.advance(PlanPhase::Infeasible)?;
            return Err(PlanError::Infeasible(InfeasibleReport {
                unfulfillable: graph.unfulfillable().to_vec(),
                dropped_for_budget: solution.dropped_for_budget.clone(),
                best_partial_cost_minor: Some(solution.total_cost_minor),
            }));
        }

        phase = match solution.optimality {
            Optimality::Optimal => phase.advance(PlanPhase::SolutionFound)?,
            Optimality::Heuristic => phase.advance(PlanPhase::TimedOutHeuristic)?,
        };

        let plan_id = plan_id_for(request, &snapshot);
        let mut assembled = plan::assemble(
            plan_id,
            &solution,
            &graph,
            &snapshot.quotes,
            request.fulfillment_preference,
            self.config.pickup_cost_per_km_minor,
            currency,
        )?;
        phase = phase.advance(PlanPhase::Assembled)?;

        if let Some(budget) = request.budget_limit {
            let over = solution.total_cost_minor - budget;
            if !request.hard_cap && over > 0 {
                assembled
                    .warnings
                    .push(PlanWarning::BudgetExceeded { over_minor: over });
            }
        }
        assembled.warnings.extend(snapshot.warnings.iter().cloned());
        assembled.warnings.sort();
        assembled.warnings.dedup();

        phase.advance(PlanPhase::Returned)?;

        Ok(assembled)
    }

    /// Runs the branch-and-bound off the async runtime, wiring the watch
    /// channel to the solver's atomic stop flag.
    async fn search(
        &self,
        graph: &OfferGraph,
        snapshot: &Snapshot,
        request: &PlanRequest,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Solution, PlanError> {
        let options = SolveOptions {
            top_k: self.config.top_k,
            max_candidate_vendors: self.config.max_candidate_vendors,
            discount_iteration_cap: self.config.discount_iteration_cap,
            node_budget: self.config.node_budget,
            deadline: Instant::now() + Duration::from_millis(self.config.search_deadline_ms),
            workers: self.config.search_workers,
            budget_limit_minor: request.budget_limit,
            hard_cap: request.hard_cap,
            max_vendor_spread: request.max_vendor_spread,
        };

        let stop = Arc::new(AtomicBool::new(false));
        let mut task = {
            let graph = graph.clone();
            let rules = snapshot.rules.clone();
            let quotes = snapshot.quotes.clone();
            let weights = snapshot.profile.weights.clone();
            let stop = Arc::clone(&stop);
            tokio::task::spawn_blocking(move || {
                solver::solve(&graph, &rules, &quotes, &weights, &options, &stop)
            })
        };

        let outcome = tokio::select! {
            joined = &mut task => joined,
            () = cancelled(cancel) => {
                stop.store(true, Ordering::Relaxed);
                (&mut task).await
            }
        };

        let solved = outcome.map_err(|_| {
            PlanError::Invariant(InvariantViolation::SolverInternal("search task panicked"))
        })?;

        solved.map_err(|err| match err {
            SolverError::Rule(rule) => PlanError::Rule(rule),
            SolverError::InvariantViolation { message } => {
                PlanError::Invariant(InvariantViolation::SolverInternal(message))
            }
        })
    }
}

/// Deterministic plan id: UUIDv5 over the canonical (request, snapshot)
/// rendering, so identical inputs reproduce the identical id.
fn plan_id_for(request: &PlanRequest, snapshot: &Snapshot) -> Uuid {
    let canonical = format!(
        "{}\n{}",
        request.canonical_string(),
        snapshot.canonical_string()
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, canonical.as_bytes())
}

/// Resolves when the watch channel signals cancellation; pends forever if
/// the sender is dropped without cancelling.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if *rx.borrow() {
        return;
    }
    while rx.changed().await.is_ok() {
        if *rx.borrow() {
            return;
        }
    }
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use jiff::Timestamp;
    use rustc_hash::FxHashMap;
    use rusty_money::{Money, iso::EUR};

    use rust_decimal::Decimal;

    use super::*;
    use crate::{
        catalog::{Category, ItemId, RequestedItem, RuleId, UserId, VendorId},
        offers::Offer,
        preferences::{PreferenceWeights, UserProfile},
        rules::{DiscountRule, RuleKind},
        sources::Snapshot,
        vendors::Location,
    };

    fn snapshot(price_minor: i64) -> Snapshot {
        let user = UserId::new("user-1");
        Snapshot {
            taken_at: Timestamp::UNIX_EPOCH,
            currency: EUR,
            offers: vec![Offer {
                vendor: VendorId::new("vendor-a"),
                item: ItemId::new("milk"),
                category: Category::new("dairy"),
                unit_price: Money::from_minor(price_minor, EUR),
                available_qty: 5,
                seen_at: Timestamp::UNIX_EPOCH,
            }],
            rules: Vec::new(),
            profile: UserProfile::fallback(user, Location { x_km: 0.0, y_km: 0.0 }),
            quotes: FxHashMap::default(),
            warnings: Vec::new(),
        }
    }

    fn request() -> PlanRequest {
        PlanRequest {
            user_id: UserId::new("user-1"),
            items: vec![RequestedItem::new("milk", "dairy", 1)],
            budget_limit: None,
            hard_cap: false,
            max_vendor_spread: None,
            fulfillment_preference: crate::request::FulfillmentPreference::Auto,
        }
    }

    #[test]
    fn plan_ids_are_stable_for_identical_inputs() {
        let a = plan_id_for(&request(), &snapshot(100));
        let b = plan_id_for(&request(), &snapshot(100));

        assert_eq!(a, b);
    }

    #[test]
    fn plan_ids_track_snapshot_changes() {
        let a = plan_id_for(&request(), &snapshot(100));
        let b = plan_id_for(&request(), &snapshot(99));

        assert_ne!(a, b);
    }

    #[test]
    fn plan_ids_track_rule_and_weight_changes() {
        let rule = |percent: Decimal| DiscountRule {
            id: RuleId::new("r-dairy"),
            priority: 1,
            kind: RuleKind::CategoryPercent {
                category: Category::new("dairy"),
                percent,
            },
        };

        let mut ten_off = snapshot(100);
        ten_off.rules = vec![rule(Decimal::new(10, 2))];
        let mut twenty_off = snapshot(100);
        twenty_off.rules = vec![rule(Decimal::new(20, 2))];

        assert_ne!(
            plan_id_for(&request(), &ten_off),
            plan_id_for(&request(), &twenty_off),
            "a rule's percentage participates in the plan id"
        );

        let mut weighted = snapshot(100);
        weighted.profile.weights =
            PreferenceWeights::from_pairs([(Category::new("dairy"), Decimal::from(2))]);

        assert_ne!(
            plan_id_for(&request(), &snapshot(100)),
            plan_id_for(&request(), &weighted),
            "preference weights participate in the plan id"
        );
    }

    #[tokio::test]
    async fn a_pre_cancelled_channel_resolves_immediately() {
        let (tx, mut rx) = watch::channel(true);

        cancelled(&mut rx).await;

        drop(tx);
    }
}
