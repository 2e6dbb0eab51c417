//! Bounded branch-and-bound over activated-vendor subsets.
//!
//! Vendors are branched in coverage order (most items covered first, ties by
//! id), include-before-exclude, so consolidated plans surface early and
//! tighten the shared cost bound. The search is exhausted by a node budget, a
//! wall-clock deadline or external cancellation, any of which demotes the
//! result to [`Optimality::Heuristic`].

use std::{
    sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
    time::Instant,
};

use rustc_hash::FxHashMap;

use crate::{
    catalog::VendorId,
    delivery::DeliveryQuote,
    graph::OfferGraph,
    preferences::PreferenceWeights,
    rules::DiscountRule,
    solver::{
        Optimality, Solution, SolveOptions, SolverError,
        evaluation::{
            DiscountCeiling, Evaluated, SearchContext, baseline_subset, candidate_vendors,
            evaluate_subset, lower_bound,
        },
    },
};

/// State shared across workers: the best proven full-coverage cost (the
/// pruning bound), the global node counter and the exhaustion flag.
struct SharedState {
    best_full_cost: AtomicI64,
    nodes: AtomicU64,
    exhausted: AtomicBool,
}

struct Search<'a, 'b> {
    ctx: &'b SearchContext<'a>,
    state: &'b SharedState,
    vendors: &'b [VendorId],
    cancelled: &'b AtomicBool,
    ceiling: DiscountCeiling,
    spread: usize,
    coverable: usize,
}

impl Search<'_, '_> {
    /// Charges one node against the budget; `true` means stop expanding.
    fn out_of_budget(&self) -> bool {
        if self.state.exhausted.load(Ordering::Relaxed) {
            return true;
        }
        let node = self.state.nodes.fetch_add(1, Ordering::Relaxed) + 1;
        let deadline_hit =
            node % 128 == 0 && Instant::now() >= self.ctx.options.deadline;
        if node > self.ctx.options.node_budget
            || deadline_hit
            || self.cancelled.load(Ordering::Relaxed)
        {
            self.state.exhausted.store(true, Ordering::Relaxed);
            return true;
        }
        false
    }

    fn consider(&self, eval: Evaluated, best: &mut Evaluated) {
        if eval.is_full_coverage(self.coverable) {
            self.state
                .best_full_cost
                .fetch_min(eval.total_cost_minor, Ordering::Relaxed);
        }
        if eval.is_better_than(best) {
            *best = eval;
        }
    }

    /// Whether any completion of `included` over the undecided tail can still
    /// match the proven full-coverage bound. Ties are kept alive so the
    /// preference and vendor-set tie-breaks stay order-independent.
    fn worth_expanding(&self, next: usize, included: &[VendorId]) -> bool {
        let incumbent = self.state.best_full_cost.load(Ordering::Relaxed);
        if incumbent == i64::MAX {
            return true;
        }
        let undecided = self.vendors.get(next..).unwrap_or(&[]);
        lower_bound(self.ctx, included, undecided, &self.ceiling)
            .is_some_and(|bound| bound <= incumbent)
    }

    /// Expands the subtree rooted at `included`, deciding vendors from `idx`
    /// onward. Every subset is priced exactly once, at the moment its
    /// highest-index vendor is included.
    fn dfs(
        &self,
        idx: usize,
        included: &mut Vec<VendorId>,
        best: &mut Evaluated,
    ) -> Result<(), SolverError> {
        let Some(vendor) = self.vendors.get(idx) else {
            return Ok(());
        };
        if self.out_of_budget() {
            return Ok(());
        }

        if included.len() < self.spread {
            included.push(vendor.clone());
            let eval = evaluate_subset(self.ctx, included)?;
            self.consider(eval, best);
            if self.worth_expanding(idx + 1, included) {
                self.dfs(idx + 1, included, best)?;
            }
            included.pop();
        }

        if self.worth_expanding(idx + 1, included) {
            self.dfs(idx + 1, included, best)?;
        }

        Ok(())
    }

    /// One first-level task: the subtree of subsets whose lowest-index
    /// included vendor is `vendors[i]`. The first-level tasks partition all
    /// non-empty subsets, which makes them the unit of worker distribution.
    fn first_level(&self, i: usize, best: &mut Evaluated) -> Result<(), SolverError> {
        let Some(vendor) = self.vendors.get(i) else {
            return Ok(());
        };
        if self.out_of_budget() {
            return Ok(());
        }

        let mut included = vec![vendor.clone()];
        let eval = evaluate_subset(self.ctx, &included)?;
        self.consider(eval, best);
        if self.worth_expanding(i + 1, &included) {
            self.dfs(i + 1, &mut included, best)?;
        }

        Ok(())
    }
}

/// Finds the best activated-vendor subset for the graph under the given
/// rules, delivery quotes, preference weights and search limits.
///
/// Deterministic for a fixed input: the branching order is fixed and the
/// solution order is total, so even multi-worker runs that complete the
/// search agree on the winner. Raising `cancelled` stops the search at the
/// next node and returns the incumbent as a heuristic.
///
/// # Errors
///
/// Returns [`SolverError::Rule`] when a discount rule cannot be evaluated
/// and [`SolverError::InvariantViolation`] when a worker panics.
pub fn solve(
    graph: &OfferGraph,
    rules: &[DiscountRule],
    quotes: &FxHashMap<VendorId, DeliveryQuote>,
    weights: &PreferenceWeights,
    options: &SolveOptions,
    cancelled: &AtomicBool,
) -> Result<Solution, SolverError> {
    let ctx = SearchContext::new(graph, rules, quotes, weights, options);
    let coverable = ctx.items.len();
    let vendors = candidate_vendors(&ctx);

    let state = SharedState {
        best_full_cost: AtomicI64::new(i64::MAX),
        nodes: AtomicU64::new(0),
        exhausted: AtomicBool::new(false),
    };
    let search = Search {
        ctx: &ctx,
        state: &state,
        vendors: &vendors,
        cancelled,
        ceiling: DiscountCeiling::new(rules),
        spread: options.max_vendor_spread.unwrap_or(usize::MAX).max(1),
        coverable,
    };

    // Incumbent: the empty subset (everything unmet, cost zero) so a best
    // always exists, improved by the cheapest-per-item baseline when it
    // respects the vendor spread.
    let mut best = evaluate_subset(&ctx, &[])?;
    if best.is_full_coverage(coverable) {
        state
            .best_full_cost
            .fetch_min(best.total_cost_minor, Ordering::Relaxed);
    }
    let baseline = baseline_subset(&ctx, &vendors);
    if !baseline.is_empty() && baseline.len() <= search.spread {
        let eval = evaluate_subset(&ctx, &baseline)?;
        search.consider(eval, &mut best);
    }

    let worker_count = options.workers.clamp(1, vendors.len().max(1));
    if worker_count > 1 {
        let outcomes = run_workers(&search, worker_count, &best);
        for outcome in outcomes {
            let local = outcome?;
            if local.is_better_than(&best) {
                best = local;
            }
        }
    } else {
        search.dfs(0, &mut Vec::new(), &mut best)?;
    }

    let optimality = if state.exhausted.load(Ordering::Relaxed) {
        Optimality::Heuristic
    } else {
        Optimality::Optimal
    };

    Ok(Solution {
        lines: best.lines,
        line_discounts: best.line_discounts,
        activated: best.vendors_used,
        unmet: best.unmet,
        dropped_for_budget: best.dropped_for_budget,
        total_cost_minor: best.total_cost_minor,
        preference_score: best.preference_score,
        optimality,
        discount_stable: best.discount_stable,
        nodes_explored: state.nodes.load(Ordering::Relaxed),
    })
}

/// Strides the first-level tasks across scoped worker threads and collects
/// each worker's local best.
fn run_workers(
    search: &Search<'_, '_>,
    worker_count: usize,
    seed: &Evaluated,
) -> Vec<Result<Evaluated, SolverError>> {
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..worker_count)
            .map(|w| {
                scope.spawn(move || {
                    let mut local = seed.clone();
                    let mut i = w;
                    while i < search.vendors.len() {
                        search.first_level(i, &mut local)?;
                        i += worker_count;
                    }
                    Ok(local)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(outcome) => outcome,
                Err(_) => Err(SolverError::InvariantViolation {
                    message: "search worker panicked",
                }),
            })
            .collect()
    })
}
