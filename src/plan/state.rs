//! Planning request lifecycle.
//!
//! Every request walks `Received -> SnapshotTaken -> GraphBuilt -> Searching`
//! and then one of the search outcomes before being assembled and returned.
//! Transitions are checked so a skipped phase surfaces as an invariant
//! violation instead of a silently wrong plan.

use crate::error::InvariantViolation;

/// Phase of one planning request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanPhase {
    /// Request validated, nothing fetched yet.
    Received,

    /// Collaborator snapshot taken.
    SnapshotTaken,

    /// Offer graph built from the snapshot.
    GraphBuilt,

    /// Search running.
    Searching,

    /// Search completed with a proven-optimal assignment.
    SolutionFound,

    /// Search budget exhausted; best-found assignment kept.
    TimedOutHeuristic,

    /// No assignment satisfies the constraints. Terminal.
    Infeasible,

    /// Plan lines, totals and fulfillment modes assembled.
    Assembled,

    /// Response handed to the caller. Terminal.
    Returned,
}

impl PlanPhase {
    /// Phase name for diagnostics.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            PlanPhase::Received => "received",
            PlanPhase::SnapshotTaken => "snapshot_taken",
            PlanPhase::GraphBuilt => "graph_built",
            PlanPhase::Searching => "searching",
            PlanPhase::SolutionFound => "solution_found",
            PlanPhase::TimedOutHeuristic => "timed_out_heuristic",
            PlanPhase::Infeasible => "infeasible",
            PlanPhase::Assembled => "assembled",
            PlanPhase::Returned => "returned",
        }
    }

    fn allows(self, next: PlanPhase) -> bool {
        matches!(
            (self, next),
            (PlanPhase::Received, PlanPhase::SnapshotTaken)
                | (PlanPhase::SnapshotTaken, PlanPhase::GraphBuilt)
                | (PlanPhase::GraphBuilt, PlanPhase::Searching)
                | (
                    PlanPhase::Searching,
                    PlanPhase::SolutionFound
                        | PlanPhase::TimedOutHeuristic
                        | PlanPhase::Infeasible,
                )
                | (
                    PlanPhase::SolutionFound | PlanPhase::TimedOutHeuristic,
                    PlanPhase::Assembled,
                )
                | (PlanPhase::Assembled, PlanPhase::Returned)
        )
    }

    /// Moves to `next`, rejecting any edge the lifecycle does not define.
    ///
    /// # Errors
    ///
    /// Returns [`InvariantViolation::IllegalTransition`] for undefined edges,
    /// including any transition out of a terminal phase.
    pub fn advance(self, next: PlanPhase) -> Result<PlanPhase, InvariantViolation> {
        if self.allows(next) {
            Ok(next)
        } else {
            Err(InvariantViolation::IllegalTransition {
                from: self.name(),
                to: next.name(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;

    use super::*;

    #[test]
    fn the_happy_path_walks_every_phase() -> TestResult {
        let phase = PlanPhase::Received
            .advance(PlanPhase::SnapshotTaken)?
            .advance(PlanPhase::GraphBuilt)?
            .advance(PlanPhase::Searching)?
            .advance(PlanPhase::SolutionFound)?
            .advance(PlanPhase::Assembled)?
            .advance(PlanPhase::Returned)?;

        assert_eq!(phase, PlanPhase::Returned);

        Ok(())
    }

    #[test]
    fn skipping_a_phase_is_rejected() {
        let err = PlanPhase::Received.advance(PlanPhase::Searching);

        assert_eq!(
            err,
            Err(InvariantViolation::IllegalTransition {
                from: "received",
                to: "searching",
            })
        );
    }

    #[test]
    fn infeasible_is_terminal() {
        let infeasible = PlanPhase::Searching.advance(PlanPhase::Infeasible);
        assert_eq!(infeasible, Ok(PlanPhase::Infeasible));

        assert!(PlanPhase::Infeasible.advance(PlanPhase::Assembled).is_err());
    }

    #[test]
    fn heuristic_timeouts_still_assemble() {
        let assembled = PlanPhase::Searching
            .advance(PlanPhase::TimedOutHeuristic)
            .and_then(|phase| phase.advance(PlanPhase::Assembled));

        assert_eq!(assembled, Ok(PlanPhase::Assembled));
    }
}
