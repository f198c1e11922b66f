//! crates/pickup_route_core/src/scheduler.rs
//!
//! The sequential stop scheduler: computes which stop a driver may act on
//! next and rejects out-of-order start/complete attempts. The first
//! non-completed stop in ascending sequence order is the sole source of
//! truth for "what's next"; there is no independent counter. This module is
//! a gatekeeper, not a planner; it never reorders stops.

use crate::domain::StopStatus;

/// Minimal per-stop view the scheduler needs, ordered by sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopProgress {
    pub sequence: i32,
    pub status: StopStatus,
}

/// Result of scanning a route for the next actionable stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStop {
    Eligible { sequence: i32, status: StopStatus },
    AllCompleted,
}

impl NextStop {
    pub fn is_all_completed(&self) -> bool {
        matches!(self, NextStop::AllCompleted)
    }

    pub fn sequence(&self) -> Option<i32> {
        match self {
            NextStop::Eligible { sequence, .. } => Some(*sequence),
            NextStop::AllCompleted => None,
        }
    }
}

/// The two driver actions the scheduler arbitrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopAction {
    Start,
    Complete,
}

/// A rejected out-of-order attempt, carrying enough context for the client
/// to resynchronize its local state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequenceViolation {
    #[error("Must complete sequences in order. Next sequence is {next}")]
    OutOfOrder { requested: i32, next: i32 },
    #[error("Sequence {sequence} is already {status}")]
    NotPending { sequence: i32, status: StopStatus },
    #[error("Must start sequence {sequence} before completing it")]
    NotStarted { sequence: i32 },
    #[error("All sequences are already completed")]
    AllCompleted { requested: i32 },
}

impl SequenceViolation {
    /// The actual next-expected sequence, when one exists.
    pub fn next_sequence(&self) -> Option<i32> {
        match self {
            SequenceViolation::OutOfOrder { next, .. } => Some(*next),
            SequenceViolation::NotPending { sequence, .. }
            | SequenceViolation::NotStarted { sequence } => Some(*sequence),
            SequenceViolation::AllCompleted { .. } => None,
        }
    }
}

/// Returns the first stop, in ascending sequence order, that is not yet
/// completed. `stops` must already be ordered by sequence; the database
/// port guarantees this for progress listings.
pub fn next_eligible(stops: &[StopProgress]) -> NextStop {
    for stop in stops {
        match stop.status {
            StopStatus::Pending | StopStatus::InProgress => {
                return NextStop::Eligible {
                    sequence: stop.sequence,
                    status: stop.status,
                };
            }
            StopStatus::Completed => {}
        }
    }
    NextStop::AllCompleted
}

/// Validates that acting on `sequence` respects strict in-order visitation.
///
/// A start is legal only for the next eligible stop while it is pending; a
/// completion is legal only for the next eligible stop while it is in
/// progress.
pub fn validate(
    stops: &[StopProgress],
    sequence: i32,
    action: StopAction,
) -> Result<(), SequenceViolation> {
    let (next, status) = match next_eligible(stops) {
        NextStop::Eligible { sequence, status } => (sequence, status),
        NextStop::AllCompleted => {
            return Err(SequenceViolation::AllCompleted {
                requested: sequence,
            });
        }
    };

    if sequence != next {
        return Err(SequenceViolation::OutOfOrder {
            requested: sequence,
            next,
        });
    }

    match action {
        StopAction::Start => {
            if status != StopStatus::Pending {
                return Err(SequenceViolation::NotPending { sequence, status });
            }
        }
        StopAction::Complete => {
            if status != StopStatus::InProgress {
                return Err(SequenceViolation::NotStarted { sequence });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop(sequence: i32, status: StopStatus) -> StopProgress {
        StopProgress { sequence, status }
    }

    #[test]
    fn next_eligible_returns_first_non_completed() {
        let stops = [
            stop(1, StopStatus::Completed),
            stop(2, StopStatus::Pending),
            stop(3, StopStatus::Pending),
        ];
        assert_eq!(
            next_eligible(&stops),
            NextStop::Eligible {
                sequence: 2,
                status: StopStatus::Pending
            }
        );
    }

    #[test]
    fn next_eligible_never_returns_a_completed_stop() {
        let stops = [
            stop(1, StopStatus::Completed),
            stop(2, StopStatus::Completed),
            stop(3, StopStatus::InProgress),
        ];
        match next_eligible(&stops) {
            NextStop::Eligible { sequence, .. } => assert_eq!(sequence, 3),
            NextStop::AllCompleted => panic!("stop 3 is not completed"),
        }
    }

    #[test]
    fn empty_route_reports_all_completed() {
        assert!(next_eligible(&[]).is_all_completed());
    }

    #[test]
    fn start_out_of_order_reports_actual_next() {
        let stops = [stop(1, StopStatus::Pending), stop(2, StopStatus::Pending)];
        let err = validate(&stops, 2, StopAction::Start).unwrap_err();
        assert_eq!(
            err,
            SequenceViolation::OutOfOrder {
                requested: 2,
                next: 1
            }
        );
        assert_eq!(err.next_sequence(), Some(1));
    }

    #[test]
    fn start_requires_pending() {
        let stops = [stop(1, StopStatus::InProgress)];
        let err = validate(&stops, 1, StopAction::Start).unwrap_err();
        assert_eq!(
            err,
            SequenceViolation::NotPending {
                sequence: 1,
                status: StopStatus::InProgress
            }
        );
    }

    #[test]
    fn complete_requires_in_progress() {
        let stops = [stop(1, StopStatus::Pending)];
        let err = validate(&stops, 1, StopAction::Complete).unwrap_err();
        assert_eq!(err, SequenceViolation::NotStarted { sequence: 1 });
    }

    #[test]
    fn completed_route_rejects_further_actions() {
        let stops = [stop(1, StopStatus::Completed)];
        let err = validate(&stops, 1, StopAction::Complete).unwrap_err();
        assert_eq!(err, SequenceViolation::AllCompleted { requested: 1 });
    }

    // The two-stop walkthrough: start 1, reject start 2, complete 1,
    // start 2, complete 2, then the route reports all completed.
    #[test]
    fn two_stop_route_progresses_strictly_in_order() {
        let mut stops = vec![stop(1, StopStatus::Pending), stop(2, StopStatus::Pending)];

        validate(&stops, 1, StopAction::Start).unwrap();
        stops[0].status = StopStatus::InProgress;

        let err = validate(&stops, 2, StopAction::Start).unwrap_err();
        assert_eq!(err.next_sequence(), Some(1));

        validate(&stops, 1, StopAction::Complete).unwrap();
        stops[0].status = StopStatus::Completed;

        assert_eq!(
            next_eligible(&stops),
            NextStop::Eligible {
                sequence: 2,
                status: StopStatus::Pending
            }
        );

        validate(&stops, 2, StopAction::Start).unwrap();
        stops[1].status = StopStatus::InProgress;
        validate(&stops, 2, StopAction::Complete).unwrap();
        stops[1].status = StopStatus::Completed;

        assert!(next_eligible(&stops).is_all_completed());
    }

    // Every route with N stops accepts exactly N start+complete pairs in
    // ascending order and nothing else in between.
    #[test]
    fn n_stop_route_accepts_exactly_n_ordered_pairs() {
        let n = 5;
        let mut stops: Vec<StopProgress> =
            (1..=n).map(|i| stop(i, StopStatus::Pending)).collect();

        for i in 0..n as usize {
            // Acting on any later stop first must be rejected.
            if i + 1 < n as usize {
                assert!(validate(&stops, stops[i + 1].sequence, StopAction::Start).is_err());
            }
            validate(&stops, stops[i].sequence, StopAction::Start).unwrap();
            stops[i].status = StopStatus::InProgress;
            validate(&stops, stops[i].sequence, StopAction::Complete).unwrap();
            stops[i].status = StopStatus::Completed;
        }

        assert!(next_eligible(&stops).is_all_completed());
    }
}
