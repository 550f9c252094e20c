//! Property tests for the run summary aggregate.
//!
//! Uses proptest to verify:
//! 1. Every recorded folder lands in exactly one bucket of the totals
//! 2. Pending folders are exactly the unmarked non-skipped ones

use chrono::NaiveDate;
use proptest::prelude::*;
use reportsync_core::domain::RunFolder;
use reportsync_runner::{FolderOutcome, FolderState, RunSummary};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_state() -> impl Strategy<Value = FolderState> {
    prop_oneof![
        Just(FolderState::Skipped),
        Just(FolderState::NoResults),
        Just(FolderState::ReportFailed),
        Just(FolderState::ReportDistributed),
        Just(FolderState::Cancelled),
        Just(FolderState::Failed),
    ]
}

fn outcome(i: usize, state: FolderState, marked: bool) -> FolderOutcome {
    let folder = RunFolder::new(
        "R",
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
        format!("run-{i:02}"),
    );
    let mut outcome = FolderOutcome::new(folder, state);
    outcome.marked = marked && state != FolderState::Skipped;
    outcome
}

// ── 1. Totals ────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn totals_partition_outcomes(states in prop::collection::vec((arb_state(), any::<bool>()), 0..40)) {
        let mut summary = RunSummary::new(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(), states.len());
        for (i, (state, marked)) in states.iter().enumerate() {
            summary.record(outcome(i, *state, *marked));
        }
        let cancelled = states.iter().filter(|(s, _)| *s == FolderState::Cancelled).count();
        prop_assert_eq!(
            summary.processed + summary.skipped + summary.failed + cancelled,
            states.len()
        );
        prop_assert_eq!(
            summary.processed,
            summary.no_results + summary.report_failures + summary.reports_generated
        );
        prop_assert_eq!(summary.cancelled, cancelled > 0);
        prop_assert_eq!(summary.outcomes.len(), states.len());
    }
}

// ── 2. Pending ───────────────────────────────────────────────────────

proptest! {
    #[test]
    fn pending_counts_unmarked_attempts(states in prop::collection::vec((arb_state(), any::<bool>()), 0..40)) {
        let mut summary = RunSummary::new(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(), states.len());
        for (i, (state, marked)) in states.iter().enumerate() {
            summary.record(outcome(i, *state, *marked));
        }
        let expected = states
            .iter()
            .filter(|(s, m)| *s != FolderState::Skipped && !*m)
            .count();
        prop_assert_eq!(summary.pending(), expected);
    }
}
