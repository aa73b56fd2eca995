//! Session and run state machines
//!
//! Two small transition tables plus a pure reduction from run outcomes to
//! the terminal session state. Nothing here touches the network.

use crate::types::{RunState, SessionState, SessionType};

/// States a session may move to from `from`
#[must_use]
pub fn allowed_session_transitions(from: SessionState) -> Vec<SessionState> {
    use SessionState::*;
    match from {
        Preparing => vec![Loading],
        Loading => vec![Executing],
        Executing => vec![Completed, AwaitingSynthesis, Failed],
        Completed | AwaitingSynthesis | Failed => vec![],
    }
}

/// Whether `from -> to` is a legal session transition
#[must_use]
pub fn validate_session_transition(from: SessionState, to: SessionState) -> bool {
    allowed_session_transitions(from).contains(&to)
}

/// States a run may move to from `from`
#[must_use]
pub fn allowed_run_transitions(from: RunState) -> Vec<RunState> {
    use RunState::*;
    match from {
        // Open failures and cancellation end a run before anything is sent
        Queued => vec![Sent, Errored],
        Sent => vec![AwaitingResponse, Errored],
        AwaitingResponse => vec![Captured, Errored],
        Captured | Errored => vec![],
    }
}

/// Whether `from -> to` is a legal run transition
#[must_use]
pub fn validate_run_transition(from: RunState, to: RunState) -> bool {
    allowed_run_transitions(from).contains(&to)
}

/// Terminal session state implied by the run states
///
/// Returns `None` while any run is still in flight. A session fails only
/// when every run errored.
#[must_use]
pub fn resolve_session(session_type: SessionType, runs: &[RunState]) -> Option<SessionState> {
    if runs.is_empty() || runs.iter().any(|r| !r.is_terminal()) {
        return None;
    }
    if runs.iter().all(|r| *r == RunState::Errored) {
        return Some(SessionState::Failed);
    }
    Some(if session_type.expects_synthesis() {
        SessionState::AwaitingSynthesis
    } else {
        SessionState::Completed
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn session_happy_path_is_legal() {
        use SessionState::*;
        for (from, to) in [
            (Preparing, Loading),
            (Loading, Executing),
            (Executing, AwaitingSynthesis),
            (Executing, Completed),
            (Executing, Failed),
        ] {
            assert!(validate_session_transition(from, to), "{from} -> {to}");
        }
    }

    #[test]
    fn session_cannot_skip_or_leave_terminal() {
        use SessionState::*;
        assert!(!validate_session_transition(Preparing, Executing));
        assert!(!validate_session_transition(Loading, Failed));
        assert!(!validate_session_transition(Failed, Loading));
        assert!(allowed_session_transitions(AwaitingSynthesis).is_empty());
    }

    #[test]
    fn run_errors_from_any_live_state() {
        use RunState::*;
        for from in [Queued, Sent, AwaitingResponse] {
            assert!(validate_run_transition(from, Errored));
        }
        assert!(!validate_run_transition(Queued, Captured));
        assert!(!validate_run_transition(Captured, Errored));
    }

    #[test]
    fn partial_failure_is_not_failure() {
        use RunState::*;
        let runs = [Captured, Errored, Captured, Errored, Captured];
        assert_eq!(
            resolve_session(SessionType::StrictVerifier, &runs),
            Some(SessionState::AwaitingSynthesis)
        );
        assert_eq!(
            resolve_session(SessionType::PositionAggregator, &[Captured]),
            Some(SessionState::Completed)
        );
    }

    #[test]
    fn all_errored_fails_and_in_flight_is_unresolved() {
        use RunState::*;
        assert_eq!(
            resolve_session(SessionType::Formalization, &[Errored, Errored]),
            Some(SessionState::Failed)
        );
        assert_eq!(resolve_session(SessionType::Formalization, &[Captured, Sent]), None);
        assert_eq!(resolve_session(SessionType::Formalization, &[]), None);
    }

    fn terminal_run() -> impl Strategy<Value = RunState> {
        prop_oneof![Just(RunState::Captured), Just(RunState::Errored)]
    }

    proptest! {
        #[test]
        fn failed_iff_nothing_captured(runs in proptest::collection::vec(terminal_run(), 1..12)) {
            let resolved = resolve_session(SessionType::StrictVerifier, &runs);
            let any_captured = runs.contains(&RunState::Captured);
            prop_assert_eq!(resolved == Some(SessionState::Failed), !any_captured);
        }
    }
}
