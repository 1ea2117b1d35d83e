use std::fmt;

use serde::{Deserialize, Serialize};

use super::job::{Job, JobOutcome, JobStatus};
use crate::error::FailureKind;

/// Lifecycle states of a segmentation job.
///
/// A job normally walks CREATED → EXPORTING → INVOKING → RUNNING → IMPORTING →
/// CLEANING_UP → DONE. CANCELLING is reachable from every non-terminal state and
/// always ends in CANCELLED; FAILED is reachable from any step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    Created,
    Exporting,
    Invoking,
    Running,
    Importing,
    CleaningUp,
    Done,
    Cancelling,
    Cancelled,
    Failed(FailureKind),
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Done | State::Cancelled | State::Failed(_))
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Created => write!(f, "CREATED"),
            State::Exporting => write!(f, "EXPORTING"),
            State::Invoking => write!(f, "INVOKING"),
            State::Running => write!(f, "RUNNING"),
            State::Importing => write!(f, "IMPORTING"),
            State::CleaningUp => write!(f, "CLEANING_UP"),
            State::Done => write!(f, "DONE"),
            State::Cancelling => write!(f, "CANCELLING"),
            State::Cancelled => write!(f, "CANCELLED"),
            State::Failed(kind) => write!(f, "FAILED({kind})"),
        }
    }
}

/// What happened in the step the job is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Success,
    Failure(FailureKind),
    CancelRequested,
}

/// The result of evaluating a state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Advance to the next state.
    Next(State),
    /// The job has reached a terminal state.
    Complete(JobOutcome),
}

/// Drives a `Job` through the state machine.
pub struct StateMachine;

impl StateMachine {
    /// Compute and apply the next transition for `job` given the outcome of its
    /// current step.
    ///
    /// - Success advances along the main sequence; success while CANCELLING
    ///   completes as cancelled.
    /// - A failure in any non-terminal state completes as FAILED(kind).
    /// - A cancel request moves any non-terminal state to CANCELLING (a second
    ///   request while already cancelling is a no-op).
    /// - Terminal states always return `Complete` with the stored outcome.
    pub fn next(job: &mut Job, outcome: StepOutcome) -> Transition {
        let transition = match (job.state, outcome) {
            (State::Done, _) => Transition::Complete(JobOutcome::Success),
            (State::Cancelled, _) => Transition::Complete(JobOutcome::Cancelled),
            (State::Failed(kind), _) => Transition::Complete(JobOutcome::Failure(kind)),
            (State::Cancelling, StepOutcome::CancelRequested) => Transition::Next(State::Cancelling),
            (State::Cancelling, StepOutcome::Success) => Transition::Complete(JobOutcome::Cancelled),
            (_, StepOutcome::CancelRequested) => Transition::Next(State::Cancelling),
            (_, StepOutcome::Failure(kind)) => Transition::Complete(JobOutcome::Failure(kind)),
            (State::Created, StepOutcome::Success) => Transition::Next(State::Exporting),
            (State::Exporting, StepOutcome::Success) => Transition::Next(State::Invoking),
            (State::Invoking, StepOutcome::Success) => Transition::Next(State::Running),
            (State::Running, StepOutcome::Success) => Transition::Next(State::Importing),
            (State::Importing, StepOutcome::Success) => Transition::Next(State::CleaningUp),
            (State::CleaningUp, StepOutcome::Success) => Transition::Next(State::Done),
        };

        if job.state.is_terminal() {
            return transition;
        }

        // Apply the transition to the job.
        match &transition {
            Transition::Next(next_state) => {
                if *next_state != job.state {
                    job.state_history.push(job.state);
                    job.state = *next_state;
                }
                job.status = match next_state {
                    State::Done => JobStatus::Completed,
                    _ => JobStatus::InProgress,
                };
            }
            Transition::Complete(outcome) => {
                job.state_history.push(job.state);
                let (state, status) = match outcome {
                    JobOutcome::Success => (State::Done, JobStatus::Completed),
                    JobOutcome::Cancelled => (State::Cancelled, JobStatus::Cancelled),
                    JobOutcome::Failure(kind) => (State::Failed(*kind), JobStatus::Failed),
                };
                job.state = state;
                job.status = status;
            }
        }

        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::test_support::sample_job;

    #[test]
    fn happy_path_walks_all_states() {
        let mut job = sample_job();
        assert_eq!(job.state, State::Created);

        let expected = [
            State::Exporting,
            State::Invoking,
            State::Running,
            State::Importing,
            State::CleaningUp,
            State::Done,
        ];
        for state in expected {
            let t = StateMachine::next(&mut job, StepOutcome::Success);
            assert_eq!(t, Transition::Next(state));
            assert_eq!(job.state, state);
        }
        assert_eq!(job.status, JobStatus::Completed);

        // Done is terminal.
        let t = StateMachine::next(&mut job, StepOutcome::Success);
        assert_eq!(t, Transition::Complete(JobOutcome::Success));
        assert_eq!(job.state, State::Done);
    }

    #[test]
    fn failure_is_terminal_with_its_kind() {
        let mut job = sample_job();
        StateMachine::next(&mut job, StepOutcome::Success);
        StateMachine::next(&mut job, StepOutcome::Success);
        assert_eq!(job.state, State::Invoking);

        let t = StateMachine::next(&mut job, StepOutcome::Failure(FailureKind::ProcessLaunch));
        assert_eq!(
            t,
            Transition::Complete(JobOutcome::Failure(FailureKind::ProcessLaunch))
        );
        assert_eq!(job.state, State::Failed(FailureKind::ProcessLaunch));
        assert_eq!(job.status, JobStatus::Failed);
        assert!(!job.state_history.contains(&State::Running));

        // Further outcomes do not resurrect the job.
        let t = StateMachine::next(&mut job, StepOutcome::Success);
        assert_eq!(
            t,
            Transition::Complete(JobOutcome::Failure(FailureKind::ProcessLaunch))
        );
    }

    #[test]
    fn cancellation_from_running_ends_cancelled() {
        let mut job = sample_job();
        for _ in 0..3 {
            StateMachine::next(&mut job, StepOutcome::Success);
        }
        assert_eq!(job.state, State::Running);

        let t = StateMachine::next(&mut job, StepOutcome::CancelRequested);
        assert_eq!(t, Transition::Next(State::Cancelling));

        // A repeated request is absorbed.
        let t = StateMachine::next(&mut job, StepOutcome::CancelRequested);
        assert_eq!(t, Transition::Next(State::Cancelling));

        let t = StateMachine::next(&mut job, StepOutcome::Success);
        assert_eq!(t, Transition::Complete(JobOutcome::Cancelled));
        assert_eq!(job.state, State::Cancelled);
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(!job.state_history.contains(&State::Importing));
    }

    #[test]
    fn cancellation_reachable_from_created() {
        let mut job = sample_job();
        let t = StateMachine::next(&mut job, StepOutcome::CancelRequested);
        assert_eq!(t, Transition::Next(State::Cancelling));
    }

    #[test]
    fn state_history_is_recorded() {
        let mut job = sample_job();
        StateMachine::next(&mut job, StepOutcome::Success);
        StateMachine::next(&mut job, StepOutcome::Success);
        StateMachine::next(&mut job, StepOutcome::Failure(FailureKind::Io));

        assert_eq!(
            job.state_history,
            vec![State::Created, State::Exporting, State::Invoking]
        );
    }

    #[test]
    fn state_display() {
        assert_eq!(State::Created.to_string(), "CREATED");
        assert_eq!(State::CleaningUp.to_string(), "CLEANING_UP");
        assert_eq!(
            State::Failed(FailureKind::AlreadySplitData).to_string(),
            "FAILED(AlreadySplitData)"
        );
    }
}
