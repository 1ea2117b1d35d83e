use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::spec::{JobSpec, Mode};
use super::state::State;
use crate::error::FailureKind;
use crate::importer::ImportSummary;

/// The terminal outcome of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    Success,
    Failure(FailureKind),
    Cancelled,
}

/// Tracks the lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

/// One segmentation job as driven by the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub spec: JobSpec,
    pub status: JobStatus,
    pub state: State,
    pub state_history: Vec<State>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(spec: JobSpec) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            spec,
            status: JobStatus::Pending,
            state: State::Created,
            state_history: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// Files and counters a job collected on its way to a terminal state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobArtifacts {
    /// Rasters written into the workspace by the exporter.
    pub exported: usize,
    /// Images left out of the export, with the reason.
    pub skipped: Vec<(String, String)>,
    /// Marker lines seen in the tool's output (images for predict, epochs for train).
    pub completed_units: usize,
    pub process_log: Vec<String>,
    pub import: Option<ImportSummary>,
    pub model_dir: Option<PathBuf>,
    pub metrics_file: Option<PathBuf>,
}

/// Structured record produced when a job reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub mode: Mode,
    pub outcome: JobOutcome,
    pub message: Option<String>,
    pub status: JobStatus,
    pub state_transitions: Vec<State>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    #[serde(flatten)]
    pub artifacts: JobArtifacts,
}

impl JobResult {
    /// Generate the result record from a job in a terminal state.
    pub fn from_job(job: &Job, outcome: JobOutcome, message: Option<String>, artifacts: JobArtifacts) -> Self {
        let now = Utc::now();
        let duration = now - job.created_at;
        let mut transitions = job.state_history.clone();
        transitions.push(job.state);

        Self {
            job_id: job.id.clone(),
            mode: job.spec.mode(),
            outcome,
            message,
            status: job.status,
            state_transitions: transitions,
            started_at: job.created_at,
            completed_at: now,
            duration_ms: duration.num_milliseconds(),
            artifacts,
        }
    }

    pub fn success(&self) -> bool {
        self.outcome == JobOutcome::Success
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self.outcome {
            JobOutcome::Failure(kind) => Some(kind),
            _ => None,
        }
    }

    /// Whether the job ever entered `state`.
    pub fn visited(&self, state: State) -> bool {
        self.state_transitions.contains(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::test_support::sample_job;
    use crate::state_machine::{StateMachine, StepOutcome};

    #[test]
    fn job_creation_defaults() {
        let job = sample_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.state, State::Created);
        assert!(job.state_history.is_empty());
        assert!(Uuid::parse_str(&job.id).is_ok());
    }

    #[test]
    fn result_from_failed_job() {
        let mut job = sample_job();
        StateMachine::next(&mut job, StepOutcome::Failure(FailureKind::InsufficientTrainingData));

        let result = JobResult::from_job(
            &job,
            JobOutcome::Failure(FailureKind::InsufficientTrainingData),
            Some("only 2 images".into()),
            JobArtifacts::default(),
        );
        assert!(!result.success());
        assert_eq!(result.failure_kind(), Some(FailureKind::InsufficientTrainingData));
        assert_eq!(result.mode, Mode::Train);
        assert_eq!(
            result.state_transitions,
            vec![State::Created, State::Failed(FailureKind::InsufficientTrainingData)]
        );
        assert!(!result.visited(State::Exporting));
        assert!(result.duration_ms >= 0);
    }

    #[test]
    fn result_serializes_with_flattened_artifacts() {
        let job = sample_job();
        let artifacts = JobArtifacts {
            exported: 3,
            model_dir: Some(PathBuf::from("ws/models/net")),
            ..Default::default()
        };
        let result = JobResult::from_job(&job, JobOutcome::Success, None, artifacts);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["exported"], 3);
        assert_eq!(json["model_dir"], "ws/models/net");
        assert_eq!(json["outcome"], "Success");
    }
}
