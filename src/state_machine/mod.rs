mod job;
mod spec;
mod state;

pub use job::{Job, JobArtifacts, JobOutcome, JobResult, JobStatus};
pub use spec::{BaseModel, JobParams, JobRequest, JobSpec, Mode, PostProcessing, PredictParams, TrainParams};
pub use state::{State, StateMachine, StepOutcome, Transition};
