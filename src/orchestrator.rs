use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::JobError;
use crate::exporter::Exporter;
use crate::importer::{ClassMap, ImportOptions, import_predictions};
use crate::metadata::find_sidecar;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::runner::ProcessRunner;
use crate::state_machine::{
    Job, JobArtifacts, JobOutcome, JobParams, JobResult, JobSpec, JobStatus, Mode, StateMachine, StepOutcome,
};
use crate::store::{ImageRecord, ImageStore};
use crate::workspace::Workspace;

/// What to do with training files left in `images/` and `masks/` by an earlier job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResidualDecision {
    Keep,
    Delete,
}

/// Decides about residual training data before a training job exports.
pub trait ResidualPolicy: Send + Sync {
    fn decide(&self, residual: &[PathBuf]) -> ResidualDecision;
}

impl ResidualPolicy for ResidualDecision {
    fn decide(&self, _residual: &[PathBuf]) -> ResidualDecision {
        *self
    }
}

/// Handle to a submitted job.
pub struct JobHandle {
    pub id: String,
    /// Progress of the job, closed once it finishes.
    pub events: mpsc::UnboundedReceiver<ProgressEvent>,
    cancel: CancellationToken,
    task: JoinHandle<JobResult>,
}

impl JobHandle {
    /// Ask the job to stop. Safe to call more than once.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the job's result.
    pub async fn join(self) -> Result<JobResult, tokio::task::JoinError> {
        self.task.await
    }
}

// Everything a run accumulates that cleanup and the result need.
#[derive(Default)]
struct RunContext {
    workspace: Option<Workspace>,
    written: Vec<PathBuf>,
    predictions: Vec<PathBuf>,
    process_started: bool,
    artifacts: JobArtifacts,
}

/// Drives jobs through the state machine: export, run the tool, import, clean up.
#[derive(Clone)]
pub struct JobOrchestrator {
    store: Arc<dyn ImageStore>,
    runner: ProcessRunner,
    project_root: PathBuf,
    residual: Arc<dyn ResidualPolicy>,
}

impl JobOrchestrator {
    /// Residual training data is kept unless another policy is set.
    pub fn new(store: Arc<dyn ImageStore>, runner: ProcessRunner, project_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            runner,
            project_root: project_root.into(),
            residual: Arc::new(ResidualDecision::Keep),
        }
    }

    pub fn with_residual_policy(mut self, policy: Arc<dyn ResidualPolicy>) -> Self {
        self.residual = policy;
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Start `spec` on its own task and return immediately.
    pub fn submit(&self, spec: JobSpec) -> JobHandle {
        let job = Job::new(spec);
        let id = job.id.clone();
        let (sink, events) = ProgressSink::channel();
        let cancel = CancellationToken::new();
        let this = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { this.run(job, sink, token).await });
        JobHandle {
            id,
            events,
            cancel,
            task,
        }
    }

    /// Run a job to a terminal state. Cleanup runs on every path.
    pub async fn run(&self, mut job: Job, sink: ProgressSink, cancel: CancellationToken) -> JobResult {
        job.status = JobStatus::InProgress;
        info!(job = %job.id, mode = %job.spec.mode(), images = job.spec.images().len(), "Job started");
        let mut ctx = RunContext::default();

        let result = self.execute(&mut job, &mut ctx, &sink, &cancel).await;
        let (outcome, message) = match result {
            Ok(()) => {
                self.cleanup(&job, &ctx);
                apply(&mut job, StepOutcome::Success, &sink);
                (JobOutcome::Success, None)
            }
            Err(e) if matches!(e, JobError::Interrupted) || cancel.is_cancelled() => {
                apply(&mut job, StepOutcome::CancelRequested, &sink);
                self.cleanup(&job, &ctx);
                apply(&mut job, StepOutcome::Success, &sink);
                (JobOutcome::Cancelled, Some(JobError::Interrupted.to_string()))
            }
            Err(e) => {
                warn!(job = %job.id, kind = %e.kind(), error = %e, "Job failed");
                self.cleanup(&job, &ctx);
                apply(&mut job, StepOutcome::Failure(e.kind()), &sink);
                (JobOutcome::Failure(e.kind()), Some(e.to_string()))
            }
        };

        info!(job = %job.id, state = %job.state, "Job finished");
        JobResult::from_job(&job, outcome, message, ctx.artifacts)
    }

    async fn execute(
        &self,
        job: &mut Job,
        ctx: &mut RunContext,
        sink: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        let spec = job.spec.clone();

        // CREATED: preconditions and workspace.
        self.runner.validate()?;
        let workspace = Workspace::ensure(&self.project_root, &self.runner.tool().workspace_dir)?;
        ctx.workspace = Some(workspace.clone());
        if spec.mode() == Mode::Train {
            self.check_training_preconditions(&spec, &workspace)?;
        }
        advance(job, sink, cancel)?;

        // EXPORTING
        let exported = self.export(&spec, &workspace, ctx, sink, cancel).await?;
        advance(job, sink, cancel)?;

        // INVOKING
        let (args, marker) = match spec.params() {
            JobParams::Predict(p) => {
                ctx.predictions = exported
                    .values()
                    .filter_map(|f| f.file_name().map(|n| workspace.predictions_dir().join(n)))
                    .collect();
                (self.runner.predict_args(&workspace, p), &self.runner.tool().predict_marker)
            }
            JobParams::Train(t) => (self.runner.train_args(&workspace, t), &self.runner.tool().train_marker),
        };
        let mut process = self.runner.start(&args)?;
        ctx.process_started = true;
        process.stream_output(sink.clone(), marker);
        if let Err(e) = advance(job, sink, cancel) {
            process.kill().await;
            return Err(e);
        }

        // RUNNING
        let status = process.wait(cancel).await;
        ctx.artifacts.completed_units = process.completed_units();
        let output = process.finish().await;
        ctx.artifacts.process_log = output.lines;
        let status = status?;
        if !status.success() {
            let mut message = format!("external tool exited with {status}");
            if !output.stderr_tail.is_empty() {
                message.push_str(": ");
                message.push_str(&output.stderr_tail.join("\n"));
            }
            return Err(JobError::ProcessRuntime(message));
        }
        advance(job, sink, cancel)?;

        // IMPORTING
        match spec.params() {
            JobParams::Predict(p) => {
                let predictions: BTreeMap<ImageRecord, PathBuf> = exported
                    .into_iter()
                    .filter_map(|(image, file)| {
                        file.file_name()
                            .map(|n| (image, workspace.predictions_dir().join(n)))
                    })
                    .collect();
                let classes: ClassMap = BTreeMap::from([(1, p.target_class.clone())]);
                let post = spec.post_processing();
                let options = ImportOptions {
                    split: post.split,
                    remove_existing: post.remove_existing,
                };
                let store = Arc::clone(&self.store);
                let (sink, cancel) = (sink.clone(), cancel.clone());
                let summary = tokio::task::spawn_blocking(move || {
                    import_predictions(store.as_ref(), &predictions, &classes, options, &cancel, &sink)
                })
                .await
                .map_err(|e| JobError::PersistFailure {
                    image: "*".to_string(),
                    reason: e.to_string(),
                })??;
                info!(
                    images = summary.images,
                    annotations = summary.annotations,
                    skipped = summary.skipped.len(),
                    "Predictions imported"
                );
                ctx.artifacts.import = Some(summary);
            }
            JobParams::Train(t) => {
                let model_dir = workspace.model_dir(&t.model_name);
                if !model_dir.is_dir() {
                    return Err(JobError::ProcessRuntime(format!(
                        "training finished but no model was written to {}",
                        model_dir.display()
                    )));
                }
                ctx.artifacts.metrics_file = find_sidecar(&model_dir.join(format!("{}.h5", t.model_name)));
                info!(model = %model_dir.display(), "Model trained");
                ctx.artifacts.model_dir = Some(model_dir);
            }
        }
        advance(job, sink, cancel)
    }

    fn check_training_preconditions(&self, spec: &JobSpec, workspace: &Workspace) -> Result<(), JobError> {
        let split = workspace.split_dirs();
        if !split.is_empty() {
            return Err(JobError::AlreadySplitData { dirs: split });
        }
        let found = spec.distinct_images();
        if found < 3 {
            return Err(JobError::InsufficientTrainingData { found });
        }
        let residual = workspace.residual_files()?;
        if !residual.is_empty() {
            match self.residual.decide(&residual) {
                ResidualDecision::Delete => {
                    workspace.delete_residual_data()?;
                }
                ResidualDecision::Keep => {
                    info!(files = residual.len(), "Keeping residual training data");
                }
            }
        }
        Ok(())
    }

    // Export on the blocking pool; the ledger of written files comes back
    // even when the export fails.
    async fn export(
        &self,
        spec: &JobSpec,
        workspace: &Workspace,
        ctx: &mut RunContext,
        sink: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<ImageRecord, PathBuf>, JobError> {
        let exporter = Exporter::new(Arc::clone(&self.store), workspace.clone());
        let job_spec = spec.clone();
        let (sink, cancel) = (sink.clone(), cancel.clone());

        let (written, result) = tokio::task::spawn_blocking(move || {
            let spec = job_spec;
            let mut written = Vec::new();
            let result = match spec.params() {
                JobParams::Predict(_) => exporter
                    .export_for_predict(spec.images(), &cancel, &sink, &mut written)
                    .map(|export| {
                        let skipped = export
                            .skipped
                            .iter()
                            .map(|(image, e)| (image.to_string(), e.to_string()))
                            .collect();
                        (export.files, skipped)
                    }),
                JobParams::Train(t) => exporter
                    .export_for_train(
                        spec.images(),
                        t.crop_class.as_deref(),
                        &t.foreground_class,
                        &cancel,
                        &sink,
                        &mut written,
                    )
                    .map(|_| (BTreeMap::new(), Vec::new())),
            };
            (written, result)
        })
        .await
        .map_err(|e| JobError::ExportFailed {
            image: "*".to_string(),
            reason: e.to_string(),
        })?;

        ctx.artifacts.exported = written.len();
        ctx.written = written;
        let (files, skipped) = result?;
        ctx.artifacts.skipped = skipped;

        if spec.mode() == Mode::Predict && files.is_empty() {
            return Err(JobError::ExportFailed {
                image: "*".to_string(),
                reason: "none of the images could be exported".to_string(),
            });
        }
        Ok(files)
    }

    // Removes the files this job wrote. Training exports are only removed
    // when the tool never got to see them.
    fn cleanup(&self, job: &Job, ctx: &RunContext) {
        let Some(workspace) = &ctx.workspace else {
            return;
        };
        let files: Vec<PathBuf> = match job.spec.mode() {
            Mode::Predict => ctx.written.iter().chain(&ctx.predictions).cloned().collect(),
            Mode::Train if !ctx.process_started => ctx.written.clone(),
            Mode::Train => Vec::new(),
        };
        let removed = workspace.remove_files(&files);
        info!(job = %job.id, removed, "Cleaned up job files");
    }
}

/// Move to the next state unless cancellation was requested.
fn advance(job: &mut Job, sink: &ProgressSink, cancel: &CancellationToken) -> Result<(), JobError> {
    if cancel.is_cancelled() {
        return Err(JobError::Interrupted);
    }
    apply(job, StepOutcome::Success, sink);
    Ok(())
}

fn apply(job: &mut Job, outcome: StepOutcome, sink: &ProgressSink) {
    let before = job.state;
    StateMachine::next(job, outcome);
    if job.state != before {
        info!(job = %job.id, from = %before, to = %job.state, "State changed");
        sink.emit(ProgressEvent::StateChanged(job.state));
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{EnvironmentKind, RunnerConfig, ToolConfig};
    use crate::error::FailureKind;
    use crate::runner::STREAM_JOIN_TIMEOUT;
    use crate::runner::testing::fake_tool;
    use crate::state_machine::{JobRequest, State};
    use crate::store::FsImageStore;
    use crate::store::testing::write_gray_png;
    use crate::workspace::tif_files;
    use std::fs;
    use tempfile::TempDir;

    // Copies every staged raster into the output folder, so an all-ones
    // image comes back as an all-ones mask.
    const PREDICT_TOOL: &str = r#"
echo "$*" > "$(dirname "$0")/args.txt"
while [ $# -gt 0 ]; do
  case "$1" in
    --dir) dir="$2"; shift ;;
    --savedir) save="$2"; shift ;;
  esac
  shift
done
for f in "$dir"/*.tif; do
  echo "Tiling $(basename "$f")"
  cp "$f" "$save/"
done
"#;

    const TRAIN_TOOL: &str = r#"
touch "$(dirname "$0")/launched"
while [ $# -gt 0 ]; do
  case "$1" in
    --basedir) base="$2"; shift ;;
    --name) name="$2"; shift ;;
  esac
  shift
done
mkdir -p "$base/models/$name"
echo '{}' > "$base/models/$name/$name.json"
echo "Epoch 1/2"
echo "Epoch 2/2"
"#;

    struct Project {
        dir: TempDir,
        tools: TempDir,
        store: Arc<FsImageStore>,
    }

    impl Project {
        fn new(images: &[&str]) -> Self {
            let dir = TempDir::new().unwrap();
            for name in images {
                write_gray_png(dir.path(), name, 6, 4, 1);
            }
            let store = Arc::new(FsImageStore::new(dir.path()));
            Self {
                dir,
                tools: TempDir::new().unwrap(),
                store,
            }
        }

        fn orchestrator(&self, tool_body: &str) -> JobOrchestrator {
            let tool = fake_tool(self.tools.path(), tool_body);
            let runner = ProcessRunner::new(
                RunnerConfig::new(tool.to_str().unwrap(), EnvironmentKind::Executable),
                ToolConfig::default(),
            );
            JobOrchestrator::new(self.store.clone(), runner, self.dir.path())
        }

        fn workspace(&self) -> Workspace {
            Workspace::ensure(self.dir.path(), &ToolConfig::default().workspace_dir).unwrap()
        }

        fn model(&self) -> PathBuf {
            let model = self.tools.path().join("M.h5");
            fs::write(&model, b"weights").unwrap();
            model
        }

        fn launched(&self) -> bool {
            self.tools.path().join("launched").exists()
        }
    }

    fn predict_spec(images: &[&str], model: &Path) -> JobSpec {
        JobSpec::new(JobRequest {
            mode: Some(Mode::Predict),
            images: images.iter().map(|s| s.to_string()).collect(),
            model_path: Some(model.to_path_buf()),
            resolution: Some(1),
            threshold: Some(0.5),
            target_class: Some("Region".into()),
            ..Default::default()
        })
        .unwrap()
    }

    fn train_spec(images: &[&str]) -> JobSpec {
        JobSpec::new(JobRequest {
            mode: Some(Mode::Train),
            images: images.iter().map(|s| s.to_string()).collect(),
            base_model: Some("b0".into()),
            epochs: Some(2),
            foreground_class: Some("Tumor".into()),
            model_name: Some("EfficientV2UNet_b0_epochs2".into()),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn predict_job_round_trip() {
        let project = Project::new(&["A.png", "B.png"]);
        let model = project.model();
        let orch = project.orchestrator(PREDICT_TOOL);

        let handle = orch.submit(predict_spec(&["A.png", "B.png"], &model));
        let result = handle.join().await.unwrap();

        assert!(result.success(), "{:?}", result.message);
        assert_eq!(
            result.state_transitions,
            vec![
                State::Created,
                State::Exporting,
                State::Invoking,
                State::Running,
                State::Importing,
                State::CleaningUp,
                State::Done
            ]
        );
        let ws = project.workspace();
        let args = fs::read_to_string(project.tools.path().join("args.txt")).unwrap();
        assert!(args.contains(&format!("--dir {}", ws.temp_dir().display())));
        assert!(args.contains(&format!(
            "--model {} --resolution 1 --threshold 0.5 --savedir {} --use_less_memory",
            model.display(),
            ws.predictions_dir().display()
        )));

        for name in ["A.png", "B.png"] {
            let annotations = project.store.read_annotations(&ImageRecord::new(name)).unwrap();
            assert_eq!(annotations.len(), 1);
            assert!(annotations[0].has_class("Region"));
            let b = annotations[0].geometry.bounds().unwrap();
            assert_eq!((b.min_x, b.min_y, b.max_x, b.max_y), (0.0, 0.0, 6.0, 4.0));
        }
        assert!(tif_files(ws.temp_dir()).unwrap().is_empty());
        assert!(tif_files(ws.predictions_dir()).unwrap().is_empty());

        let summary = result.artifacts.import.unwrap();
        assert_eq!((summary.images, summary.annotations), (2, 2));
        assert_eq!(result.artifacts.completed_units, 2);
    }

    #[tokio::test]
    async fn missing_predictions_are_skipped_not_fatal() {
        let project = Project::new(&["A.png", "B.png"]);
        let model = project.model();
        let orch = project.orchestrator("echo 'nothing to do'");

        let result = orch.submit(predict_spec(&["A.png", "B.png"], &model)).join().await.unwrap();

        assert!(result.success());
        let summary = result.artifacts.import.unwrap();
        assert_eq!(summary.images, 0);
        assert_eq!(summary.skipped.len(), 2);
        assert!(tif_files(project.workspace().temp_dir()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn train_job_produces_model_and_keeps_training_data() {
        let project = Project::new(&["a.png", "b.png", "c.png"]);
        let orch = project.orchestrator(TRAIN_TOOL);

        let result = orch.submit(train_spec(&["a.png", "b.png", "c.png"])).join().await.unwrap();

        assert!(result.success(), "{:?}", result.message);
        let ws = project.workspace();
        let model_dir = ws.model_dir("EfficientV2UNet_b0_epochs2");
        assert_eq!(result.artifacts.model_dir, Some(model_dir.clone()));
        assert_eq!(
            result.artifacts.metrics_file,
            Some(model_dir.join("EfficientV2UNet_b0_epochs2.json"))
        );
        assert_eq!(result.artifacts.completed_units, 2);
        assert_eq!(result.artifacts.process_log, vec!["Epoch 1/2", "Epoch 2/2"]);
        assert_eq!(tif_files(ws.images_dir()).unwrap().len(), 3);
        assert_eq!(tif_files(ws.masks_dir()).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn train_without_model_output_fails() {
        let project = Project::new(&["a.png", "b.png", "c.png"]);
        let orch = project.orchestrator("echo 'Epoch 1/1'");

        let result = orch.submit(train_spec(&["a.png", "b.png", "c.png"])).join().await.unwrap();
        assert_eq!(result.failure_kind(), Some(FailureKind::ProcessRuntime));
    }

    #[tokio::test]
    async fn two_distinct_images_are_not_enough_to_train() {
        let project = Project::new(&["a.png", "b.png"]);
        let orch = project.orchestrator(TRAIN_TOOL);

        let result = orch
            .submit(train_spec(&["a.png", "b.png", "a.png"]))
            .join()
            .await
            .unwrap();

        assert_eq!(result.failure_kind(), Some(FailureKind::InsufficientTrainingData));
        assert!(!result.visited(State::Exporting));
        assert!(!project.launched());
        assert!(tif_files(project.workspace().images_dir()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn split_workspace_blocks_training() {
        let project = Project::new(&["a.png", "b.png", "c.png"]);
        fs::create_dir_all(project.workspace().images_dir().join("train")).unwrap();
        let orch = project.orchestrator(TRAIN_TOOL);

        let result = orch.submit(train_spec(&["a.png", "b.png", "c.png"])).join().await.unwrap();

        assert_eq!(result.failure_kind(), Some(FailureKind::AlreadySplitData));
        assert!(!result.visited(State::Exporting));
        assert!(!project.launched());
    }

    #[tokio::test]
    async fn residual_training_data_deleted_on_request() {
        let project = Project::new(&["a.png", "b.png", "c.png"]);
        let ws = project.workspace();
        fs::write(ws.images_dir().join("old.tif"), b"x").unwrap();
        fs::write(ws.masks_dir().join("old.tif"), b"x").unwrap();
        let orch = project
            .orchestrator(TRAIN_TOOL)
            .with_residual_policy(Arc::new(ResidualDecision::Delete));

        let result = orch.submit(train_spec(&["a.png", "b.png", "c.png"])).join().await.unwrap();

        assert!(result.success());
        assert!(!ws.images_dir().join("old.tif").exists());
        assert!(!ws.masks_dir().join("old.tif").exists());
    }

    #[tokio::test]
    async fn unconfigured_runner_fails_fast() {
        let project = Project::new(&["A.png"]);
        let model = project.model();
        let runner = ProcessRunner::new(RunnerConfig::default(), ToolConfig::default());
        let orch = JobOrchestrator::new(project.store.clone(), runner, project.dir.path());

        let result = orch.submit(predict_spec(&["A.png"], &model)).join().await.unwrap();

        assert_eq!(result.failure_kind(), Some(FailureKind::Configuration));
        assert_eq!(
            result.state_transitions,
            vec![State::Created, State::Failed(FailureKind::Configuration)]
        );
    }

    #[tokio::test]
    async fn non_utf8_tool_output_does_not_fail_the_job() {
        let project = Project::new(&["A.png", "B.png"]);
        let model = project.model();
        let body = format!(
            "printf 'Caf\\351 loading\\n'\nfor i in 1 2 3 4 5 6 7 8 9 10; do echo \"Tiling $i\"; done\n{PREDICT_TOOL}"
        );
        let orch = project.orchestrator(&body);

        let result = orch.submit(predict_spec(&["A.png", "B.png"], &model)).join().await.unwrap();

        assert!(result.success(), "{:?}", result.message);
        assert_eq!(result.artifacts.completed_units, 12);
        assert_eq!(result.artifacts.import.as_ref().unwrap().annotations, 2);
    }

    #[tokio::test]
    async fn nonzero_exit_fails_and_cleans_up() {
        let project = Project::new(&["A.png"]);
        let model = project.model();
        let orch = project.orchestrator("echo 'Tiling A.tif'\necho 'CUDA out of memory' >&2\nexit 2");

        let result = orch.submit(predict_spec(&["A.png"], &model)).join().await.unwrap();

        assert_eq!(result.failure_kind(), Some(FailureKind::ProcessRuntime));
        assert!(result.message.as_deref().unwrap().contains("CUDA out of memory"));
        assert!(!result.visited(State::Importing));
        assert!(tif_files(project.workspace().temp_dir()).unwrap().is_empty());
        assert!(project.store.read_annotations(&ImageRecord::new("A.png")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelling_a_running_job_kills_the_tool() {
        let project = Project::new(&["A.png"]);
        let model = project.model();
        let orch = project.orchestrator("echo started\nexec sleep 30");

        let mut handle = orch.submit(predict_spec(&["A.png"], &model));
        // Wait until the tool reports in.
        while let Some(event) = handle.events.recv().await {
            if matches!(event, ProgressEvent::Line { ref text, .. } if text == "started") {
                break;
            }
        }
        let started = std::time::Instant::now();
        handle.cancel();
        handle.cancel();
        let result = handle.join().await.unwrap();

        assert!(started.elapsed() < STREAM_JOIN_TIMEOUT);
        assert_eq!(result.outcome, JobOutcome::Cancelled);
        assert_eq!(result.status, JobStatus::Cancelled);
        assert!(result.visited(State::Running));
        assert!(result.visited(State::Cancelling));
        assert!(!result.visited(State::Importing));
        assert_eq!(result.state_transitions.last(), Some(&State::Cancelled));
        assert!(tif_files(project.workspace().temp_dir()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_before_start_never_launches() {
        let project = Project::new(&["a.png", "b.png", "c.png"]);
        let orch = project.orchestrator(TRAIN_TOOL);
        let job = Job::new(train_spec(&["a.png", "b.png", "c.png"]));
        let (sink, _events) = ProgressSink::channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = orch.run(job, sink, cancel).await;

        assert_eq!(result.outcome, JobOutcome::Cancelled);
        assert!(!project.launched());
        assert!(tif_files(project.workspace().images_dir()).unwrap().is_empty());
    }
}
