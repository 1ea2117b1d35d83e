//! Interface de terminal do segjob: barra de progresso e saída colorida.
//!
//! Usa `indicatif` para a barra de progresso e `console` para cores. O
//! [`JobProgress`] consome os [`ProgressEvent`]s de um job em execução e
//! mostra o estado atual, a última linha da ferramenta externa e o resultado.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::FailureKind;
use crate::progress::ProgressEvent;
use crate::state_machine::{JobOutcome, JobResult, JobStatus, Mode, State};

/// Indicador visual de progresso para um job no terminal.
pub struct JobProgress {
    // Barra do indicatif; o comprimento é o número de unidades esperadas.
    pb: ProgressBar,
    mode: Mode,
    epochs: Option<u64>,
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl JobProgress {
    /// Inicia a barra para `images` imagens. Em treino, `epochs` define o
    /// comprimento da fase de execução.
    pub fn start(mode: Mode, images: usize, epochs: Option<u32>) -> Self {
        let pb = ProgressBar::new(images as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{prefix}] {bar:30.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style.progress_chars("=> "));
        pb.set_prefix(State::Created.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            mode,
            epochs: epochs.map(u64::from),
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }

    /// Atualiza a barra a partir de um evento do job.
    pub fn handle(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::StateChanged(state) => {
                self.pb.set_prefix(state.to_string());
                if *state == State::Running {
                    // A fase de execução conta imagens (predição) ou épocas (treino).
                    if let (Mode::Train, Some(epochs)) = (self.mode, self.epochs) {
                        self.pb.set_length(epochs);
                    }
                    self.pb.set_position(0);
                }
            }
            ProgressEvent::Exported {
                image,
                completed,
                total,
            } => {
                self.pb.set_length(*total as u64);
                self.pb.set_position(*completed as u64);
                self.pb.set_message(format!("exported {image}"));
            }
            ProgressEvent::ImageSkipped { image, reason } => {
                self.pb.println(format!(
                    "  {} skipped {image}: {reason}",
                    self.yellow.apply_to("!")
                ));
            }
            ProgressEvent::Line { text, completed_units } => {
                self.pb.set_position(*completed_units as u64);
                self.pb.set_message(self.dim.apply_to(truncate(text, 60)).to_string());
            }
            ProgressEvent::StreamError(message) => {
                self.pb.println(format!(
                    "  {} tool output unavailable: {message}",
                    self.yellow.apply_to("!")
                ));
            }
            ProgressEvent::Imported { image, annotations } => {
                self.pb.set_message(format!("{image}: {annotations} annotations"));
            }
        }
    }

    /// Finaliza a barra e mostra o resultado do job.
    pub fn complete(&self, result: &JobResult) {
        self.pb.finish_and_clear();
        match result.outcome {
            JobOutcome::Success => {
                println!("  {} Job completed successfully", self.green.apply_to("✓"));
            }
            JobOutcome::Cancelled => {
                println!("  {} Job cancelled", self.yellow.apply_to("■"));
            }
            JobOutcome::Failure(kind) => {
                let message = result.message.as_deref().unwrap_or("");
                println!("  {} Job failed ({kind}): {message}", self.red.apply_to("✗"));
                if let Some(hint) = hint(kind) {
                    println!("    {}", self.dim.apply_to(hint));
                }
            }
        }
    }

    /// Imprime o resultado em JSON com estilo colorido.
    pub fn print_result(&self, result: &JobResult) {
        let status_style = match result.status {
            JobStatus::Completed => &self.green,
            JobStatus::Failed => &self.red,
            _ => &self.yellow,
        };
        println!();
        println!("{}", status_style.apply_to("─── Job Result ───"));
        println!("{}", serde_json::to_string_pretty(result).unwrap_or_default());
    }
}

// Mensagem acionável por tipo de falha.
fn hint(kind: FailureKind) -> Option<&'static str> {
    match kind {
        FailureKind::Configuration => Some("Set runner.executable in segjob.toml or the SEGJOB_PYTHON variable."),
        FailureKind::AlreadySplitData => {
            Some("Move the files out of the train/val/test folders in images/ and masks/ and try again.")
        }
        FailureKind::InsufficientTrainingData => Some("Select at least 3 images for training."),
        FailureKind::ProcessLaunch => Some("Check that the configured Python environment exists."),
        _ => None,
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
