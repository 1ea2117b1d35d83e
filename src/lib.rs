//! Orchestration of out-of-process segmentation training and prediction jobs.
//!
//! Images are exported from an [`store::ImageStore`] into a [`workspace::Workspace`],
//! the external tool is run by the [`runner::ProcessRunner`], and the masks it
//! writes are traced back into annotations by the [`importer`]. The
//! [`orchestrator::JobOrchestrator`] sequences these steps through the job
//! state machine.

pub mod cli;
pub mod config;
pub mod contour;
pub mod error;
pub mod exporter;
pub mod geometry;
pub mod importer;
pub mod metadata;
pub mod orchestrator;
pub mod progress;
pub mod runner;
pub mod state_machine;
pub mod store;
pub mod ui;
pub mod workspace;
