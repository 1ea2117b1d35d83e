//! Progress events flowing from a running job to its caller.

use tokio::sync::mpsc;
use tracing::trace;

use crate::state_machine::State;

/// Events emitted while a job runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// The job entered a new state.
    StateChanged(State),
    /// A raster was written into the workspace.
    Exported {
        image: String,
        completed: usize,
        total: usize,
    },
    /// An image was left out of the job.
    ImageSkipped { image: String, reason: String },
    /// A line from the external tool's standard output.
    Line { text: String, completed_units: usize },
    /// Reading the tool's output failed. The process keeps running.
    StreamError(String),
    /// Annotations were written back for an image.
    Imported { image: String, annotations: usize },
}

/// Sending half of a job's progress channel.
///
/// Emitting never fails: once the receiver is gone, events are dropped.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Err(mpsc::error::SendError(event)) = self.tx.send(event) {
            trace!(?event, "Progress receiver closed, event dropped");
        }
    }

    /// False once the receiving side has been dropped.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_arrive_in_order() {
        let (sink, mut rx) = ProgressSink::channel();
        sink.emit(ProgressEvent::StateChanged(State::Exporting));
        sink.emit(ProgressEvent::Line {
            text: "Epoch 1/3".into(),
            completed_units: 1,
        });

        assert_eq!(rx.try_recv().unwrap(), ProgressEvent::StateChanged(State::Exporting));
        assert!(matches!(rx.try_recv().unwrap(), ProgressEvent::Line { completed_units: 1, .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn emit_after_receiver_dropped_is_silent() {
        let (sink, rx) = ProgressSink::channel();
        assert!(sink.is_connected());
        drop(rx);
        assert!(!sink.is_connected());
        sink.emit(ProgressEvent::StreamError("closed".into()));
    }
}
