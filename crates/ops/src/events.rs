//! Event emission: classification of failures and the stock sinks.

use std::sync::Arc;

use keel_core::{EventSink, FailureClassifier, KeelError, ProgressEvent};
use tokio::sync::mpsc;
use tracing::{error, info};

/// Pairs a sink with the classifier used to enrich failure events.
#[derive(Clone)]
pub struct Emitter {
    sink: Arc<dyn EventSink>,
    classifier: Arc<dyn FailureClassifier>,
}

impl Emitter {
    pub fn new(sink: Arc<dyn EventSink>, classifier: Arc<dyn FailureClassifier>) -> Self { Self { sink, classifier } }

    /// Same sink, different classifier.
    pub fn with_classifier(&self, classifier: Arc<dyn FailureClassifier>) -> Self {
        Self { sink: self.sink.clone(), classifier }
    }

    pub fn info(&self, event: ProgressEvent) { self.sink.info(event) }

    /// Emit `event` as a failure: summary set, details from `err`, plus code,
    /// probable cause and remediation.
    pub fn fail(&self, event: ProgressEvent, summary: impl Into<String>, err: &KeelError) {
        let class = self.classifier.classify(err);
        self.sink.error(event.failed(summary, err, class), err);
    }
}

/// Writes events to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn info(&self, ev: ProgressEvent) {
        info!(op = %ev.operation_id, summary = %ev.summary, details = %ev.details, "event");
    }

    fn error(&self, ev: ProgressEvent, err: &KeelError) {
        error!(
            op = %ev.operation_id,
            summary = %ev.summary,
            code = ?ev.error_code,
            cause = %ev.probable_cause.as_deref().unwrap_or(""),
            remedy = %ev.suggested_remediation.as_deref().unwrap_or(""),
            error = %err,
            "event"
        );
    }
}

/// Forwards events into an unbounded channel; sends after the receiver is
/// gone are dropped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn info(&self, ev: ProgressEvent) { let _ = self.tx.send(ev); }

    fn error(&self, ev: ProgressEvent, _err: &KeelError) { let _ = self.tx.send(ev); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::TaxonomyClassifier;

    #[tokio::test]
    async fn emitter_classifies_before_sending() {
        let (sink, mut rx) = ChannelSink::channel();
        let em = Emitter::new(Arc::new(sink), Arc::new(TaxonomyClassifier));
        em.info(ProgressEvent::new("1", "consul", "keel").with_summary("Deploying", "None"));
        em.fail(ProgressEvent::new("1", "consul", "keel"), "Error unknown operation name", &KeelError::OperationNotFound("x".into()));

        let first = rx.recv().await.unwrap();
        assert!(!first.is_failure());
        let second = rx.recv().await.unwrap();
        assert_eq!(second.summary, "Error unknown operation name");
        assert_eq!(second.error_code, Some(1000));
        assert_eq!(second.details, "operation not found: x");
    }
}
