//! Optional external classifier, injected as a strategy.
//!
//! The engine never waits on a classifier longer than the caller allows: each
//! call runs on its own thread and the answer is collected with a timeout.
//! A classifier that overruns is abandoned; its late answer is dropped.
//! Abandoned calls keep their thread until the classifier returns, so the
//! number of calls still running is capped and further calls fail fast.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::models::AccountType;
use crate::patterns::PatternFeatures;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCategory {
    pub id: String,
    pub name: String,
    pub account_type: AccountType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierRequest {
    pub source_name: String,
    pub source_system: Option<String>,
    pub features: PatternFeatures,
    pub candidates: Vec<CandidateCategory>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierSuggestion {
    pub category_id: String,
    /// The classifier's own certainty in `[0, 1]`.
    pub confidence: f64,
    #[serde(default)]
    pub explanation: String,
}

/// A semantic classifier the engine can fall back on, such as an LLM-backed service.
///
/// Implementations should enforce their own I/O timeouts. A call that never
/// returns holds one of the [`BoundedClassifier`] slots for good.
pub trait ExternalClassifier: Send + Sync {
    fn classify(&self, request: &ClassifierRequest) -> anyhow::Result<ClassifierSuggestion>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClassifierOutcome {
    Suggested(ClassifierSuggestion),
    Failed(String),
    TimedOut,
}

pub const DEFAULT_MAX_RUNNING: usize = 4;

/// Releases a running slot when the classifier thread ends, even by panic.
struct Slot(Arc<AtomicUsize>);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An external classifier with a per-call timeout and a cap on calls still running.
#[derive(Clone)]
pub struct BoundedClassifier {
    classifier: Arc<dyn ExternalClassifier>,
    timeout: Duration,
    running: Arc<AtomicUsize>,
    max_running: usize,
}

impl BoundedClassifier {
    pub fn new(classifier: Arc<dyn ExternalClassifier>, timeout: Duration) -> Self {
        Self {
            classifier,
            timeout,
            running: Arc::new(AtomicUsize::new(0)),
            max_running: DEFAULT_MAX_RUNNING,
        }
    }

    pub fn with_max_running(mut self, max_running: usize) -> Self {
        self.max_running = max_running.max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Calls currently running, including ones that already timed out.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn classify(&self, request: ClassifierRequest) -> ClassifierOutcome {
        if self.running.fetch_add(1, Ordering::SeqCst) >= self.max_running {
            self.running.fetch_sub(1, Ordering::SeqCst);
            warn!(
                "External classifier busy ({} call(s) still running), skipping '{}'",
                self.max_running, request.source_name
            );
            return ClassifierOutcome::Failed(format!(
                "{} classifier call(s) still running",
                self.max_running
            ));
        }
        let slot = Slot(Arc::clone(&self.running));
        classify_with_timeout(Arc::clone(&self.classifier), request, self.timeout, slot)
    }
}

/// Run `classifier` on a worker thread and wait at most `timeout` for it.
fn classify_with_timeout(
    classifier: Arc<dyn ExternalClassifier>,
    request: ClassifierRequest,
    timeout: Duration,
    slot: Slot,
) -> ClassifierOutcome {
    let (tx, rx) = bounded(1);
    let source_name = request.source_name.clone();
    let spawned = thread::Builder::new()
        .name("waccy-classifier".to_string())
        .spawn(move || {
            let slot = slot;
            let result = classifier.classify(&request);
            drop(slot);
            let _ = tx.send(result);
        });
    if let Err(e) = spawned {
        return ClassifierOutcome::Failed(format!("could not start classifier: {e}"));
    }

    match rx.recv_timeout(timeout) {
        Ok(Ok(suggestion)) => ClassifierOutcome::Suggested(suggestion),
        Ok(Err(e)) => {
            warn!("External classifier failed for '{source_name}': {e:#}");
            ClassifierOutcome::Failed(e.to_string())
        }
        Err(RecvTimeoutError::Timeout) => {
            warn!(
                "External classifier timed out after {}ms for '{source_name}'",
                timeout.as_millis()
            );
            ClassifierOutcome::TimedOut
        }
        Err(RecvTimeoutError::Disconnected) => {
            warn!("External classifier for '{source_name}' exited without answering");
            ClassifierOutcome::Failed("classifier exited without answering".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str, f64);

    impl ExternalClassifier for Fixed {
        fn classify(&self, _request: &ClassifierRequest) -> anyhow::Result<ClassifierSuggestion> {
            Ok(ClassifierSuggestion {
                category_id: self.0.to_string(),
                confidence: self.1,
                explanation: "fixed".to_string(),
            })
        }
    }

    struct Broken;

    impl ExternalClassifier for Broken {
        fn classify(&self, _request: &ClassifierRequest) -> anyhow::Result<ClassifierSuggestion> {
            anyhow::bail!("service unavailable")
        }
    }

    struct Slow;

    impl ExternalClassifier for Slow {
        fn classify(&self, _request: &ClassifierRequest) -> anyhow::Result<ClassifierSuggestion> {
            thread::sleep(Duration::from_millis(500));
            Ok(ClassifierSuggestion {
                category_id: "expense.rent".to_string(),
                confidence: 1.0,
                explanation: String::new(),
            })
        }
    }

    struct Panics;

    impl ExternalClassifier for Panics {
        fn classify(&self, _request: &ClassifierRequest) -> anyhow::Result<ClassifierSuggestion> {
            panic!("classifier bug")
        }
    }

    fn request() -> ClassifierRequest {
        ClassifierRequest {
            source_name: "Office Rent".to_string(),
            source_system: None,
            features: PatternFeatures::default(),
            candidates: Vec::new(),
        }
    }

    #[test]
    fn test_suggestion_returned() {
        let outcome = BoundedClassifier::new(Arc::new(Fixed("expense.rent", 0.9)), Duration::from_secs(5)).classify(request());
        match outcome {
            ClassifierOutcome::Suggested(s) => assert_eq!(s.category_id, "expense.rent"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_error_is_failed() {
        let outcome = BoundedClassifier::new(Arc::new(Broken), Duration::from_secs(5)).classify(request());
        assert_eq!(outcome, ClassifierOutcome::Failed("service unavailable".to_string()));
    }

    #[test]
    fn test_timeout() {
        let outcome = BoundedClassifier::new(Arc::new(Slow), Duration::from_millis(20)).classify(request());
        assert_eq!(outcome, ClassifierOutcome::TimedOut);
    }

    #[test]
    fn test_panicking_classifier_is_failed() {
        let outcome = BoundedClassifier::new(Arc::new(Panics), Duration::from_secs(5)).classify(request());
        assert!(matches!(outcome, ClassifierOutcome::Failed(_)));
    }

    #[test]
    fn test_timed_out_calls_are_capped() {
        let bounded = BoundedClassifier::new(Arc::new(Slow), Duration::from_millis(20)).with_max_running(1);
        assert_eq!(bounded.classify(request()), ClassifierOutcome::TimedOut);
        assert_eq!(bounded.running(), 1);

        let outcome = bounded.classify(request());
        assert!(matches!(outcome, ClassifierOutcome::Failed(ref e) if e.contains("still running")));

        thread::sleep(Duration::from_millis(1000));
        assert_eq!(bounded.running(), 0);
        assert_eq!(bounded.classify(request()), ClassifierOutcome::TimedOut);
    }

    #[test]
    fn test_slot_released_after_panic() {
        let bounded = BoundedClassifier::new(Arc::new(Panics), Duration::from_secs(5)).with_max_running(1);
        assert!(matches!(bounded.classify(request()), ClassifierOutcome::Failed(_)));
        assert!(matches!(bounded.classify(request()), ClassifierOutcome::Failed(ref e) if !e.contains("still running")));
    }
}
