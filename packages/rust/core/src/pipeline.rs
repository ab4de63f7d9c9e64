//! Per-document pipeline: eligibility → resolve → read → merge → write back.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, instrument};

use geonote_frontmatter::{LOCATION_KEY, read_field};
use geonote_shared::{Document, DocumentCreated, GeonoteError, ResolverConfig, RunId};

use crate::resolver::{ResolutionError, Resolver};
use crate::runner::CommandRunner;
use crate::store::DocumentStore;

/// Failure of a single pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("storage failure: {0}")]
    Storage(#[source] GeonoteError),
}

/// Coarse failure class reported in [`RunOutcome::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// All attempts failed at the process level.
    ProcessExhausted,
    /// The command reported an error on stderr.
    ErrorOutput,
    /// Reading or writing the document failed.
    Storage,
}

impl From<&PipelineError> for FailureKind {
    fn from(err: &PipelineError) -> Self {
        match err {
            PipelineError::Resolution(ResolutionError::Exhausted { .. }) => Self::ProcessExhausted,
            PipelineError::Resolution(ResolutionError::ErrorOutput { .. }) => Self::ErrorOutput,
            PipelineError::Storage(_) => Self::Storage,
        }
    }
}

/// What happened to one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The location was written into the document.
    Tagged {
        path: PathBuf,
        location: String,
        /// Location value the header held before, if any.
        previous: Option<String>,
    },
    /// The document is not a note.
    Skipped { path: PathBuf },
    /// The run failed; the document was not modified.
    Failed {
        path: PathBuf,
        kind: FailureKind,
        error: String,
    },
}

impl RunOutcome {
    pub fn is_tagged(&self) -> bool {
        matches!(self, Self::Tagged { .. })
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before each invocation of the location command.
    fn attempt(&self, attempt: u32, max_attempts: u32);
    /// Called before waiting out the delay ahead of a retry.
    fn retrying(&self, remaining: u32, delay: Duration);
    /// Called when a run completes.
    fn done(&self, outcome: &RunOutcome);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn attempt(&self, _attempt: u32, _max_attempts: u32) {}
    fn retrying(&self, _remaining: u32, _delay: Duration) {}
    fn done(&self, _outcome: &RunOutcome) {}
}

/// Tags newly created notes with the current location.
#[derive(Clone)]
pub struct LocationPipeline {
    resolver: Resolver,
    store: Arc<dyn DocumentStore>,
    extensions: Vec<String>,
}

impl LocationPipeline {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        store: Arc<dyn DocumentStore>,
        resolver: ResolverConfig,
        extensions: Vec<String>,
    ) -> Self {
        Self {
            resolver: Resolver::new(runner, resolver),
            store,
            extensions,
        }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Entry point for host events. Never fails: errors are logged and
    /// returned as [`RunOutcome::Failed`].
    pub async fn handle_created(
        &self,
        event: DocumentCreated,
        progress: &dyn ProgressReporter,
    ) -> RunOutcome {
        let queued_ms = (Utc::now() - event.observed_at).num_milliseconds();
        debug!(path = %event.document, queued_ms, "document created");

        let outcome = match self.process(&event.document, progress).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(path = %event.document, error = %err, "failed to tag note with location");
                RunOutcome::Failed {
                    path: event.document.path.clone(),
                    kind: FailureKind::from(&err),
                    error: err.to_string(),
                }
            }
        };

        progress.done(&outcome);
        outcome
    }

    /// Run the pipeline for one document.
    ///
    /// The location is resolved before the document is read, so a failed
    /// lookup never touches storage.
    #[instrument(skip_all, fields(path = %document, run_id = %RunId::new()))]
    pub async fn process(
        &self,
        document: &Document,
        progress: &dyn ProgressReporter,
    ) -> Result<RunOutcome, PipelineError> {
        if !document.is_eligible(&self.extensions) {
            debug!("not a note, skipping");
            return Ok(RunOutcome::Skipped {
                path: document.path.clone(),
            });
        }

        progress.phase("Resolving location");
        let location = self.resolver.resolve(progress).await?;

        progress.phase("Reading note");
        let content = self
            .store
            .read(document)
            .await
            .map_err(PipelineError::Storage)?;

        let previous = read_field(&content, LOCATION_KEY).map(str::to_string);
        let updated = geonote_frontmatter::merge(&content, location.as_str());

        progress.phase("Writing note");
        self.store
            .write(document, &updated)
            .await
            .map_err(PipelineError::Storage)?;

        info!(%location, replaced = previous.is_some(), "note tagged with location");

        Ok(RunOutcome::Tagged {
            path: document.path.clone(),
            location: location.into_inner(),
            previous,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::resolver::tests::{ScriptedRunner, Step, fast_config};
    use crate::store::tests::MemoryStore;

    fn pipeline(runner: Arc<ScriptedRunner>, store: Arc<MemoryStore>) -> LocationPipeline {
        LocationPipeline::new(runner, store, fast_config(), vec!["md".into()])
    }

    #[tokio::test]
    async fn tags_new_note() {
        let store = Arc::new(MemoryStore::with("/vault/a.md", "# Title\nBody text"));
        let runner = ScriptedRunner::new([Step::Ok("40.0,-74.0\n")]);
        let pipeline = pipeline(runner, store.clone());

        let outcome = pipeline
            .handle_created(DocumentCreated::new("/vault/a.md"), &SilentProgress)
            .await;

        assert_eq!(
            outcome,
            RunOutcome::Tagged {
                path: "/vault/a.md".into(),
                location: "40.0,-74.0".into(),
                previous: None,
            }
        );
        assert_eq!(
            store.get("/vault/a.md").unwrap(),
            "---\nlocation: \"40.0,-74.0\"\n---\n# Title\nBody text"
        );
    }

    #[tokio::test]
    async fn reports_previous_location() {
        let store = Arc::new(MemoryStore::with(
            "/vault/a.md",
            "---\nlocation: \"0,0\"\n---\nBody",
        ));
        let runner = ScriptedRunner::new([Step::Ok("9,9")]);
        let pipeline = pipeline(runner, store.clone());

        let outcome = pipeline
            .handle_created(DocumentCreated::new("/vault/a.md"), &SilentProgress)
            .await;

        match outcome {
            RunOutcome::Tagged { previous, .. } => assert_eq!(previous.as_deref(), Some("0,0")),
            other => panic!("expected Tagged, got {other:?}"),
        }
        assert_eq!(
            store.get("/vault/a.md").unwrap(),
            "---\nlocation: \"9,9\"\n---\nBody"
        );
    }

    #[tokio::test]
    async fn skips_non_notes_without_running_command() {
        let store = Arc::new(MemoryStore::with("/vault/pic.png", "binary"));
        let runner = ScriptedRunner::new([]);
        let pipeline = pipeline(runner.clone(), store.clone());

        let outcome = pipeline
            .handle_created(DocumentCreated::new("/vault/pic.png"), &SilentProgress)
            .await;

        assert!(matches!(outcome, RunOutcome::Skipped { .. }));
        assert_eq!(runner.calls(), 0);
        assert_eq!(store.get("/vault/pic.png").unwrap(), "binary");
    }

    #[tokio::test]
    async fn error_output_leaves_note_untouched() {
        let store = Arc::new(MemoryStore::with("/vault/a.md", "Body"));
        let runner = ScriptedRunner::new([Step::Stderr("not authorized")]);
        let pipeline = pipeline(runner.clone(), store.clone());

        let outcome = pipeline
            .handle_created(DocumentCreated::new("/vault/a.md"), &SilentProgress)
            .await;

        match outcome {
            RunOutcome::Failed { kind, error, .. } => {
                assert_eq!(kind, FailureKind::ErrorOutput);
                assert!(error.contains("not authorized"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        assert_eq!(runner.calls(), 1);
        assert_eq!(store.get("/vault/a.md").unwrap(), "Body");
    }

    #[tokio::test]
    async fn exhausted_retries_leave_note_untouched() {
        let store = Arc::new(MemoryStore::with("/vault/a.md", "Body"));
        let runner = ScriptedRunner::failing(3, "unused");
        let pipeline = pipeline(runner.clone(), store.clone());

        let outcome = pipeline
            .handle_created(DocumentCreated::new("/vault/a.md"), &SilentProgress)
            .await;

        assert!(matches!(
            outcome,
            RunOutcome::Failed {
                kind: FailureKind::ProcessExhausted,
                ..
            }
        ));
        assert_eq!(runner.calls(), 3);
        assert_eq!(store.get("/vault/a.md").unwrap(), "Body");
    }

    #[tokio::test]
    async fn write_failure_is_reported_not_raised() {
        let store = Arc::new(MemoryStore {
            fail_writes: true,
            ..MemoryStore::with("/vault/a.md", "Body")
        });
        let runner = ScriptedRunner::new([Step::Ok("1,2")]);
        let pipeline = pipeline(runner, store.clone());

        let outcome = pipeline
            .handle_created(DocumentCreated::new("/vault/a.md"), &SilentProgress)
            .await;

        assert!(matches!(
            outcome,
            RunOutcome::Failed {
                kind: FailureKind::Storage,
                ..
            }
        ));
        assert_eq!(store.get("/vault/a.md").unwrap(), "Body");
    }

    #[tokio::test]
    async fn missing_document_is_a_storage_failure() {
        let store = Arc::new(MemoryStore::default());
        let runner = ScriptedRunner::new([Step::Ok("1,2")]);
        let pipeline = pipeline(runner, store);

        let err = pipeline
            .process(&Document::new("/vault/gone.md"), &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Storage(_)));
    }

    #[derive(Default)]
    struct RecordingProgress {
        events: Mutex<Vec<String>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn phase(&self, name: &str) {
            self.events.lock().unwrap().push(format!("phase:{name}"));
        }
        fn attempt(&self, attempt: u32, max_attempts: u32) {
            self.events
                .lock()
                .unwrap()
                .push(format!("attempt:{attempt}/{max_attempts}"));
        }
        fn retrying(&self, remaining: u32, _delay: Duration) {
            self.events.lock().unwrap().push(format!("retry:{remaining}"));
        }
        fn done(&self, outcome: &RunOutcome) {
            self.events
                .lock()
                .unwrap()
                .push(format!("done:{}", outcome.is_tagged()));
        }
    }

    #[tokio::test]
    async fn progress_sees_attempts_and_retries() {
        let store = Arc::new(MemoryStore::with("/vault/a.md", "Body"));
        let runner = ScriptedRunner::failing(1, "1,2");
        let pipeline = pipeline(runner, store);
        let progress = RecordingProgress::default();

        pipeline
            .handle_created(DocumentCreated::new("/vault/a.md"), &progress)
            .await;

        let events = progress.events.into_inner().unwrap();
        assert_eq!(
            events,
            [
                "phase:Resolving location",
                "attempt:1/3",
                "retry:2",
                "attempt:2/3",
                "phase:Reading note",
                "phase:Writing note",
                "done:true",
            ]
        );
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let outcome = RunOutcome::Failed {
            path: "/vault/a.md".into(),
            kind: FailureKind::ErrorOutput,
            error: "denied".into(),
        };
        let value = serde_json::to_value(&outcome).expect("serialize");
        assert_eq!(value["status"], "failed");
        assert_eq!(value["kind"], "error_output");
        assert_eq!(value["path"], "/vault/a.md");
    }
}
