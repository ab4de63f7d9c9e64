//! Event subscription lifecycle around [`LocationPipeline`].
//!
//! [`LocationService::start`] subscribes to an [`EventSource`] and spawns one
//! independent pipeline run per `DocumentCreated` event. [`LocationService::stop`]
//! drops the subscription and waits for in-flight runs; runs are never
//! cancelled midway.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use geonote_shared::{DocumentCreated, GeonoteError, Result};

use crate::pipeline::{LocationPipeline, SilentProgress};

/// Host side of the "document created" subscription.
pub trait EventSource: Send + Sync {
    /// Register a subscription. Dropping the receiver deregisters it.
    fn subscribe(&self) -> Result<mpsc::Receiver<DocumentCreated>>;
}

struct Subscription {
    cancel: CancellationToken,
    dispatcher: JoinHandle<()>,
}

/// Runs the pipeline for every event delivered by a subscribed source.
pub struct LocationService {
    pipeline: Arc<LocationPipeline>,
    tracker: TaskTracker,
    subscription: Option<Subscription>,
}

impl LocationService {
    pub fn new(pipeline: LocationPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            tracker: TaskTracker::new(),
            subscription: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.subscription.is_some()
    }

    /// Subscribe to `source` and start dispatching events.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, source: &dyn EventSource) -> Result<()> {
        if self.is_running() {
            return Err(GeonoteError::validation("location service already started"));
        }

        let events = source.subscribe()?;
        let cancel = CancellationToken::new();
        self.tracker.reopen();

        let dispatcher = tokio::spawn(dispatch(
            events,
            Arc::clone(&self.pipeline),
            self.tracker.clone(),
            cancel.clone(),
        ));

        self.subscription = Some(Subscription { cancel, dispatcher });
        info!("location service started");
        Ok(())
    }

    /// Deregister the subscription and wait for in-flight runs to finish.
    ///
    /// Stopping a service that is not running is a no-op.
    pub async fn stop(&mut self) {
        let Some(subscription) = self.subscription.take() else {
            return;
        };

        subscription.cancel.cancel();
        if let Err(e) = subscription.dispatcher.await {
            debug!(error = %e, "dispatcher ended abnormally");
        }

        self.tracker.close();
        if !self.tracker.is_empty() {
            info!(in_flight = self.tracker.len(), "waiting for in-flight runs");
        }
        self.tracker.wait().await;
        info!("location service stopped");
    }
}

async fn dispatch(
    mut events: mpsc::Receiver<DocumentCreated>,
    pipeline: Arc<LocationPipeline>,
    tracker: TaskTracker,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("subscription cancelled");
                break;
            }

            event = events.recv() => {
                let Some(event) = event else {
                    debug!("event source closed");
                    break;
                };
                let pipeline = Arc::clone(&pipeline);
                tracker.spawn(async move {
                    pipeline.handle_created(event, &SilentProgress).await;
                });
            }
        }
    }
    // `events` drops here, which deregisters the subscription at the source.
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::resolver::tests::{ScriptedRunner, Step, fast_config};
    use crate::store::tests::MemoryStore;

    /// Source handing out a channel whose sender the test keeps.
    #[derive(Default)]
    struct ChannelSource {
        sender: Mutex<Option<mpsc::Sender<DocumentCreated>>>,
    }

    impl ChannelSource {
        fn sender(&self) -> mpsc::Sender<DocumentCreated> {
            self.sender.lock().unwrap().clone().expect("subscribed")
        }
    }

    impl EventSource for ChannelSource {
        fn subscribe(&self) -> Result<mpsc::Receiver<DocumentCreated>> {
            let (tx, rx) = mpsc::channel(16);
            *self.sender.lock().unwrap() = Some(tx);
            Ok(rx)
        }
    }

    fn service(runner: Arc<ScriptedRunner>, store: Arc<MemoryStore>) -> LocationService {
        LocationService::new(LocationPipeline::new(
            runner,
            store,
            fast_config(),
            vec!["md".into()],
        ))
    }

    #[tokio::test]
    async fn processes_events_until_stopped() {
        let store = Arc::new(MemoryStore::with("/v/a.md", "A"));
        store
            .docs
            .lock()
            .unwrap()
            .insert("/v/b.md".into(), "B".into());
        let runner = ScriptedRunner::new([Step::Ok("1,1"), Step::Ok("1,1")]);
        let mut service = service(runner.clone(), store.clone());
        let source = ChannelSource::default();

        service.start(&source).unwrap();
        assert!(service.is_running());

        let tx = source.sender();
        tx.send(DocumentCreated::new("/v/a.md")).await.unwrap();
        tx.send(DocumentCreated::new("/v/b.md")).await.unwrap();

        // Wait until both events have been picked up by the dispatcher.
        for _ in 0..200 {
            if runner.calls() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        service.stop().await;
        assert!(!service.is_running());

        assert_eq!(store.get("/v/a.md").unwrap(), "---\nlocation: \"1,1\"\n---\nA");
        assert_eq!(store.get("/v/b.md").unwrap(), "---\nlocation: \"1,1\"\n---\nB");
    }

    #[tokio::test]
    async fn stop_deregisters_subscription() {
        let store = Arc::new(MemoryStore::default());
        let mut service = service(ScriptedRunner::new([]), store);
        let source = ChannelSource::default();

        service.start(&source).unwrap();
        let tx = source.sender();
        service.stop().await;

        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn failing_document_does_not_stop_others() {
        let store = Arc::new(MemoryStore::with("/v/ok.md", "ok"));
        let runner = ScriptedRunner::new([Step::Ok("2,2")]);
        let mut service = service(runner.clone(), store.clone());
        let source = ChannelSource::default();

        service.start(&source).unwrap();
        let tx = source.sender();
        // Missing from the store: resolution succeeds, the read fails.
        tx.send(DocumentCreated::new("/v/missing.md")).await.unwrap();
        tx.send(DocumentCreated::new("/v/ok.md")).await.unwrap();

        for _ in 0..200 {
            if runner.calls() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        service.stop().await;

        assert!(store.get("/v/ok.md").unwrap().starts_with("---\nlocation: "));
        assert!(store.get("/v/missing.md").is_none());
    }

    #[tokio::test]
    async fn cannot_start_twice_and_can_restart() {
        let store = Arc::new(MemoryStore::default());
        let mut service = service(ScriptedRunner::new([]), store);
        let source = ChannelSource::default();

        service.start(&source).unwrap();
        assert!(service.start(&source).is_err());

        service.stop().await;
        service.stop().await;

        service.start(&source).unwrap();
        assert!(service.is_running());
        service.stop().await;
    }
}
