//! Filesystem source of "document created" events.
//!
//! notify's callback runs on its own thread and forwards raw events into a
//! channel with `blocking_send`. An async task collects created files,
//! waits until each has been quiet for the settle period, and then emits a
//! [`DocumentCreated`] for it.
//!
//! The task lives as long as the subscriber's receiver: once it is dropped
//! the task exits and the notify watcher goes with it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use geonote_core::EventSource;
use geonote_shared::{DocumentCreated, GeonoteError, Result, WatchConfig};

const RAW_EVENT_BUFFER: usize = 256;
const OUTPUT_BUFFER: usize = 64;
const MIN_TICK: Duration = Duration::from_millis(10);

/// Watches note directories for newly created files.
#[derive(Debug, Clone)]
pub struct NoteWatcher {
    config: WatchConfig,
}

impl NoteWatcher {
    pub fn new(config: WatchConfig) -> Self {
        Self { config }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.config.roots
    }
}

impl EventSource for NoteWatcher {
    fn subscribe(&self) -> Result<mpsc::Receiver<DocumentCreated>> {
        if self.config.roots.is_empty() {
            return Err(GeonoteError::validation("no directories to watch"));
        }

        let (event_tx, event_rx) = mpsc::channel::<notify::Result<Event>>(RAW_EVENT_BUFFER);
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                // Runs on notify's thread. A closed channel means we are shutting down.
                let _ = event_tx.blocking_send(res);
            },
            Config::default(),
        )
        .map_err(|e| GeonoteError::Watch(format!("failed to initialize watcher: {e}")))?;

        let mode = if self.config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        for root in &self.config.roots {
            watcher.watch(root, mode).map_err(|e| {
                GeonoteError::Watch(format!("failed to watch {}: {e}", root.display()))
            })?;
            info!(root = %root.display(), recursive = self.config.recursive, "watching for new notes");
        }

        let (out_tx, out_rx) = mpsc::channel(OUTPUT_BUFFER);
        tokio::spawn(run(watcher, event_rx, out_tx, self.config.settle));
        Ok(out_rx)
    }
}

async fn run(
    _watcher: RecommendedWatcher,
    mut events: mpsc::Receiver<notify::Result<Event>>,
    out: mpsc::Sender<DocumentCreated>,
    settle: Duration,
) {
    let mut pending = PendingCreates::new(settle);
    let mut tick = tokio::time::interval((settle / 2).max(MIN_TICK));

    loop {
        tokio::select! {
            biased;

            _ = out.closed() => {
                debug!(pending = pending.len(), "subscriber gone, stopping watcher");
                break;
            }

            event = events.recv() => match event {
                Some(Ok(event)) => pending.record(&event),
                Some(Err(e)) => warn!(error = %e, "watcher error"),
                None => {
                    debug!("notify channel closed");
                    break;
                }
            },

            _ = tick.tick() => {
                for created in pending.take_settled(Instant::now()) {
                    debug!(path = %created.document, "new note settled");
                    if out.send(created).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// A created file that has not been quiet long enough yet.
#[derive(Debug, Clone, Copy)]
struct Pending {
    /// When the create was first seen; becomes the event's `observed_at`.
    first_seen: DateTime<Utc>,
    last_event: Instant,
}

/// Created files waiting out the settle period, keyed by path.
#[derive(Debug)]
struct PendingCreates {
    settle: Duration,
    pending: HashMap<PathBuf, Pending>,
}

impl PendingCreates {
    fn new(settle: Duration) -> Self {
        Self {
            settle,
            pending: HashMap::new(),
        }
    }

    fn record(&mut self, event: &Event) {
        match event.kind {
            EventKind::Create(CreateKind::Folder) => {}
            EventKind::Create(_) => {
                for path in &event.paths {
                    self.created(path);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                // Only a file still waiting to settle follows its new name.
                // Renaming an existing note is not a creation.
                if let [from, to, ..] = event.paths.as_slice() {
                    if let Some(entry) = self.pending.remove(from) {
                        trace!(from = %from.display(), to = %to.display(), "pending note renamed");
                        self.pending.insert(
                            to.clone(),
                            Pending {
                                last_event: Instant::now(),
                                ..entry
                            },
                        );
                    }
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) | EventKind::Remove(_) => {
                for path in &event.paths {
                    if self.pending.remove(path).is_some() {
                        trace!(path = %path.display(), "pending note went away");
                    }
                }
            }
            EventKind::Modify(_) => {
                // Still being written; restart its quiet period.
                for path in &event.paths {
                    if let Some(entry) = self.pending.get_mut(path) {
                        entry.last_event = Instant::now();
                    }
                }
            }
            _ => {}
        }
    }

    fn created(&mut self, path: &Path) {
        if path.is_dir() {
            trace!(path = %path.display(), "skipping directory");
            return;
        }
        trace!(path = %path.display(), "file created");
        let now = Instant::now();
        self.pending
            .entry(path.to_path_buf())
            .and_modify(|entry| entry.last_event = now)
            .or_insert(Pending {
                first_seen: Utc::now(),
                last_event: now,
            });
    }

    /// Remove every path quiet for at least the settle period and turn it
    /// into an event, ordered by path.
    fn take_settled(&mut self, now: Instant) -> Vec<DocumentCreated> {
        let settle = self.settle;
        let mut settled: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_event) >= settle)
            .map(|(path, _)| path.clone())
            .collect();
        settled.sort();

        settled
            .into_iter()
            .filter_map(|path| {
                let entry = self.pending.remove(&path)?;
                Some(DocumentCreated::seen_at(path, entry.first_seen))
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.pending.len()
    }
}
