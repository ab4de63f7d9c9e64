//! Core pipeline for geonote.
//!
//! Ties the location resolver, the frontmatter merge, and document storage
//! together into the per-note pipeline, plus the service that drives it from
//! "document created" events.

pub mod pipeline;
pub mod resolver;
pub mod runner;
pub mod service;
pub mod store;

pub use pipeline::{
    FailureKind, LocationPipeline, PipelineError, ProgressReporter, RunOutcome, SilentProgress,
};
pub use resolver::{ResolutionError, Resolver};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, ProcessFailure, ProcessRunner};
pub use service::{EventSource, LocationService};
pub use store::{DocumentStore, FsStore};
