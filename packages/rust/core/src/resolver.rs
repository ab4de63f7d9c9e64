//! Location resolver: runs the lookup command with bounded, fixed-delay retry.
//!
//! Two failure classes are kept apart:
//! - a process-level failure (spawn, timeout, non-zero exit) is retried until
//!   the attempts run out;
//! - a successful run that wrote anything to stderr is reported at once and
//!   never retried.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use geonote_shared::{LocationRecord, ResolverConfig};

use crate::pipeline::ProgressReporter;
use crate::runner::{CommandRunner, CommandSpec, ProcessFailure};

/// Why a location could not be resolved.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    /// Every attempt failed at the process level.
    #[error("location lookup failed after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: ProcessFailure,
    },

    /// The command ran but reported an error on stderr.
    #[error("location command reported an error: {message}")]
    ErrorOutput { message: String },
}

impl ResolutionError {
    /// Whether the failure came from the retry loop running out.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// Attempt bookkeeping for one resolution.
#[derive(Debug)]
struct RetryState {
    attempts_remaining: u32,
}

impl RetryState {
    fn new(max_attempts: u32) -> Self {
        Self {
            attempts_remaining: max_attempts,
        }
    }

    /// Record a failed attempt. Returns `true` while attempts remain.
    fn record_failure(&mut self) -> bool {
        self.attempts_remaining = self.attempts_remaining.saturating_sub(1);
        self.attempts_remaining > 0
    }
}

/// Resolves the current location through an external command.
#[derive(Clone)]
pub struct Resolver {
    runner: Arc<dyn CommandRunner>,
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(runner: Arc<dyn CommandRunner>, config: ResolverConfig) -> Self {
        Self { runner, config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Run the lookup command until it succeeds, reports an error, or the
    /// attempts are exhausted.
    ///
    /// The delay between attempts is fixed. At least one attempt is always made.
    #[instrument(skip_all, fields(program = %self.config.program))]
    pub async fn resolve(
        &self,
        progress: &dyn ProgressReporter,
    ) -> Result<LocationRecord, ResolutionError> {
        let max_attempts = self.config.max_attempts.max(1);
        let spec = CommandSpec::from(&self.config);
        let mut state = RetryState::new(max_attempts);

        loop {
            let attempt = max_attempts - state.attempts_remaining + 1;
            info!(attempt, max_attempts, "running location command");
            progress.attempt(attempt, max_attempts);

            let failure = match self.runner.run(&spec).await {
                Ok(output) if !output.stderr.is_empty() => {
                    warn!(attempt, stderr = %output.stderr.trim(), "location command reported an error");
                    return Err(ResolutionError::ErrorOutput {
                        message: output.stderr.trim().to_string(),
                    });
                }
                Ok(output) => {
                    let location = LocationRecord::from_output(&output.stdout);
                    info!(attempt, %location, "location resolved");
                    return Ok(location);
                }
                Err(failure) => failure,
            };

            warn!(attempt, error = %failure, "location command failed");

            if !state.record_failure() {
                return Err(ResolutionError::Exhausted {
                    attempts: max_attempts,
                    source: failure,
                });
            }

            let remaining = state.attempts_remaining;
            info!(
                remaining,
                delay_ms = self.config.retry_delay.as_millis() as u64,
                "retrying location lookup"
            );
            progress.retrying(remaining, self.config.retry_delay);
            tokio::time::sleep(self.config.retry_delay).await;
        }
    }
}
