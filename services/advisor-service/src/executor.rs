use serde_json::{json, Value};
use std::{any::Any, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};

use crate::backend::{AgentBackend, ErrorClass};
use crate::config::ExecutorConfig;
use crate::gate::ConcurrencyGate;
use crate::session::SessionFactory;

/// One row of arguments as sent by the caller.
pub type WorkItem = Vec<Value>;

/// Result of a single row.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    Success(String),
    PermanentFailure(String),
    TransientFailure(String),
}

#[derive(Debug, Error)]
pub enum BatchError {
    /// A row hit a quota limit; the caller should resend the whole batch.
    #[error("quota exceeded, retry the batch: {0}")]
    Retryable(String),

    /// The orchestration itself broke. Not a reason to retry.
    #[error("internal batch error: {0}")]
    Internal(String),
}

impl Outcome {
    /// Text placed in the caller's reply slot.
    fn into_reply(self) -> String {
        match self {
            Outcome::Success(payload) => payload,
            Outcome::PermanentFailure(message) | Outcome::TransientFailure(message) => {
                error_payload(&message)
            }
        }
    }
}

pub fn error_payload(message: &str) -> String {
    json!({ "error": message }).to_string()
}

pub struct BatchExecutor {
    gate: ConcurrencyGate,
    sessions: SessionFactory,
    backend: Arc<dyn AgentBackend>,
    chunk_size: usize,
    item_timeout: Option<Duration>,
}

/// Everything a row task needs, cloned per row so the task is `'static`.
#[derive(Clone)]
struct RowRunner {
    gate: ConcurrencyGate,
    sessions: SessionFactory,
    backend: Arc<dyn AgentBackend>,
    item_timeout: Option<Duration>,
}

/// Aborts whatever is still running when a wave is abandoned, e.g. because
/// the HTTP request was dropped. Aborting a finished task is a no-op.
struct Wave(Vec<JoinHandle<Outcome>>);

impl Drop for Wave {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

impl BatchExecutor {
    pub fn new(
        config: &ExecutorConfig,
        sessions: SessionFactory,
        backend: Arc<dyn AgentBackend>,
    ) -> Self {
        Self {
            gate: ConcurrencyGate::new(config.max_concurrent_rows),
            sessions,
            backend,
            chunk_size: config.chunk_size.max(1),
            item_timeout: config.item_timeout,
        }
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn sessions(&self) -> &SessionFactory {
        &self.sessions
    }

    /// Runs every row and returns one reply per row, in input order.
    ///
    /// Rows are scheduled `chunk_size` at a time; each row additionally
    /// waits on the shared gate before it reaches the backend. A quota error
    /// anywhere in a wave aborts the batch with [`BatchError::Retryable`] and
    /// later waves are never started.
    pub async fn execute(&self, calls: Vec<WorkItem>) -> Result<Vec<String>, BatchError> {
        let total = calls.len();
        let waves = total.div_ceil(self.chunk_size);
        tracing::info!(
            rows = total,
            waves = waves,
            chunk_size = self.chunk_size,
            gate_limit = self.gate.limit(),
            "batch started"
        );

        let mut replies = Vec::with_capacity(total);
        let mut rows = calls.into_iter();
        for wave in 0..waves {
            let chunk: Vec<WorkItem> = rows.by_ref().take(self.chunk_size).collect();
            let outcomes = self.run_wave(chunk).await?;

            if let Some(Outcome::TransientFailure(message)) = outcomes
                .iter()
                .find(|outcome| matches!(outcome, Outcome::TransientFailure(_)))
            {
                tracing::warn!(
                    wave = wave,
                    error = message.as_str(),
                    "quota exceeded, signalling batch retry"
                );
                return Err(BatchError::Retryable(message.clone()));
            }

            replies.extend(outcomes.into_iter().map(Outcome::into_reply));
            tracing::debug!(wave = wave, completed = replies.len(), "wave finished");
        }

        tracing::info!(rows = total, "batch finished");
        Ok(replies)
    }

    async fn run_wave(&self, chunk: Vec<WorkItem>) -> Result<Vec<Outcome>, BatchError> {
        let runner = RowRunner {
            gate: self.gate.clone(),
            sessions: self.sessions.clone(),
            backend: self.backend.clone(),
            item_timeout: self.item_timeout,
        };

        let wave = Wave(
            chunk
                .into_iter()
                .map(|row| tokio::spawn(runner.clone().process(row)))
                .collect(),
        );
        gather(wave).await
    }
}

/// Awaits a wave in input order, which keeps replies aligned; the tasks
/// themselves run concurrently and finish in any order.
async fn gather(mut wave: Wave) -> Result<Vec<Outcome>, BatchError> {
    let mut outcomes = Vec::with_capacity(wave.0.len());
    for handle in wave.0.iter_mut() {
        match handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) if err.is_panic() => {
                let message = format!("Internal Task Error: {}", panic_message(err));
                tracing::error!(error = message.as_str(), "row task panicked");
                outcomes.push(Outcome::PermanentFailure(message));
            }
            Err(err) => {
                tracing::error!(error = %err, "row task cancelled");
                return Err(BatchError::Internal(format!("row task cancelled: {err}")));
            }
        }
    }
    Ok(outcomes)
}

impl RowRunner {
    async fn process(self, row: WorkItem) -> Outcome {
        // Held until this function returns or the task is dropped.
        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(_) => return Outcome::PermanentFailure("concurrency gate closed".to_string()),
        };

        let mut session = self.sessions.create();
        let prompt = format!("Analyze Customer Record: {}", Value::Array(row));

        let run = self.backend.run(&mut session, &prompt);
        let finished = match self.item_timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.map_err(|_| limit),
            None => Ok(run.await),
        };
        let result = match finished {
            Ok(result) => result,
            Err(limit) => {
                let message = format!("row timed out after {}ms", limit.as_millis());
                tracing::error!(
                    session_id = session.session_id.as_str(),
                    error = message.as_str(),
                    "permanent error processing row"
                );
                return Outcome::PermanentFailure(message);
            }
        };

        match result {
            Ok(()) => Outcome::Success(self.backend.report(&session).to_string()),
            Err(err) => match err.classify() {
                ErrorClass::Transient => Outcome::TransientFailure(err.to_string()),
                ErrorClass::Permanent => {
                    tracing::error!(
                        app = session.app_name.as_str(),
                        user_id = session.user_id.as_str(),
                        session_id = session.session_id.as_str(),
                        error = %err,
                        "permanent error processing row"
                    );
                    Outcome::PermanentFailure(err.to_string())
                }
            },
        }
    }
}

fn panic_message(err: JoinError) -> String {
    let payload: Box<dyn Any + Send> = err.into_panic();
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "task panicked".to_string()
    }
}
