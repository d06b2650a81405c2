//! Runs one task to a terminal status: rounds of primary + fallback attempts
//! with backoff between rounds, all inside the task's timeout budget.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::backend::{
    BackendOutput, BackendRegistry, BackendRequest, BackendRole, ChainLink, DependencyOutput,
};
use crate::error::{BackendError, ErrorCode, StoreError};
use crate::events::{EventEmitter, EventKind, TaskEventTap};
use crate::state::{
    AttemptOutcome, BackendUsed, ExecutionAttempt, RunStoreHandle, TaskStatus, TaskUpdate,
};
use crate::stdio::{FileLoader, StdioTask};

use super::traits::RetryStrategyPlugin;
use super::types::TaskResult;

/// How one backend call ended.
enum LinkOutcome {
    Success(BackendOutput),
    Failure(BackendError),
    Timeout,
    Cancelled,
}

impl LinkOutcome {
    fn attempt_outcome(&self) -> AttemptOutcome {
        match self {
            Self::Success(_) => AttemptOutcome::Success,
            Self::Failure(_) => AttemptOutcome::Failure,
            Self::Timeout => AttemptOutcome::Timeout,
            Self::Cancelled => AttemptOutcome::Cancelled,
        }
    }
}

/// Executes single tasks against their fallback chain.
///
/// Shared by every task of a run; holds no per-task state.
#[derive(Clone)]
pub struct AttemptRunner {
    pub(crate) run_id: String,
    pub(crate) registry: Arc<BackendRegistry>,
    pub(crate) store: RunStoreHandle,
    pub(crate) emitter: EventEmitter,
    pub(crate) file_loader: Arc<FileLoader>,
    pub(crate) retry_strategy: Option<Arc<dyn RetryStrategyPlugin>>,
    pub(crate) run_cancel: CancellationToken,
    pub(crate) default_timeout_secs: u64,
    pub(crate) cancel_grace: Duration,
    pub(crate) fallback_enabled: bool,
}

impl AttemptRunner {
    /// Drives `task` from `ready` to a terminal status and returns its result.
    ///
    /// The task must already be `ready` in the store.
    pub async fn execute(&self, task: &StdioTask, dependencies: Vec<DependencyOutput>) -> TaskResult {
        let started = Instant::now();
        let task_id = task.id.as_str();

        if self.run_cancel.is_cancelled() {
            return self.cancel_before_start(task_id).await;
        }

        self.update(task_id, TaskUpdate::status(TaskStatus::Running)).await;

        let resolved = match self
            .file_loader
            .resolve(&task.files, task.files_mode, task.files_encoding, &task.workdir)
            .await
        {
            Ok(resolved) => resolved,
            Err(err) => {
                let message = err.to_string();
                let code = err.error_code();
                tracing::warn!(task_id, error = %message, "task context could not be resolved");
                self.emitter
                    .task_event(
                        task_id,
                        EventKind::Error {
                            message: message.clone(),
                            code,
                        },
                    )
                    .await;
                return self
                    .finish(
                        task_id,
                        started,
                        Finished {
                            status: TaskStatus::Failed,
                            attempts: 0,
                            retries: 0,
                            output: None,
                            error: Some((message, code)),
                            end_emitted: false,
                        },
                    )
                    .await;
            }
        };

        for warning in &resolved.warnings {
            self.emitter
                .task_event(
                    task_id,
                    EventKind::Warning {
                        message: warning.to_string(),
                        code: Some(warning.error_code()),
                    },
                )
                .await;
        }

        let chain = self.registry.chain_for(&task.backend, self.fallback_enabled);
        let links: Vec<&ChainLink> = chain.links().collect();
        let rounds = task.rounds();
        let budget = Duration::from_secs(task.timeout_secs(self.default_timeout_secs));
        let deadline = started + budget;

        tracing::debug!(
            task_id,
            backend = %task.backend,
            links = links.len(),
            rounds,
            budget_secs = budget.as_secs(),
            "executing task"
        );

        let workdir = PathBuf::from(&task.workdir);
        let mut last_status = TaskStatus::Failed;
        let mut last_error: Option<(String, ErrorCode)> = None;
        let mut attempt_number = 0u32;
        let mut last_round = 0u32;
        let mut end_emitted = false;
        let mut pending_delay = Duration::ZERO;

        'rounds: for round in 0..rounds {
            if round > 0 && !self.backoff(task_id, round, pending_delay).await {
                last_status = TaskStatus::Cancelled;
                last_error = Some(("run cancelled".to_string(), ErrorCode::Cancelled));
                end_emitted = false;
                break;
            }
            last_round = round;

            for (index, link) in links.iter().enumerate() {
                attempt_number += 1;
                let attempt_started = Instant::now();
                let started_at = Utc::now();

                self.emitter
                    .task_event(
                        task_id,
                        EventKind::TaskStart {
                            backend: link.name.clone(),
                            attempt: attempt_number,
                            fallback: link.role == BackendRole::Fallback,
                        },
                    )
                    .await;

                let tap = TaskEventTap::new(self.emitter.clone(), task_id);
                let request = BackendRequest {
                    run_id: self.run_id.clone(),
                    task_id: task_id.to_string(),
                    content: task.content.clone(),
                    files: resolved.files.clone(),
                    dependency_outputs: dependencies.clone(),
                    model: task.model.clone(),
                    model_provider: task.model_provider.clone(),
                    workdir: workdir.clone(),
                    attempt: attempt_number,
                    cancel: self.run_cancel.child_token(),
                    events: tap.clone(),
                };

                let remaining = deadline.saturating_duration_since(Instant::now());
                let outcome = self.run_link(link, &request, remaining).await;
                tap.close().await;
                let duration_ms = attempt_started.elapsed().as_millis() as u64;

                let attempt = ExecutionAttempt {
                    task_id: task_id.to_string(),
                    attempt_number,
                    round,
                    backend_used: BackendUsed {
                        role: link.role,
                        name: link.name.clone(),
                    },
                    outcome: outcome.attempt_outcome(),
                    duration_ms,
                    output: None,
                    actions: Vec::new(),
                    error: None,
                    error_code: None,
                    started_at,
                };

                let (status, message, code) = match outcome {
                    LinkOutcome::Success(output) => {
                        return self
                            .succeed(task_id, started, &tap, attempt, output)
                            .await;
                    }
                    LinkOutcome::Timeout => (
                        TaskStatus::TimedOut,
                        format!(
                            "task exceeded its {}s budget on backend '{}'",
                            budget.as_secs(),
                            link.name
                        ),
                        ErrorCode::Timeout,
                    ),
                    LinkOutcome::Cancelled => (
                        TaskStatus::Cancelled,
                        "run cancelled".to_string(),
                        ErrorCode::Cancelled,
                    ),
                    LinkOutcome::Failure(err) => {
                        (TaskStatus::Failed, err.to_string(), err.error_code())
                    }
                };

                tracing::debug!(
                    task_id,
                    backend = %link.name,
                    attempt = attempt_number,
                    error = %message,
                    "attempt failed"
                );

                // Timeouts and cancellation end the task outright.
                let next = match status {
                    TaskStatus::Failed => self.next_attempt(
                        round,
                        rounds,
                        index + 1 < links.len(),
                        code,
                        &message,
                        deadline,
                    ),
                    _ => None,
                };
                let is_final = next.is_none();

                self.emitter
                    .task_event(
                        task_id,
                        EventKind::Error {
                            message: message.clone(),
                            code,
                        },
                    )
                    .await;
                self.emit_task_end(
                    task_id,
                    status,
                    duration_ms,
                    round,
                    attempt_number,
                    is_final,
                    Some(message.clone()),
                )
                .await;
                self.record_attempt(ExecutionAttempt {
                    error: Some(message.clone()),
                    error_code: Some(code.as_u16()),
                    ..attempt
                })
                .await;

                last_status = status;
                last_error = Some((message, code));
                end_emitted = true;
                match next {
                    None => break 'rounds,
                    Some(delay) => pending_delay = delay,
                }
            }
        }

        self.finish(
            task_id,
            started,
            Finished {
                status: last_status,
                attempts: attempt_number,
                retries: last_round,
                output: None,
                error: last_error,
                end_emitted,
            },
        )
        .await
    }

    async fn succeed(
        &self,
        task_id: &str,
        started: Instant,
        tap: &TaskEventTap,
        attempt: ExecutionAttempt,
        output: BackendOutput,
    ) -> TaskResult {
        for action in &output.actions {
            self.emitter
                .task_event(
                    task_id,
                    EventKind::AssistantAction {
                        action: action.action.clone(),
                        args: action.args.clone(),
                    },
                )
                .await;
        }
        // Streaming backends already emitted their output through the tap.
        if tap.streamed_outputs() == 0 && !output.output.is_empty() {
            self.emitter
                .task_event(
                    task_id,
                    EventKind::AssistantOutput {
                        output: output.output.clone(),
                    },
                )
                .await;
        }

        let attempts = attempt.attempt_number;
        let retries = attempt.round;
        self.emit_task_end(
            task_id,
            TaskStatus::Succeeded,
            attempt.duration_ms,
            retries,
            attempts,
            true,
            None,
        )
        .await;

        let BackendOutput {
            output,
            actions,
            continuation,
        } = output;
        self.record_attempt(ExecutionAttempt {
            output: Some(output.clone()),
            actions,
            ..attempt
        })
        .await;
        self.update(
            task_id,
            TaskUpdate::status(TaskStatus::Succeeded)
                .with_output(Some(output.clone()))
                .with_continuation(continuation.clone()),
        )
        .await;

        TaskResult {
            task_id: task_id.to_string(),
            status: TaskStatus::Succeeded,
            attempts,
            retries,
            duration_ms: started.elapsed().as_millis() as u64,
            output: Some(output),
            continuation,
            error: None,
            error_code: None,
        }
    }

    /// Delay before the attempt that follows a failure, or `None` when the
    /// task is done. A retry round only starts if its backoff ends before
    /// the task deadline.
    fn next_attempt(
        &self,
        round: u32,
        rounds: u32,
        fallback_left: bool,
        code: ErrorCode,
        error: &str,
        deadline: Instant,
    ) -> Option<Duration> {
        if fallback_left {
            return (Instant::now() < deadline).then_some(Duration::ZERO);
        }
        let next_round = round.checked_add(1).filter(|next| *next < rounds)?;
        let delay = match &self.retry_strategy {
            Some(strategy) if !strategy.should_retry(next_round, code) => return None,
            Some(strategy) => strategy.next_delay(next_round, error),
            None => Duration::ZERO,
        };
        (Instant::now() + delay < deadline).then_some(delay)
    }

    async fn run_link(
        &self,
        link: &ChainLink,
        request: &BackendRequest,
        timeout: Duration,
    ) -> LinkOutcome {
        let Some(backend) = link.backend.clone() else {
            return LinkOutcome::Failure(BackendError::Unavailable(format!(
                "no backend registered for '{}'",
                link.name
            )));
        };

        let call = backend.execute(request);
        tokio::pin!(call);

        tokio::select! {
            result = &mut call => match result {
                Ok(output) => LinkOutcome::Success(output),
                Err(BackendError::Cancelled) if self.run_cancel.is_cancelled() => LinkOutcome::Cancelled,
                Err(err) => LinkOutcome::Failure(err),
            },
            _ = tokio::time::sleep(timeout) => {
                request.cancel.cancel();
                if tokio::time::timeout(self.cancel_grace, &mut call).await.is_err() {
                    tracing::warn!(task_id = %request.task_id, backend = %link.name, "backend ignored cancellation; dropping attempt");
                }
                LinkOutcome::Timeout
            }
            _ = self.run_cancel.cancelled() => {
                request.cancel.cancel();
                let _ = tokio::time::timeout(self.cancel_grace, &mut call).await;
                LinkOutcome::Cancelled
            }
        }
    }

    /// Sleeps `delay` before retry round `round`. Returns `false` if the run
    /// was cancelled meanwhile.
    async fn backoff(&self, task_id: &str, round: u32, delay: Duration) -> bool {
        self.update(task_id, TaskUpdate::status(TaskStatus::Retrying)).await;
        tracing::debug!(task_id, round, delay_ms = delay.as_millis() as u64, "retrying task");

        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.run_cancel.cancelled() => {}
            }
        }
        if self.run_cancel.is_cancelled() {
            return false;
        }

        self.update(task_id, TaskUpdate::status(TaskStatus::Running)).await;
        true
    }

    async fn cancel_before_start(&self, task_id: &str) -> TaskResult {
        let message = "run cancelled";
        self.update(
            task_id,
            TaskUpdate::status(TaskStatus::Cancelled).with_error(Some(message.into())),
        )
        .await;
        self.emit_task_end(
            task_id,
            TaskStatus::Cancelled,
            0,
            0,
            0,
            true,
            Some(message.into()),
        )
        .await;
        TaskResult::not_attempted(task_id, TaskStatus::Cancelled, message, ErrorCode::Cancelled)
    }

    async fn finish(&self, task_id: &str, started: Instant, finished: Finished) -> TaskResult {
        let Finished {
            status,
            attempts,
            retries,
            output,
            error,
            end_emitted,
        } = finished;
        let message = error.as_ref().map(|(message, _)| message.clone());

        // A failed attempt already emitted the final task.end unless the run
        // was cancelled during backoff or no backend was reached.
        if !end_emitted {
            self.emit_task_end(
                task_id,
                status,
                started.elapsed().as_millis() as u64,
                retries,
                attempts,
                true,
                message.clone(),
            )
            .await;
        }

        self.update(
            task_id,
            TaskUpdate::status(status)
                .with_output(output.clone())
                .with_error(message.clone()),
        )
        .await;

        TaskResult {
            task_id: task_id.to_string(),
            status,
            attempts,
            retries,
            duration_ms: started.elapsed().as_millis() as u64,
            output,
            continuation: None,
            error: message,
            error_code: error.map(|(_, code)| code),
        }
    }

    async fn emit_task_end(
        &self,
        task_id: &str,
        status: TaskStatus,
        duration_ms: u64,
        retries: u32,
        attempt: u32,
        is_final: bool,
        error: Option<String>,
    ) {
        self.emitter
            .task_event(
                task_id,
                EventKind::TaskEnd {
                    status,
                    duration_ms,
                    retries,
                    attempt,
                    is_final,
                    error,
                },
            )
            .await;
    }

    async fn update(&self, task_id: &str, update: TaskUpdate) {
        if let Err(err) = self.store.update_task(&self.run_id, task_id, update).await {
            self.store_failed(task_id, err).await;
        }
    }

    async fn record_attempt(&self, attempt: ExecutionAttempt) {
        let task_id = attempt.task_id.clone();
        if let Err(err) = self.store.append_attempt(&self.run_id, attempt).await {
            self.store_failed(&task_id, err).await;
        }
    }

    async fn store_failed(&self, task_id: &str, err: StoreError) {
        tracing::warn!(task_id, error = %err, "run store write failed");
        self.emitter
            .task_event(
                task_id,
                EventKind::Warning {
                    message: format!("run store write failed: {err}"),
                    code: Some(err.error_code()),
                },
            )
            .await;
    }
}

struct Finished {
    status: TaskStatus,
    attempts: u32,
    retries: u32,
    output: Option<String>,
    error: Option<(String, ErrorCode)>,
    end_emitted: bool,
}
