use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::backend::{BackendRegistry, DependencyOutput};
use crate::error::{ErrorCode, ExecutorError};
use crate::events::{EventEmitter, EventKind, EventSink};
use crate::events_out::EventsOutTx;
use crate::state::{RunRecord, RunStatus, RunStoreHandle, TaskStatus, TaskUpdate};
use crate::stdio::{generate_run_id, FileLoader, StdioTask};

use super::attempt::AttemptRunner;
use super::graph::TaskGraph;
use super::scheduler::execute_wave;
use super::traits::{
    ConcurrencyContext, ConcurrencyStrategyPlugin, OutputRendererPlugin, RetryStrategyPlugin,
};
use super::types::{ExecutionConfig, ExecutionOpts, ExecutionResult, TaskResult};

struct SystemInfoCache {
    sys: sysinfo::System,
    cpu_count: usize,
    last_refresh: Instant,
    cached_cpu_usage: f32,
    cached_memory_usage: f32,
}

impl SystemInfoCache {
    fn new() -> Self {
        let mut sys = sysinfo::System::new();
        sys.refresh_cpu();
        sys.refresh_memory();
        let cpu_count = sys.cpus().len().max(1);
        let mut cache = Self {
            sys,
            cpu_count,
            last_refresh: Instant::now(),
            cached_cpu_usage: 0.0,
            cached_memory_usage: 0.0,
        };
        cache.sample();
        cache
    }

    fn sample(&mut self) {
        self.cached_cpu_usage = self.sys.cpus().iter().map(|c| c.cpu_usage()).sum::<f32>()
            / self.cpu_count as f32;
        let total_memory = self.sys.total_memory().max(1);
        self.cached_memory_usage = (self.sys.used_memory() as f32 / total_memory as f32) * 100.0;
    }

    fn get(&mut self) -> (usize, f32, f32) {
        if self.last_refresh.elapsed() > Duration::from_secs(1) {
            self.sys.refresh_cpu();
            self.sys.refresh_memory();
            self.sample();
            self.last_refresh = Instant::now();
        }
        (
            self.cpu_count,
            self.cached_cpu_usage,
            self.cached_memory_usage,
        )
    }
}

/// Runs task batches wave by wave against a backend registry.
pub struct ExecutionEngine {
    registry: Arc<BackendRegistry>,
    store: RunStoreHandle,
    renderer: Option<Arc<dyn OutputRendererPlugin>>,
    sinks: Vec<Arc<dyn EventSink>>,
    events_out: Option<EventsOutTx>,
    retry_strategy: Option<Arc<dyn RetryStrategyPlugin>>,
    concurrency_strategy: Option<Arc<dyn ConcurrencyStrategyPlugin>>,
    config: ExecutionConfig,
    file_loader: Arc<FileLoader>,
    cancel: CancellationToken,
    sys_cache: Mutex<SystemInfoCache>,
}

pub struct ExecutionEngineBuilder {
    registry: BackendRegistry,
    store: RunStoreHandle,
    renderer: Option<Arc<dyn OutputRendererPlugin>>,
    sinks: Vec<Arc<dyn EventSink>>,
    events_out: Option<EventsOutTx>,
    retry_strategy: Option<Arc<dyn RetryStrategyPlugin>>,
    concurrency_strategy: Option<Arc<dyn ConcurrencyStrategyPlugin>>,
    config: ExecutionConfig,
    cancel: Option<CancellationToken>,
}

/// Status and output of a dependency that lives outside the current batch.
struct PriorTask {
    status: TaskStatus,
    output: Option<String>,
    continuation: Option<serde_json::Value>,
}

impl ExecutionEngine {
    pub fn builder(registry: BackendRegistry, store: RunStoreHandle) -> ExecutionEngineBuilder {
        ExecutionEngineBuilder::new(registry, store)
    }

    /// Cancelling this token stops the run: in-flight attempts are cancelled,
    /// remaining tasks end `cancelled`.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn store(&self) -> &RunStoreHandle {
        &self.store
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Executes a fresh batch.
    pub async fn execute(
        &self,
        tasks: Vec<StdioTask>,
        opts: &ExecutionOpts,
    ) -> Result<ExecutionResult, ExecutorError> {
        self.run(tasks, opts, None).await
    }

    /// Executes `tasks` as a new run whose tasks may depend on the tasks of
    /// `prior_run_id`. Prior tasks are never re-executed.
    pub async fn resume(
        &self,
        prior_run_id: &str,
        tasks: Vec<StdioTask>,
        opts: &ExecutionOpts,
    ) -> Result<ExecutionResult, ExecutorError> {
        let run_id = opts.run_id.clone().unwrap_or_else(generate_run_id);
        let prior = match self.store.load_run(prior_run_id).await {
            Ok(prior) => prior,
            Err(err) => {
                let err = ExecutorError::from(err);
                self.abort(&run_id, &err).await;
                return Err(err);
            }
        };
        let opts = ExecutionOpts {
            run_id: Some(run_id),
            ..opts.clone()
        };
        self.run(tasks, &opts, Some(prior)).await
    }

    async fn run(
        &self,
        tasks: Vec<StdioTask>,
        opts: &ExecutionOpts,
        prior: Option<RunRecord>,
    ) -> Result<ExecutionResult, ExecutorError> {
        let run_id = opts.run_id.clone().unwrap_or_else(generate_run_id);
        let start = Instant::now();

        let prior_tasks: HashMap<String, PriorTask> = prior
            .as_ref()
            .map(|run| {
                run.tasks
                    .iter()
                    .map(|record| {
                        (
                            record.id().to_string(),
                            PriorTask {
                                status: record.status,
                                output: record.output.clone(),
                                continuation: record.continuation.clone(),
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        let parent_run_id = prior.as_ref().map(|run| run.run_id.clone());

        let (graph, waves) = match plan(&tasks, prior_tasks.keys()) {
            Ok(planned) => planned,
            Err(err) => {
                self.abort(&run_id, &err).await;
                return Err(err);
            }
        };

        if let Err(err) = self
            .store
            .create_run(RunRecord::new(
                run_id.clone(),
                parent_run_id.clone(),
                &tasks,
                waves.clone(),
            ))
            .await
        {
            let err = ExecutorError::from(err);
            self.abort(&run_id, &err).await;
            return Err(err);
        }

        let emitter = self.emitter(&run_id);
        let total_tasks = graph.len();

        tracing::info!(
            run_id = %run_id,
            total_tasks,
            total_waves = waves.len(),
            resumed_from = parent_run_id.as_deref().unwrap_or(""),
            "run started"
        );
        emitter
            .run_event(EventKind::RunStart {
                total_tasks,
                total_waves: waves.len(),
                resumed_from: parent_run_id.clone(),
            })
            .await;
        emitter
            .run_event(EventKind::Info {
                message: "execution plan".to_string(),
                metadata: Some(json!({ "waves": waves })),
            })
            .await;

        let runner = AttemptRunner {
            run_id: run_id.clone(),
            registry: self.registry.clone(),
            store: self.store.clone(),
            emitter: emitter.clone(),
            file_loader: self.file_loader.clone(),
            retry_strategy: self.retry_strategy.clone(),
            run_cancel: self.cancel.clone(),
            default_timeout_secs: self.config.default_timeout_secs,
            cancel_grace: Duration::from_millis(self.config.cancel_grace_ms),
            fallback_enabled: opts.fallback_enabled && self.config.fallback.enabled,
        };

        let mut task_results: HashMap<String, TaskResult> = HashMap::with_capacity(total_tasks);

        for (wave_index, wave) in waves.iter().enumerate() {
            if self.cancel.is_cancelled() {
                for task_id in wave {
                    let result = self.skip_task(&emitter, &run_id, task_id, Skip::Cancelled).await;
                    task_results.insert(task_id.clone(), result);
                }
                continue;
            }

            let mut ready: Vec<String> = Vec::with_capacity(wave.len());
            for task_id in wave {
                let Some(task) = graph.task(task_id) else {
                    continue;
                };
                match unmet_dependency(task, &task_results, &prior_tasks) {
                    Some(dep) => {
                        let result = self
                            .skip_task(&emitter, &run_id, task_id, Skip::Blocked { dependency: dep })
                            .await;
                        task_results.insert(task_id.clone(), result);
                    }
                    None => {
                        self.update(&emitter, &run_id, task_id, TaskUpdate::status(TaskStatus::Ready))
                            .await;
                        ready.push(task_id.clone());
                    }
                }
            }

            if ready.is_empty() {
                continue;
            }

            let concurrency = self.wave_concurrency(opts, ready.len());
            tracing::debug!(
                run_id = %run_id,
                wave = wave_index,
                ready = ready.len(),
                concurrency,
                "dispatching wave"
            );

            let wave_results = {
                let graph = &graph;
                let runner = &runner;
                let task_results = &task_results;
                let prior_tasks = &prior_tasks;
                execute_wave(&ready, concurrency, move |task_id: String| async move {
                    match graph.task(&task_id) {
                        Some(task) => {
                            let deps = dependency_outputs(task, task_results, prior_tasks);
                            runner.execute(task, deps).await
                        }
                        None => TaskResult::not_attempted(
                            task_id,
                            TaskStatus::Failed,
                            "task missing from graph",
                            ErrorCode::TaskNotFound,
                        ),
                    }
                })
                .await
            };
            task_results.extend(wave_results);
        }

        let succeeded = task_results.values().filter(|r| r.succeeded()).count();
        let any_cancelled = task_results
            .values()
            .any(|r| r.status == TaskStatus::Cancelled);
        let status = RunStatus::from_counts(
            succeeded,
            total_tasks,
            self.cancel.is_cancelled() && any_cancelled,
        );

        if let Err(err) = self.store.finish_run(&run_id, status).await {
            tracing::warn!(run_id = %run_id, error = %err, "failed to finish run record");
            emitter
                .run_event(EventKind::Warning {
                    message: format!("run store write failed: {err}"),
                    code: Some(err.error_code()),
                })
                .await;
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let failed = total_tasks - succeeded;
        emitter
            .run_event(EventKind::RunEnd {
                status,
                total_tasks,
                completed: succeeded,
                failed,
                duration_ms,
            })
            .await;
        tracing::info!(run_id = %run_id, status = %status, succeeded, failed, duration_ms, "run finished");

        Ok(ExecutionResult {
            run_id,
            parent_run_id,
            status,
            total_tasks,
            completed: succeeded,
            failed,
            duration_ms,
            task_results,
            waves,
        })
    }

    fn emitter(&self, run_id: &str) -> EventEmitter {
        EventEmitter::new(
            run_id,
            self.renderer.clone(),
            self.sinks.clone(),
            self.events_out.clone(),
        )
    }

    /// Configuration errors: a single `error` event, nothing persisted.
    async fn abort(&self, run_id: &str, err: &ExecutorError) {
        tracing::error!(run_id, error = %err, "run aborted before execution");
        self.emitter(run_id)
            .run_event(EventKind::Error {
                message: err.to_string(),
                code: err.error_code(),
            })
            .await;
    }

    async fn skip_task(
        &self,
        emitter: &EventEmitter,
        run_id: &str,
        task_id: &str,
        skip: Skip,
    ) -> TaskResult {
        let (status, message, code) = match skip {
            Skip::Blocked { dependency } => {
                let message = format!("dependency '{dependency}' did not succeed");
                emitter
                    .task_event(
                        task_id,
                        EventKind::Warning {
                            message: format!("task '{task_id}' blocked: {message}"),
                            code: Some(ErrorCode::DependencyError),
                        },
                    )
                    .await;
                (TaskStatus::Blocked, message, ErrorCode::DependencyError)
            }
            Skip::Cancelled => (
                TaskStatus::Cancelled,
                "run cancelled".to_string(),
                ErrorCode::Cancelled,
            ),
        };
        tracing::debug!(run_id, task_id, status = %status, "task not attempted");

        self.update(
            emitter,
            run_id,
            task_id,
            TaskUpdate::status(status).with_error(Some(message.clone())),
        )
        .await;
        emitter
            .task_event(
                task_id,
                EventKind::TaskEnd {
                    status,
                    duration_ms: 0,
                    retries: 0,
                    attempt: 0,
                    is_final: true,
                    error: Some(message.clone()),
                },
            )
            .await;
        TaskResult::not_attempted(task_id, status, message, code)
    }

    async fn update(&self, emitter: &EventEmitter, run_id: &str, task_id: &str, update: TaskUpdate) {
        if let Err(err) = self.store.update_task(run_id, task_id, update).await {
            tracing::warn!(run_id, task_id, error = %err, "run store write failed");
            emitter
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

    /// CLI override, else config / `num_cpus` refined by the concurrency strategy.
    fn wave_concurrency(&self, opts: &ExecutionOpts, active_tasks: usize) -> usize {
        if let Some(max_parallel) = opts.max_parallel {
            return max_parallel.max(1);
        }
        let base = self
            .config
            .max_parallel
            .unwrap_or_else(num_cpus::get)
            .max(1);
        self.concurrency_strategy
            .as_ref()
            .map(|strategy| {
                let context = self.concurrency_context(base, active_tasks);
                strategy.calculate_concurrency(&context)
            })
            .unwrap_or(base)
            .max(1)
    }

    fn concurrency_context(&self, base_concurrency: usize, active_tasks: usize) -> ConcurrencyContext {
        let mut cache = match self.sys_cache.lock() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (cpu_count, cpu_usage, memory_usage) = cache.get();

        ConcurrencyContext {
            cpu_usage,
            available_cpus: cpu_count,
            memory_usage,
            active_tasks,
            base_concurrency,
        }
    }
}

enum Skip {
    Blocked { dependency: String },
    Cancelled,
}

/// Builds and validates the graph, then computes its waves.
fn plan<'a>(
    tasks: &[StdioTask],
    external: impl Iterator<Item = &'a String>,
) -> Result<(TaskGraph<StdioTask>, Vec<Vec<String>>), ExecutorError> {
    if tasks.is_empty() {
        return Err(ExecutorError::Config("no tasks to execute".to_string()));
    }
    let graph = TaskGraph::from_tasks_with_external(tasks, external.cloned())?;
    graph.validate()?;
    let waves = graph.waves()?;
    Ok((graph, waves))
}

/// First dependency of `task` that did not succeed, if any.
fn unmet_dependency(
    task: &StdioTask,
    results: &HashMap<String, TaskResult>,
    prior: &HashMap<String, PriorTask>,
) -> Option<String> {
    task.dependencies
        .iter()
        .find(|dep| {
            let succeeded = match results.get(dep.as_str()) {
                Some(result) => result.succeeded(),
                None => prior
                    .get(dep.as_str())
                    .map(|p| p.status == TaskStatus::Succeeded)
                    .unwrap_or(false),
            };
            !succeeded
        })
        .cloned()
}

fn dependency_outputs(
    task: &StdioTask,
    results: &HashMap<String, TaskResult>,
    prior: &HashMap<String, PriorTask>,
) -> Vec<DependencyOutput> {
    let mut seen = HashSet::new();
    task.dependencies
        .iter()
        .filter(|dep| seen.insert(dep.as_str()))
        .filter_map(|dep| {
            if let Some(result) = results.get(dep.as_str()) {
                return Some(DependencyOutput {
                    task_id: dep.clone(),
                    output: result.output.clone().unwrap_or_default(),
                    continuation: result.continuation.clone(),
                    from_prior_run: false,
                });
            }
            prior.get(dep.as_str()).map(|p| DependencyOutput {
                task_id: dep.clone(),
                output: p.output.clone().unwrap_or_default(),
                continuation: p.continuation.clone(),
                from_prior_run: true,
            })
        })
        .collect()
}

impl ExecutionEngineBuilder {
    pub fn new(registry: BackendRegistry, store: RunStoreHandle) -> Self {
        Self {
            registry,
            store,
            renderer: None,
            sinks: Vec::new(),
            events_out: None,
            retry_strategy: None,
            concurrency_strategy: None,
            config: ExecutionConfig::default(),
            cancel: None,
        }
    }

    pub fn renderer(mut self, renderer: Arc<dyn OutputRendererPlugin>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn events_out(mut self, events_out: Option<EventsOutTx>) -> Self {
        self.events_out = events_out;
        self
    }

    pub fn retry_strategy(mut self, strategy: Arc<dyn RetryStrategyPlugin>) -> Self {
        self.retry_strategy = Some(strategy);
        self
    }

    pub fn concurrency_strategy(mut self, strategy: Arc<dyn ConcurrencyStrategyPlugin>) -> Self {
        self.concurrency_strategy = Some(strategy);
        self
    }

    pub fn config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(self) -> ExecutionEngine {
        let registry = self.registry.with_fallback_config(&self.config.fallback);
        ExecutionEngine {
            registry: Arc::new(registry),
            store: self.store,
            renderer: self.renderer,
            sinks: self.sinks,
            events_out: self.events_out,
            retry_strategy: self.retry_strategy,
            concurrency_strategy: self.concurrency_strategy,
            file_loader: Arc::new(FileLoader::new(self.config.files.clone())),
            config: self.config,
            cancel: self.cancel.unwrap_or_default(),
            sys_cache: Mutex::new(SystemInfoCache::new()),
        }
    }
}
