mod common;

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

use common::{harness, is_final_task_end, is_task_start, Script, ScriptedBackend};
use taskmux_core::api::{
    BackendRole, ErrorCode, EventKind, ExecutionOpts, ExecutorError, RunStatus, StdioTask,
    TaskStatus,
};
use taskmux_core::state::AttemptOutcome;

fn task(id: &str, backend: &str, deps: &[&str]) -> StdioTask {
    StdioTask::new(id, backend, format!("work for {id}")).with_dependencies(deps.iter().copied())
}

#[tokio::test]
async fn independent_tasks_share_a_wave_and_join_runs_after_both() {
    let backend = Arc::new(ScriptedBackend::succeeding("mock").delay(Duration::from_millis(100)));
    let h = harness(vec![backend.clone()], None, None);

    let tasks = vec![task("A", "mock", &[]), task("B", "mock", &[]), task("C", "mock", &["A", "B"])];
    let opts = ExecutionOpts {
        max_parallel: Some(4),
        ..ExecutionOpts::default()
    };
    let result = h.engine.execute(tasks, &opts).await.unwrap();

    assert_eq!(
        result.waves,
        vec![vec!["A".to_string(), "B".to_string()], vec!["C".to_string()]]
    );
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.completed, 3);
    assert_eq!(backend.peak_concurrency(), 2);

    let c_start = h.sink.position(|e| is_task_start(e, "C")).unwrap();
    for dep in ["A", "B"] {
        let end = h.sink.position(|e| is_final_task_end(e, dep)).unwrap();
        assert!(end < c_start, "{dep} must end before C starts");
        assert_eq!(result.task_results[dep].status, TaskStatus::Succeeded);
    }
}

#[tokio::test]
async fn cycle_is_rejected_before_anything_runs() {
    let backend = Arc::new(ScriptedBackend::succeeding("mock"));
    let h = harness(vec![backend.clone()], None, None);

    let tasks = vec![task("X", "mock", &["Y"]), task("Y", "mock", &["X"])];
    let err = h.engine.execute(tasks, &ExecutionOpts::default()).await.unwrap_err();

    assert!(matches!(err, ExecutorError::CircularDependency(_)));
    assert_eq!(err.error_code().as_u16(), 12);
    assert_eq!(h.sink.types(), vec!["error"]);
    assert!(backend.calls().is_empty());
    assert!(h.store.list_runs().await.unwrap().is_empty());
}

#[tokio::test]
async fn dependencies_end_before_dependents_start() {
    let backend = Arc::new(ScriptedBackend::succeeding("mock"));
    let h = harness(vec![backend.clone()], None, None);

    let tasks = vec![
        task("d", "mock", &["b", "c"]),
        task("b", "mock", &["a"]),
        task("c", "mock", &["a"]),
        task("a", "mock", &[]),
        task("e", "mock", &["d"]),
    ];
    let edges = [("a", "b"), ("a", "c"), ("b", "d"), ("c", "d"), ("d", "e")];
    let result = h.engine.execute(tasks, &ExecutionOpts::default()).await.unwrap();
    assert_eq!(result.status, RunStatus::Completed);

    for (dep, dependent) in edges {
        let end = h.sink.position(|e| is_final_task_end(e, dep)).unwrap();
        let start = h.sink.position(|e| is_task_start(e, dependent)).unwrap();
        assert!(end < start, "{dep} must end before {dependent} starts");
    }
}

#[tokio::test]
async fn waves_are_identical_across_runs() {
    let batch = || {
        vec![
            task("fetch", "mock", &[]),
            task("lint", "mock", &[]),
            task("build", "mock", &["fetch"]),
            task("test", "mock", &["build", "lint"]),
            task("docs", "mock", &["fetch"]),
        ]
    };
    let backend = Arc::new(ScriptedBackend::succeeding("mock"));
    let h = harness(vec![backend], None, None);

    let first = h.engine.execute(batch(), &ExecutionOpts::default()).await.unwrap();
    let second = h.engine.execute(batch(), &ExecutionOpts::default()).await.unwrap();

    assert_eq!(first.waves, second.waves);
    assert_eq!(
        first.waves,
        vec![
            vec!["fetch".to_string(), "lint".to_string()],
            vec!["build".to_string(), "docs".to_string()],
            vec!["test".to_string()],
        ]
    );
    assert_ne!(first.run_id, second.run_id);
}

#[tokio::test]
async fn fallback_rescues_every_task() {
    let primary = Arc::new(ScriptedBackend::failing("primary"));
    let backup = Arc::new(ScriptedBackend::succeeding("backup"));
    let h = harness(vec![primary.clone(), backup.clone()], Some("backup"), None);

    let tasks = vec![task("a", "primary", &[]), task("b", "primary", &["a"])];
    let result = h.engine.execute(tasks, &ExecutionOpts::default()).await.unwrap();
    assert_eq!(result.status, RunStatus::Completed);

    let record = h.store.load_run(&result.run_id).await.unwrap();
    for id in ["a", "b"] {
        let task = record.task(id).unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);
        let history: Vec<(BackendRole, AttemptOutcome)> = task
            .attempts
            .iter()
            .map(|a| (a.backend_used.role, a.outcome))
            .collect();
        assert_eq!(
            history,
            vec![
                (BackendRole::Primary, AttemptOutcome::Failure),
                (BackendRole::Fallback, AttemptOutcome::Success),
            ]
        );
        assert_eq!(task.output.as_deref(), Some(format!("{id} done by backup").as_str()));
    }
    assert_eq!(primary.calls(), vec!["a", "b"]);
    assert_eq!(backup.calls(), vec!["a", "b"]);
}

#[tokio::test]
async fn retries_are_bounded_by_retry_count() {
    let backend = Arc::new(ScriptedBackend::failing("mock"));
    let h = harness(vec![backend.clone()], None, None);

    let tasks = vec![task("flaky", "mock", &[]).with_retry(2)];
    let result = h.engine.execute(tasks, &ExecutionOpts::default()).await.unwrap();

    let flaky = &result.task_results["flaky"];
    assert_eq!(flaky.status, TaskStatus::Failed);
    assert_eq!(flaky.attempts, 3);
    assert_eq!(flaky.retries, 2);
    assert_eq!(backend.calls_for("flaky"), 3);
    assert_eq!(result.status, RunStatus::Failed);

    let record = h.store.load_run(&result.run_id).await.unwrap();
    let attempts = &record.task("flaky").unwrap().attempts;
    assert_eq!(
        attempts.iter().map(|a| a.attempt_number).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(attempts.iter().map(|a| a.round).collect::<Vec<_>>(), vec![0, 1, 2]);

    let finals = h
        .sink
        .task_events("flaky")
        .into_iter()
        .filter(|e| matches!(e.kind, EventKind::TaskEnd { is_final: true, .. }))
        .count();
    assert_eq!(finals, 1);
}

#[tokio::test]
async fn retry_recovers_transient_failure() {
    let backend = Arc::new(ScriptedBackend::with_default("mock", Script::FailTimes(1)));
    let h = harness(vec![backend], None, None);

    let tasks = vec![task("t", "mock", &[]).with_retry(1)];
    let result = h.engine.execute(tasks, &ExecutionOpts::default()).await.unwrap();

    let t = &result.task_results["t"];
    assert_eq!(t.status, TaskStatus::Succeeded);
    assert_eq!(t.attempts, 2);
    assert_eq!(t.retries, 1);
    assert_eq!(t.output.as_deref(), Some("recovered"));
}

#[tokio::test]
async fn failed_dependency_blocks_dependents() {
    let backend = Arc::new(
        ScriptedBackend::succeeding("mock").script("A", Script::Fail("broken".into())),
    );
    let h = harness(vec![backend.clone()], None, None);

    let tasks = vec![
        task("A", "mock", &[]),
        task("B", "mock", &["A"]),
        task("C", "mock", &["B"]),
        task("D", "mock", &[]),
    ];
    let result = h.engine.execute(tasks, &ExecutionOpts::default()).await.unwrap();

    assert_eq!(result.task_results["A"].status, TaskStatus::Failed);
    assert_eq!(result.task_results["B"].status, TaskStatus::Blocked);
    assert_eq!(result.task_results["C"].status, TaskStatus::Blocked);
    assert_eq!(result.task_results["D"].status, TaskStatus::Succeeded);
    assert_eq!(result.status, RunStatus::PartiallyFailed);
    assert_eq!(result.failed, 3);

    for id in ["B", "C"] {
        assert_eq!(backend.calls_for(id), 0);
        assert_eq!(result.task_results[id].attempts, 0);
        assert!(h.sink.position(|e| is_task_start(e, id)).is_none());
        assert!(h.sink.position(|e| is_final_task_end(e, id)).is_some());
    }

    let run_end = h.sink.events().last().cloned().unwrap();
    assert!(matches!(
        run_end.kind,
        EventKind::RunEnd { completed: 1, failed: 3, .. }
    ));
}

#[tokio::test]
async fn resume_builds_on_prior_outputs_without_rerunning() {
    let backend = Arc::new(ScriptedBackend::succeeding("mock"));
    let first = harness(vec![backend.clone()], None, None);
    let prior = first
        .engine
        .execute(vec![task("plan", "mock", &[])], &ExecutionOpts::default())
        .await
        .unwrap();
    assert_eq!(prior.status, RunStatus::Completed);

    let second = harness(vec![backend.clone()], None, Some(first.store.clone()));
    let result = second
        .engine
        .resume(
            &prior.run_id,
            vec![task("implement", "mock", &["plan"])],
            &ExecutionOpts::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.parent_run_id.as_deref(), Some(prior.run_id.as_str()));
    assert_eq!(backend.calls(), vec!["plan", "implement"]);
    assert!(!result.task_results.contains_key("plan"));

    let run_start = second.sink.events().first().cloned().unwrap();
    assert!(matches!(
        run_start.kind,
        EventKind::RunStart { total_tasks: 1, resumed_from: Some(ref id), .. } if *id == prior.run_id
    ));
}

#[tokio::test]
async fn resuming_unknown_run_is_not_found() {
    let backend = Arc::new(ScriptedBackend::succeeding("mock"));
    let h = harness(vec![backend.clone()], None, None);

    let err = h
        .engine
        .resume("missing-run", vec![task("x", "mock", &[])], &ExecutionOpts::default())
        .await
        .unwrap_err();

    assert_eq!(err.error_code().as_u16(), 13);
    assert_eq!(h.sink.types(), vec!["error"]);
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn unknown_backend_falls_back() {
    let backup = Arc::new(ScriptedBackend::succeeding("backup"));
    let h = harness(vec![backup.clone()], Some("backup"), None);

    let result = h
        .engine
        .execute(vec![task("t", "nowhere", &[])], &ExecutionOpts::default())
        .await
        .unwrap();

    assert_eq!(result.task_results["t"].status, TaskStatus::Succeeded);
    assert_eq!(result.task_results["t"].attempts, 2);
    assert_eq!(backup.calls(), vec!["t"]);
}

#[tokio::test]
async fn disabling_fallback_per_run_skips_backup() {
    let primary = Arc::new(ScriptedBackend::failing("primary"));
    let backup = Arc::new(ScriptedBackend::succeeding("backup"));
    let h = harness(vec![primary, backup.clone()], Some("backup"), None);

    let opts = ExecutionOpts {
        fallback_enabled: false,
        ..ExecutionOpts::default()
    };
    let result = h.engine.execute(vec![task("t", "primary", &[])], &opts).await.unwrap();

    assert_eq!(result.task_results["t"].status, TaskStatus::Failed);
    assert!(backup.calls().is_empty());
    assert_eq!(result.exit_code(), 1);
}

#[tokio::test]
async fn task_timeout_leaves_wave_siblings_alone() {
    let backend = Arc::new(
        ScriptedBackend::succeeding("mock")
            .delay(Duration::from_millis(200))
            .script("slow", Script::Hang),
    );
    let h = harness(vec![backend.clone()], None, None);

    let tasks = vec![
        task("slow", "mock", &[]).with_timeout(1),
        task("quick", "mock", &[]),
        task("steady", "mock", &[]),
        task("after", "mock", &["quick"]),
    ];
    let opts = ExecutionOpts {
        max_parallel: Some(4),
        ..ExecutionOpts::default()
    };
    let result = h.engine.execute(tasks, &opts).await.unwrap();

    assert_eq!(result.status, RunStatus::PartiallyFailed);
    assert_eq!(result.task_results["slow"].status, TaskStatus::TimedOut);
    assert_eq!(result.task_results["slow"].error_code, Some(ErrorCode::Timeout));
    for id in ["quick", "steady", "after"] {
        assert_eq!(result.task_results[id].status, TaskStatus::Succeeded, "{id}");
        assert_eq!(backend.calls_for(id), 1, "{id}");
    }

    let slow_end = h.sink.position(|e| is_final_task_end(e, "slow")).unwrap();
    for id in ["quick", "steady"] {
        let end = h.sink.position(|e| is_final_task_end(e, id)).unwrap();
        assert!(end < slow_end, "{id} must not wait for the timed out sibling");
    }
}

#[tokio::test]
async fn cancelling_mid_wave_stops_the_run() {
    let backend = Arc::new(ScriptedBackend::with_default("mock", Script::Hang));
    let h = harness(vec![backend.clone()], None, None);
    let cancel = h.engine.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let tasks = vec![
        task("a", "mock", &[]).with_retry(2),
        task("b", "mock", &[]),
        task("c", "mock", &["a"]),
    ];
    let opts = ExecutionOpts {
        max_parallel: Some(4),
        ..ExecutionOpts::default()
    };
    let result = h.engine.execute(tasks, &opts).await.unwrap();

    assert_eq!(result.status, RunStatus::Cancelled);
    for id in ["a", "b", "c"] {
        assert_eq!(result.task_results[id].status, TaskStatus::Cancelled, "{id}");
        let finals = h
            .sink
            .task_events(id)
            .iter()
            .filter(|e| is_final_task_end(e, id))
            .count();
        assert_eq!(finals, 1, "{id} needs exactly one final task.end");
    }
    assert_eq!(backend.calls_for("a"), 1);
    assert_eq!(backend.calls_for("b"), 1);
    assert_eq!(backend.calls_for("c"), 0);
    assert!(h.sink.position(|e| is_task_start(e, "c")).is_none());

    let run = h.store.load_run(&result.run_id).await.unwrap();
    for id in ["a", "b"] {
        let attempts = &run.task(id).unwrap().attempts;
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].outcome, AttemptOutcome::Cancelled);
    }

    let run_end = h
        .sink
        .events()
        .into_iter()
        .find_map(|e| match e.kind {
            EventKind::RunEnd {
                total_tasks,
                completed,
                failed,
                ..
            } => Some((total_tasks, completed, failed)),
            _ => None,
        })
        .unwrap();
    assert_eq!(run_end, (3, 0, 3));
    assert_eq!(run_end.2, run_end.0 - run_end.1);
}

#[tokio::test]
async fn unmatched_glob_warns_and_task_still_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(ScriptedBackend::succeeding("mock"));
    let h = harness(vec![backend], None, None);

    let mut t = task("a", "mock", &[]).with_workdir(dir.path().to_string_lossy());
    t.files = vec!["*.nomatch".to_string()];
    let result = h.engine.execute(vec![t], &ExecutionOpts::default()).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.task_results["a"].status, TaskStatus::Succeeded);
    let codes: Vec<Option<ErrorCode>> = h
        .sink
        .task_events("a")
        .into_iter()
        .filter_map(|e| match e.kind {
            EventKind::Warning { code, .. } => Some(code),
            _ => None,
        })
        .collect();
    assert_eq!(codes, vec![Some(ErrorCode::GlobNoMatch)]);
    assert_eq!(ErrorCode::GlobNoMatch.as_u16(), 66);
}
