use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use taskmux_core::api::{
    parse_stdio_tasks, parse_stdio_tasks_with, AppContext, CliError, ErrorCode, EventKind,
    ExecutionEngine, ExecutionOpts, ExecutionResult, ExecutorError, ParseContext, RunEvent,
};
use taskmux_core::stdio::generate_run_id;
use taskmux_plugins::factory::{self, EngineOptions};

use super::cli::{ExecArgs, ResumeArgs, RunArgs};
use super::read_input;

/// Exit code after Ctrl-C.
pub const EXIT_INTERRUPTED: i32 = 130;

pub async fn handle_run(args: RunArgs, ctx: &AppContext) -> Result<i32, CliError> {
    let engine_opts = engine_options(&args.exec, ctx);
    let engine = factory::build_engine(ctx, &engine_opts).map_err(CliError::Anyhow)?;
    let input = read_input(args.exec.input.as_deref())?;

    let tasks = match parse_stdio_tasks(&input) {
        Ok(tasks) => tasks,
        Err(e) => {
            let run_id = args.run_id.clone().unwrap_or_else(generate_run_id);
            report_error(ctx, &engine_opts, &run_id, e.error_code(), e.to_string()).await;
            return Ok(exit_code(e.error_code()));
        }
    };

    let opts = execution_opts(&args.exec, args.run_id.clone());
    let interrupted = watch_ctrl_c(&engine);
    let outcome = engine.execute(tasks, &opts).await;
    Ok(finish(outcome, &interrupted))
}

pub async fn handle_resume(args: ResumeArgs, ctx: &AppContext) -> Result<i32, CliError> {
    let engine_opts = engine_options(&args.exec, ctx);
    let engine = factory::build_engine(ctx, &engine_opts).map_err(CliError::Anyhow)?;
    let input = read_input(args.exec.input.as_deref())?;
    let run_id = generate_run_id();

    let prior = match engine.store().load_run(&args.run_id).await {
        Ok(prior) => prior,
        Err(e) => {
            report_error(ctx, &engine_opts, &run_id, e.error_code(), e.to_string()).await;
            return Ok(exit_code(e.error_code()));
        }
    };
    let known = ParseContext::with_known_ids(prior.tasks.iter().map(|t| t.id().to_string()));

    let tasks = match parse_stdio_tasks_with(&input, &known) {
        Ok(tasks) => tasks,
        Err(e) => {
            report_error(ctx, &engine_opts, &run_id, e.error_code(), e.to_string()).await;
            return Ok(exit_code(e.error_code()));
        }
    };

    tracing::info!(prior_run = %args.run_id, run_id = %run_id, tasks = tasks.len(), "resuming run");
    let opts = execution_opts(&args.exec, Some(run_id));
    let interrupted = watch_ctrl_c(&engine);
    let outcome = engine.resume(&args.run_id, tasks, &opts).await;
    Ok(finish(outcome, &interrupted))
}

fn engine_options(args: &ExecArgs, ctx: &AppContext) -> EngineOptions {
    let mut opts = EngineOptions::from_config(ctx.cfg());
    if let Some(format) = &args.stream_format {
        opts.stream_format = format.clone();
    }
    opts.ascii_only |= args.ascii;
    opts.show_output &= !args.quiet;
    opts
}

fn execution_opts(args: &ExecArgs, run_id: Option<String>) -> ExecutionOpts {
    ExecutionOpts {
        run_id,
        max_parallel: args.max_parallel.map(|n| n as usize),
        fallback_enabled: !args.no_fallback,
    }
}

/// Cancels the engine's run on the first Ctrl-C.
fn watch_ctrl_c(engine: &ExecutionEngine) -> Arc<AtomicBool> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling run");
            flag.store(true, Ordering::SeqCst);
            cancel.cancel();
        }
    });
    interrupted
}

fn finish(outcome: Result<ExecutionResult, ExecutorError>, interrupted: &AtomicBool) -> i32 {
    if interrupted.load(Ordering::SeqCst) {
        return EXIT_INTERRUPTED;
    }
    match outcome {
        Ok(result) => {
            tracing::info!(
                run_id = %result.run_id,
                status = %result.status,
                completed = result.completed,
                failed = result.failed,
                "run finished"
            );
            result.exit_code()
        }
        // The engine already emitted the error event.
        Err(e) => exit_code(e.error_code()),
    }
}

fn exit_code(code: ErrorCode) -> i32 {
    match code.as_u16() {
        0 => 1,
        c => i32::from(c),
    }
}

/// Errors raised before the engine starts still reach the event stream.
async fn report_error(
    ctx: &AppContext,
    opts: &EngineOptions,
    run_id: &str,
    code: ErrorCode,
    message: String,
) {
    let event = RunEvent::new(run_id, None, EventKind::Error { message, code });
    match factory::build_renderer(&opts.stream_format, opts.ascii_only, opts.show_output) {
        Ok(renderer) => {
            renderer.render(&event);
            renderer.flush();
        }
        Err(e) => tracing::warn!(error = %e, "cannot render error event"),
    }
    if let Some(tx) = ctx.events_out() {
        tx.send_line(event.to_jsonl().to_line()).await;
    }
}
