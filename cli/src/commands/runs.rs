use taskmux_core::api::{AppContext, CliError, RunStoreHandle, RunSummary};
use taskmux_plugins::factory;

use super::cli::RunsCommand;

pub async fn handle_runs(cmd: RunsCommand, ctx: &AppContext) -> Result<i32, CliError> {
    let store = factory::build_store(&ctx.cfg().store).map_err(CliError::Anyhow)?;
    match cmd {
        RunsCommand::List => list(&store).await,
        RunsCommand::Show { run_id } => show(&store, &run_id).await,
        RunsCommand::Purge => {
            let removed = store.purge_expired().await?;
            println!("purged {removed} expired run(s)");
            Ok(0)
        }
    }
}

async fn list(store: &RunStoreHandle) -> Result<i32, CliError> {
    let runs = store.list_runs().await?;
    if runs.is_empty() {
        println!("no runs");
        return Ok(0);
    }
    for run in &runs {
        println!("{}", summary_line(run));
    }
    Ok(0)
}

async fn show(store: &RunStoreHandle, run_id: &str) -> Result<i32, CliError> {
    match store.load_run(run_id).await {
        Ok(run) => {
            let json = serde_json::to_string_pretty(&run)
                .map_err(|e| CliError::Command(format!("cannot render run: {e}")))?;
            println!("{json}");
            Ok(0)
        }
        Err(e) => {
            eprintln!("{e}");
            Ok(i32::from(e.error_code().as_u16()))
        }
    }
}

pub fn summary_line(run: &RunSummary) -> String {
    let mut line = format!(
        "{}  {:<16} {}/{} succeeded  started {}",
        run.run_id,
        run.status.as_str(),
        run.succeeded,
        run.total_tasks,
        run.started_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(parent) = &run.parent_run_id {
        line.push_str(&format!("  (resumed from {parent})"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use taskmux_core::api::RunStatus;

    #[test]
    fn summary_line_mentions_parent() {
        let run = RunSummary {
            run_id: "r2".into(),
            parent_run_id: Some("r1".into()),
            status: RunStatus::PartiallyFailed,
            total_tasks: 3,
            succeeded: 2,
            failed: 1,
            started_at: chrono::Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            ended_at: None,
        };
        let line = summary_line(&run);
        assert!(line.starts_with("r2  partially_failed"));
        assert!(line.contains("2/3 succeeded"));
        assert!(line.ends_with("(resumed from r1)"));
    }
}
