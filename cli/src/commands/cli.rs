use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "taskmux", version, about = "Run dependent task batches across AI backends")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by `run` and `resume`.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct ExecArgs {
    /// Task batch file; stdin when omitted.
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// `text` or `jsonl`; defaults to `executor.output.format`.
    #[arg(long, value_parser = ["text", "jsonl"])]
    pub stream_format: Option<String>,

    /// ASCII status markers in text output.
    #[arg(long)]
    pub ascii: bool,

    /// Hide backend output in text output.
    #[arg(long)]
    pub quiet: bool,

    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_parallel: Option<u64>,

    /// Never try fallback backends.
    #[arg(long)]
    pub no_fallback: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub exec: ExecArgs,

    /// Id for the new run; generated when omitted.
    #[arg(long)]
    pub run_id: Option<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ResumeArgs {
    /// Run whose tasks the new batch may depend on.
    #[arg(long)]
    pub run_id: String,

    #[command(flatten)]
    pub exec: ExecArgs,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ValidateArgs {
    #[arg(long)]
    pub input: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum RunsCommand {
    /// Stored runs, newest first.
    List,
    /// Full record of one run as JSON.
    Show { run_id: String },
    /// Delete runs past retention.
    Purge,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Run(RunArgs),
    Resume(ResumeArgs),
    Validate(ValidateArgs),
    #[command(subcommand)]
    Runs(RunsCommand),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("taskmux").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn run_with_all_options() {
        let args = parse(&[
            "run",
            "--input",
            "tasks.txt",
            "--stream-format",
            "jsonl",
            "--ascii",
            "--quiet",
            "--max-parallel",
            "4",
            "--run-id",
            "r1",
            "--no-fallback",
        ]);
        let Commands::Run(run) = args.command else {
            panic!("expected run");
        };
        assert_eq!(run.exec.input, Some(PathBuf::from("tasks.txt")));
        assert_eq!(run.exec.stream_format.as_deref(), Some("jsonl"));
        assert!(run.exec.ascii && run.exec.quiet && run.exec.no_fallback);
        assert_eq!(run.exec.max_parallel, Some(4));
        assert_eq!(run.run_id.as_deref(), Some("r1"));
    }

    #[test]
    fn resume_requires_run_id() {
        assert!(Args::try_parse_from(["taskmux", "resume"]).is_err());
        let Commands::Resume(resume) = parse(&["resume", "--run-id", "r1", "--quiet"]).command
        else {
            panic!("expected resume");
        };
        assert_eq!(resume.run_id, "r1");
        assert!(resume.exec.quiet);
    }

    #[test]
    fn rejects_unknown_stream_format_and_zero_parallelism() {
        assert!(Args::try_parse_from(["taskmux", "run", "--stream-format", "xml"]).is_err());
        assert!(Args::try_parse_from(["taskmux", "run", "--max-parallel", "0"]).is_err());
    }

    #[test]
    fn runs_subcommands() {
        assert!(matches!(parse(&["runs", "list"]).command, Commands::Runs(RunsCommand::List)));
        assert!(matches!(
            parse(&["runs", "show", "abc"]).command,
            Commands::Runs(RunsCommand::Show { run_id }) if run_id == "abc"
        ));
        assert!(matches!(parse(&["runs", "purge"]).command, Commands::Runs(RunsCommand::Purge)));
    }
}
