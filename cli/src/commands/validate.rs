use taskmux_core::api::{
    CliError, FormatValidation, StandardStdioParser, StdioProtocolParser, TaskGraph,
};
use taskmux_core::stdio::FormatIssue;

use super::cli::ValidateArgs;
use super::read_input;

/// Checks a batch without running it: format, fields, then the graph.
/// Returns 0 when the batch would be accepted, else the first error code.
pub async fn handle_validate(args: ValidateArgs) -> Result<i32, CliError> {
    let input = read_input(args.input.as_deref())?;
    let (report, waves) = validate_batch(&input);

    for issue in &report.warnings {
        println!("warning{}", describe(issue));
    }
    for issue in &report.errors {
        println!("error{}", describe(issue));
    }

    match (report.errors.first(), waves) {
        (Some(first), _) => Ok(i32::from(first.code.as_u16())),
        (None, Some(waves)) => {
            println!("ok: {} task(s) in {} wave(s)", report.task_count, waves.len());
            for (i, wave) in waves.iter().enumerate() {
                println!("  wave {}: {}", i + 1, wave.join(", "));
            }
            Ok(0)
        }
        (None, None) => Ok(1),
    }
}

fn describe(issue: &FormatIssue) -> String {
    match issue.line {
        Some(line) => format!(" {} (line {line}): {}", issue.code.as_u16(), issue.message),
        None => format!(" {}: {}", issue.code.as_u16(), issue.message),
    }
}

/// Format report plus the waves when the batch is fully valid. Graph
/// problems are appended to the report as errors.
pub fn validate_batch(input: &str) -> (FormatValidation, Option<Vec<Vec<String>>>) {
    let parser = StandardStdioParser;
    let mut report = parser.validate_format(input);
    if !report.is_valid() {
        return (report, None);
    }
    let tasks = match parser.parse_tasks(input) {
        Ok(tasks) => tasks,
        Err(e) => {
            report.errors.push(FormatIssue::from_error(None, &e));
            return (report, None);
        }
    };

    let waves = TaskGraph::from_tasks(&tasks).and_then(|graph| {
        graph.validate()?;
        graph.waves()
    });
    match waves {
        Ok(waves) => (report, Some(waves)),
        Err(e) => {
            report
                .errors
                .push(FormatIssue::new(None, e.error_code(), e.to_string()));
            (report, None)
        }
    }
}
