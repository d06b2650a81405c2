use super::parsers::StandardStdioParser;
use super::protocol::{ParseContext, StdioProtocolParser};
use super::types::StdioTask;
use crate::error::stdio::StdioError;

/// Parses a task batch with the standard parser.
///
/// ```rust,ignore
/// use taskmux_core::stdio::parse_stdio_tasks;
///
/// let input = "---TASK---\nid: a\nbackend: codex\nworkdir: .\n---CONTENT---\nhi\n---END---\n";
/// let tasks = parse_stdio_tasks(input)?;
/// assert_eq!(tasks.len(), 1);
/// ```
pub fn parse_stdio_tasks(input: &str) -> Result<Vec<StdioTask>, StdioError> {
    StandardStdioParser.parse_tasks(input)
}

/// Parses a batch whose dependencies may point at ids of a prior run.
pub fn parse_stdio_tasks_with(
    input: &str,
    ctx: &ParseContext,
) -> Result<Vec<StdioTask>, StdioError> {
    StandardStdioParser.parse_tasks_with(input, ctx)
}
