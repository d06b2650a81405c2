pub mod files;
mod id_gen;
mod parser;
pub mod parsers;
pub mod protocol;
mod retry;
mod types;

pub use crate::error::stdio::{ErrorCode, StdioError};
pub use files::{FileLoader, ResolvedContent, ResolvedContext, ResolvedFile};
pub use id_gen::{generate_run_id, generate_task_id};
pub use parser::{parse_stdio_tasks, parse_stdio_tasks_with};
pub use parsers::{validate_id, StandardStdioParser};
pub use protocol::{FormatIssue, FormatValidation, ParseContext, StdioProtocolParser};
pub use retry::{
    effective_timeout_secs, max_rounds, DEFAULT_TIMEOUT_SECS, MAX_RETRY, MAX_TIMEOUT_SECS,
};
pub use types::{FilesEncoding, FilesMode, StdioTask};
