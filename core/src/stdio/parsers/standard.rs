//! Standard task-block parser
//!
//! # Format
//!
//! ```text
//! ---TASK---
//! id: task1
//! backend: codex
//! workdir: /path
//! dependencies: task0
//! ---CONTENT---
//! Task content here
//! ---END---
//! ```
//!
//! Structural errors abort the parse. Field errors are collected per block and
//! batch-level checks (duplicate ids, unknown dependencies) only run once
//! every block parsed cleanly.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use crate::error::stdio::{ErrorCode, StdioError};
use crate::stdio::id_gen::generate_task_id;
use crate::stdio::protocol::{FormatIssue, FormatValidation, ParseContext, StdioProtocolParser};
use crate::stdio::retry::MAX_RETRY;
use crate::stdio::types::{FilesEncoding, FilesMode, StdioTask};

const TASK_MARKER: &str = "---TASK---";
const CONTENT_MARKER: &str = "---CONTENT---";
const END_MARKER: &str = "---END---";

const KNOWN_KEYS: &[&str] = &[
    "id",
    "backend",
    "workdir",
    "dependencies",
    "files",
    "files-mode",
    "files-encoding",
    "timeout",
    "retry",
    "model",
    "model-provider",
];

const RESERVED_IDS: &[&str] = &[
    "_root", "_start", "_end", "_all", "_none", "_self", "_parent",
];

/// Default parser for task batches.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardStdioParser;

impl StdioProtocolParser for StandardStdioParser {
    fn name(&self) -> &str {
        "standard"
    }

    fn parse_tasks_with(
        &self,
        input: &str,
        ctx: &ParseContext,
    ) -> Result<Vec<StdioTask>, StdioError> {
        let blocks = scan_blocks(input)?;

        let mut errors = Vec::new();
        let mut tasks = Vec::with_capacity(blocks.len());
        for block in &blocks {
            if let Some(task) = build_task(block, &mut errors) {
                tasks.push(task);
            }
        }

        if errors.is_empty() {
            validate_batch(&tasks, ctx, &mut errors);
        }

        match StdioError::from_collected(errors) {
            Some(err) => Err(err),
            None => Ok(tasks),
        }
    }

    fn validate_format(&self, input: &str) -> FormatValidation {
        let mut report = FormatValidation::default();

        let blocks = match scan_blocks(input) {
            Ok(blocks) => blocks,
            Err(err) => {
                report.errors.push(FormatIssue::from_error(error_line(&err), &err));
                return report;
            }
        };
        report.task_count = blocks.len();

        for block in &blocks {
            if !block.metadata.contains_key("id") {
                report.warnings.push(FormatIssue::new(
                    Some(block.start_line),
                    ErrorCode::ValidationError,
                    "task has no id; one will be generated",
                ));
            }
            for (key, line) in &block.unknown_keys {
                report.warnings.push(FormatIssue::new(
                    Some(*line),
                    ErrorCode::ValidationError,
                    format!("unknown metadata key '{key}' is ignored"),
                ));
            }
        }

        if let Err(err) = self.parse_tasks(input) {
            for e in err.errors() {
                report.errors.push(FormatIssue::from_error(error_line(e), e));
            }
        }

        report
    }

    fn format_identifier(&self) -> &str {
        TASK_MARKER
    }
}

/// One `---TASK--- ... ---END---` block before field interpretation.
#[derive(Debug)]
struct RawBlock {
    index: usize,
    start_line: usize,
    metadata: HashMap<String, String>,
    unknown_keys: Vec<(String, usize)>,
    content: String,
}

enum ScanState {
    Outside,
    Metadata,
    Content,
}

fn scan_blocks(input: &str) -> Result<Vec<RawBlock>, StdioError> {
    let mut blocks = Vec::new();
    let mut state = ScanState::Outside;
    let mut current: Option<RawBlock> = None;
    let mut content_lines: Vec<&str> = Vec::new();

    for (idx, line) in input.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim();

        match state {
            ScanState::Outside => {
                if trimmed == TASK_MARKER {
                    current = Some(RawBlock {
                        index: blocks.len() + 1,
                        start_line: line_no,
                        metadata: HashMap::new(),
                        unknown_keys: Vec::new(),
                        content: String::new(),
                    });
                    state = ScanState::Metadata;
                }
            }
            ScanState::Metadata => {
                let Some(block) = current.as_mut() else {
                    state = ScanState::Outside;
                    continue;
                };
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    continue;
                }
                if trimmed == CONTENT_MARKER {
                    state = ScanState::Content;
                    content_lines.clear();
                    continue;
                }
                if trimmed == TASK_MARKER || trimmed == END_MARKER {
                    return Err(StdioError::MissingContentMarker(block.start_line));
                }
                let Some((k, v)) = trimmed.split_once(':') else {
                    return Err(StdioError::InvalidMetadataLine {
                        line: line_no,
                        text: trimmed.to_string(),
                    });
                };
                let key = normalize_key(k);
                if key.is_empty() {
                    return Err(StdioError::InvalidMetadataLine {
                        line: line_no,
                        text: trimmed.to_string(),
                    });
                }
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    block.unknown_keys.push((key.clone(), line_no));
                }
                block.metadata.insert(key, v.trim().to_string());
            }
            ScanState::Content => {
                if trimmed == END_MARKER {
                    if let Some(mut block) = current.take() {
                        block.content = content_lines.join("\n");
                        blocks.push(block);
                    }
                    state = ScanState::Outside;
                } else {
                    content_lines.push(line);
                }
            }
        }
    }

    match (state, current) {
        (ScanState::Metadata, Some(block)) => {
            Err(StdioError::MissingContentMarker(block.start_line))
        }
        (ScanState::Content, Some(block)) => Err(StdioError::MissingEndMarker(block.start_line)),
        _ if blocks.is_empty() => Err(StdioError::NoTasks),
        _ => Ok(blocks),
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace('_', "-")
}

fn build_task(block: &RawBlock, errors: &mut Vec<StdioError>) -> Option<StdioTask> {
    let before = errors.len();
    let get = |key: &str| {
        block
            .metadata
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    };

    let id = get("id").map(str::to_string).unwrap_or_else(generate_task_id);
    if let Err(e) = validate_id(&id) {
        errors.push(e);
    }

    let backend = required(get("backend"), block.index, "backend", errors);
    let workdir = required(get("workdir"), block.index, "workdir", errors);

    let timeout = match parse_u64(get("timeout"), "timeout") {
        Ok(Some(0)) => {
            errors.push(StdioError::InvalidNumber {
                field: "timeout",
                value: "0".to_string(),
            });
            None
        }
        Ok(v) => v,
        Err(e) => {
            errors.push(e);
            None
        }
    };
    let retry = match parse_u32(get("retry"), "retry") {
        Ok(Some(n)) if n > MAX_RETRY => {
            errors.push(StdioError::InvalidNumber {
                field: "retry",
                value: n.to_string(),
            });
            None
        }
        Ok(v) => v,
        Err(e) => {
            errors.push(e);
            None
        }
    };
    let files_mode = parse_files_mode(get("files-mode")).unwrap_or_else(|e| {
        errors.push(e);
        FilesMode::Auto
    });
    let files_encoding = parse_files_encoding(get("files-encoding")).unwrap_or_else(|e| {
        errors.push(e);
        FilesEncoding::Auto
    });

    if errors.len() > before {
        return None;
    }

    Some(StdioTask {
        id,
        backend: backend?,
        workdir: workdir?,
        model: get("model").map(str::to_string),
        model_provider: get("model-provider").map(str::to_string),
        dependencies: dedup(split_csv(get("dependencies").unwrap_or_default())),
        timeout,
        retry,
        files: split_csv(get("files").unwrap_or_default()),
        files_mode,
        files_encoding,
        content: block.content.clone(),
    })
}

fn required(
    value: Option<&str>,
    block: usize,
    field: &'static str,
    errors: &mut Vec<StdioError>,
) -> Option<String> {
    match value {
        Some(v) => Some(v.to_string()),
        None => {
            errors.push(StdioError::MissingField { block, field });
            None
        }
    }
}

fn validate_batch(tasks: &[StdioTask], ctx: &ParseContext, errors: &mut Vec<StdioError>) {
    let mut seen: HashSet<&str> = HashSet::new();
    for task in tasks {
        if ctx.known_ids.contains(&task.id) || !seen.insert(task.id.as_str()) {
            errors.push(StdioError::DuplicateId(task.id.clone()));
        }
    }

    for task in tasks {
        for dep in &task.dependencies {
            if !seen.contains(dep.as_str()) && !ctx.known_ids.contains(dep) {
                errors.push(StdioError::UnknownDependency {
                    task: task.id.clone(),
                    dep: dep.clone(),
                });
            }
        }
    }
}

/// Checks the id syntax and the reserved names.
pub fn validate_id(id: &str) -> Result<(), StdioError> {
    static ID_RE: OnceLock<Regex> = OnceLock::new();
    let re = ID_RE.get_or_init(|| {
        Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_\-\.]{0,127}$").expect("static id pattern")
    });

    if !re.is_match(id) || RESERVED_IDS.contains(&id) || id.starts_with("__") {
        return Err(StdioError::InvalidId(id.to_string()));
    }
    Ok(())
}

fn error_line(err: &StdioError) -> Option<usize> {
    match err {
        StdioError::InvalidMetadataLine { line, .. } => Some(*line),
        StdioError::MissingContentMarker(line) | StdioError::MissingEndMarker(line) => Some(*line),
        _ => None,
    }
}

fn split_csv(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn dedup(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

fn parse_u64(value: Option<&str>, field: &'static str) -> Result<Option<u64>, StdioError> {
    match value {
        None => Ok(None),
        Some(v) => v
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| StdioError::InvalidNumber {
                field,
                value: v.to_string(),
            }),
    }
}

fn parse_u32(value: Option<&str>, field: &'static str) -> Result<Option<u32>, StdioError> {
    match value {
        None => Ok(None),
        Some(v) => v
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| StdioError::InvalidNumber {
                field,
                value: v.to_string(),
            }),
    }
}

fn parse_files_mode(v: Option<&str>) -> Result<FilesMode, StdioError> {
    match v.map(str::to_lowercase).as_deref() {
        None | Some("auto") => Ok(FilesMode::Auto),
        Some("embed") => Ok(FilesMode::Embed),
        Some("ref") => Ok(FilesMode::Ref),
        Some(other) => Err(StdioError::InvalidValue {
            field: "files-mode",
            value: other.to_string(),
        }),
    }
}

fn parse_files_encoding(v: Option<&str>) -> Result<FilesEncoding, StdioError> {
    match v.map(str::to_lowercase).as_deref() {
        None | Some("auto") => Ok(FilesEncoding::Auto),
        Some("utf-8") | Some("utf8") => Ok(FilesEncoding::Utf8),
        Some("base64") => Ok(FilesEncoding::Base64),
        Some(other) => Err(StdioError::InvalidValue {
            field: "files-encoding",
            value: other.to_string(),
        }),
    }
}
