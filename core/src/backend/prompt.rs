use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stdio::{FilesMode, ResolvedContent, ResolvedFile};

/// Output of a succeeded dependency, handed to its dependents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyOutput {
    pub task_id: String,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation: Option<Value>,
    /// Set when the dependency belongs to the run being resumed.
    #[serde(default)]
    pub from_prior_run: bool,
}

/// Renders task content, dependency outputs and files into one prompt.
///
/// Embedded binary content is written as `base64:<decoded len>:<data>` so it
/// can never be mistaken for text.
pub fn compose_prompt(
    content: &str,
    dependencies: &[DependencyOutput],
    files: &[ResolvedFile],
) -> String {
    if dependencies.is_empty() && files.is_empty() {
        return content.to_string();
    }

    let mut capacity = content.len() + 64;
    for dep in dependencies {
        capacity += dep.task_id.len() + dep.output.len() + 48;
    }
    for file in files {
        capacity += file.path.len() + 96;
        capacity += match &file.content {
            Some(ResolvedContent::Text(text)) => text.len(),
            Some(ResolvedContent::Base64 { data, .. }) => data.len() + 24,
            None => 0,
        };
    }

    let mut prompt = String::with_capacity(capacity);
    prompt.push_str(content);

    for dep in dependencies {
        prompt.push_str("\n\n---DEPENDENCY: ");
        prompt.push_str(&dep.task_id);
        if dep.from_prior_run {
            prompt.push_str(" (prior run)");
        }
        prompt.push_str("---\n");
        prompt.push_str(&dep.output);
    }

    for file in files {
        prompt.push_str("\n\n---FILE: ");
        prompt.push_str(&file.path);
        prompt.push_str("---\n");
        prompt.push_str(&format!(
            "size: {} bytes, encoding: {}\n",
            file.size,
            file.encoding.as_str()
        ));
        match (file.mode, &file.content) {
            (FilesMode::Embed, Some(ResolvedContent::Text(text))) => prompt.push_str(text),
            (FilesMode::Embed, Some(ResolvedContent::Base64 { len, data })) => {
                prompt.push_str(&format!("base64:{len}:{data}"));
            }
            _ => prompt.push_str("[reference only, content not embedded]"),
        }
    }

    prompt
}
