pub mod cli;
pub mod run;
pub mod runs;
pub mod validate;

use std::io::Read;
use std::path::Path;

use taskmux_core::api::CliError;

/// Batch text from `path`, or all of stdin.
pub fn read_input(path: Option<&Path>) -> Result<String, CliError> {
    match path {
        Some(path) => std::fs::read_to_string(path).map_err(|e| {
            CliError::Command(format!("cannot read input {}: {e}", path.display()))
        }),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(CliError::Io)?;
            Ok(buf)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_batch_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.txt");
        std::fs::write(&path, "---TASK---\nid: a\n").unwrap();
        assert_eq!(read_input(Some(&path)).unwrap(), "---TASK---\nid: a\n");
    }

    #[test]
    fn missing_file_is_a_command_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_input(Some(&dir.path().join("nope.txt"))).unwrap_err();
        assert!(matches!(err, CliError::Command(msg) if msg.starts_with("cannot read input")));
    }
}
