//! Architectural Enforcement
//!
//! Source scanners shared by the integration tests in `tests/`. Each test
//! walks the production sources of the control crates and reports lines that
//! break a rule of the async runtime:
//!
//! - `sleep_prohibition`: no sleeping outside retry backoff
//! - `blocking_io_prohibition`: no blocking I/O inside async code
//!
//! The scan is line based. Everything from the first `#[cfg(test)]` onward is
//! treated as test code and skipped, so unit test modules must stay at the
//! bottom of their file.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["control/core/src", "control/daemon/src"];

/// Workspace root (two levels above this crate)
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// A Rust source file with its production lines
#[derive(Debug)]
pub struct SourceFile {
    /// Path as reported in violations
    pub path: PathBuf,
    /// Lines before the first `#[cfg(test)]`
    pub lines: Vec<String>,
}

impl SourceFile {
    /// Parse `content` read from `path`
    pub fn from_content(path: impl Into<PathBuf>, content: &str) -> Self {
        let lines = content
            .lines()
            .take_while(|line| !line.trim_start().starts_with("#[cfg(test)]"))
            .map(str::to_string)
            .collect();
        Self {
            path: path.into(),
            lines,
        }
    }

    /// Borrowed view of the lines for the context helpers
    pub fn line_refs(&self) -> Vec<&str> {
        self.lines.iter().map(String::as_str).collect()
    }

    /// Format a violation at 0-based line `idx`
    pub fn violation(&self, idx: usize, what: &str) -> String {
        format!(
            "{}:{} - {}: {}",
            self.path.display(),
            idx + 1,
            what,
            self.lines[idx].trim()
        )
    }
}

/// Every `.rs` file under the production directories
///
/// Missing directories are skipped.
pub fn production_sources() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }

        for entry in walkdir::WalkDir::new(&path)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            if let Ok(content) = fs::read_to_string(entry.path()) {
                let shown = entry
                    .path()
                    .strip_prefix(&root)
                    .unwrap_or(entry.path())
                    .to_path_buf();
                files.push(SourceFile::from_content(shown, &content));
            }
        }
    }

    files
}

/// The part of a line before any `//` comment
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Check if this sleep is part of a retry backoff
///
/// Needs both a doubling calculation and retry wording within a few lines.
pub fn is_backoff_context(lines: &[&str], current_idx: usize) -> bool {
    let start = current_idx.saturating_sub(15);
    let end = std::cmp::min(current_idx + 5, lines.len());

    let mut has_backoff_calc = false;
    let mut has_retry_context = false;

    for line in &lines[start..end] {
        let line = line.to_lowercase();

        if line.contains("<<") || line.contains("pow") || line.contains("* 2") {
            has_backoff_calc = true;
        }

        if line.contains("retry") || line.contains("backoff") || line.contains("attempt") {
            has_retry_context = true;
        }
    }

    has_backoff_calc && has_retry_context
}

/// Check if line is inside an async function
pub fn is_in_async_function(lines: &[&str], current_idx: usize) -> bool {
    enclosing_fn(lines, current_idx).is_some_and(|line| line.contains("async fn "))
}

/// Check if line is inside a plain (non-async) function
pub fn is_in_non_async_function(lines: &[&str], current_idx: usize) -> bool {
    enclosing_fn(lines, current_idx).is_some_and(|line| !line.contains("async fn "))
}

/// Nearest function signature above `current_idx`
///
/// Stops at module and impl boundaries.
fn enclosing_fn<'a>(lines: &[&'a str], current_idx: usize) -> Option<&'a str> {
    for line in lines[..current_idx].iter().rev() {
        let trimmed = code_part(line).trim();

        if trimmed.starts_with("fn ") || trimmed.contains(" fn ") {
            return Some(trimmed);
        }

        if trimmed.starts_with("mod ") || (trimmed.starts_with("impl") && trimmed.contains('{')) {
            return None;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_stops_at_test_module() {
        let file = SourceFile::from_content(
            "x.rs",
            "fn real() {}\n\n#[cfg(test)]\nmod tests {\n    fn helper() {}\n}\n",
        );
        assert_eq!(file.lines.len(), 2);
        assert_eq!(file.violation(0, "Example"), "x.rs:1 - Example: fn real() {}");
    }

    #[test]
    fn test_backoff_detection() {
        let code = vec![
            "pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {",
            "    base.saturating_mul(1u32 << attempt)",
            "}",
            "pub(crate) async fn backoff(base: Duration, attempt: u32) {",
            "    tokio::time::sleep(backoff_delay(base, attempt)).await;",
            "}",
        ];
        assert!(is_backoff_context(&code, 4), "Should detect exponential backoff pattern");
    }

    #[test]
    fn test_plain_sleep_is_not_backoff() {
        let code = vec![
            "async fn poll_forever() {",
            "    loop {",
            "        tokio::time::sleep(Duration::from_secs(5)).await;",
            "    }",
            "}",
        ];
        assert!(!is_backoff_context(&code, 2));
    }

    #[test]
    fn test_function_kind_detection() {
        let code = vec![
            "pub async fn load() {",
            "    let contents = std::fs::read_to_string(\"farm.toml\");",
            "}",
            "fn load_blocking(path: &Path) {",
            "    let contents = std::fs::read_to_string(path);",
            "}",
        ];
        assert!(is_in_async_function(&code, 1));
        assert!(!is_in_non_async_function(&code, 1));
        assert!(is_in_non_async_function(&code, 4));
        assert!(!is_in_async_function(&code, 4));
    }

    #[test]
    fn test_impl_boundary_stops_search() {
        let code = vec!["impl Farm {", "    const LIMIT: usize = 3;"];
        assert!(!is_in_async_function(&code, 1));
        assert!(!is_in_non_async_function(&code, 1));
    }
}
