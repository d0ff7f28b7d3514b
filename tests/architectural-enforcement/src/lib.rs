//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! across the `dispatch/*` crates:
//! - No blocking sleeps in production code
//! - Timers only where cancellation is handled
//! - No `unwrap()`/`expect()` outside tests
//!
//! Production code is everything in `src/` before the first `#[cfg(test)]`.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// A pattern found where it is not allowed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the match, relative to the workspace root
    pub file: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The offending line, trimmed
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.file.display(), self.line, self.text)
    }
}

/// Workspace root, two levels above this crate
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// Every `.rs` file under `dispatch/*/src`
pub fn production_sources(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root.join("dispatch"))
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|p| p.extension().is_some_and(|ext| ext == "rs"))
        .filter(|p| p.components().any(|c| c.as_os_str() == "src"))
        .collect();
    files.sort();
    files
}

/// Lines before the first `#[cfg(test)]`, numbered from 1
pub fn production_lines(source: &str) -> impl Iterator<Item = (usize, &str)> {
    source
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(|(i, line)| (i + 1, line))
}

fn is_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("//")
}

/// Occurrences of any of `patterns` in production code, skipping files whose
/// path ends with one of `allowed`
pub fn find_violations(root: &Path, patterns: &[&str], allowed: &[&str]) -> Vec<Violation> {
    let mut violations = Vec::new();
    for path in production_sources(root) {
        let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        let relative_str = relative.to_string_lossy().replace('\\', "/");
        if allowed.iter().any(|a| relative_str.ends_with(a)) {
            continue;
        }
        let Ok(source) = fs::read_to_string(&path) else {
            continue;
        };
        for (line_no, line) in production_lines(&source) {
            if is_comment(line) {
                continue;
            }
            if patterns.iter().any(|p| line.contains(p)) {
                violations.push(Violation {
                    file: relative.clone(),
                    line: line_no,
                    text: line.trim().to_string(),
                });
            }
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let source = "fn a() {}\n// note\n#[cfg(test)]\nmod tests { fn b() { x.unwrap(); } }\n";
        let lines: Vec<(usize, &str)> = production_lines(source).collect();
        assert_eq!(lines, vec![(1, "fn a() {}"), (2, "// note")]);
    }

    #[test]
    fn test_comments_are_not_code() {
        assert!(is_comment("    /// calls .unwrap() internally"));
        assert!(!is_comment("    let x = y.unwrap();"));
    }
}
