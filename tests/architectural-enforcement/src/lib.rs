//! Architectural Enforcement Integration Tests
//!
//! Source-tree checks over the production code of the ports crates:
//! - No blocking sleeps, and timed waits only inside the timer module
//! - No `std::sync` locks where `parking_lot` or tokio primitives are used
//! - No `unwrap()`/`expect()` outside test code
//!
//! The checks are line based. Test code is recognised as files named
//! `tests.rs` and everything from a `#[cfg(test)] mod ...` to the end of a
//! file, which is where the crates keep their unit tests.

use std::fs;
use std::path::{Path, PathBuf};

/// One offending line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the line
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// Trimmed source line
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["ports/core/src", "ports/daemon/src"];

/// Workspace root, derived from this crate's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Production lines of every `.rs` file below `dir`
///
/// Comment lines and test code are left out.
#[must_use]
pub fn production_lines(dir: &Path) -> Vec<(PathBuf, usize, String)> {
    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
    {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("rs") {
            continue;
        }
        if path.file_name().and_then(|s| s.to_str()) == Some("tests.rs") {
            continue;
        }
        let Ok(content) = fs::read_to_string(path) else {
            continue;
        };
        for (idx, line) in strip_tests(&content) {
            out.push((path.to_path_buf(), idx + 1, line.to_string()));
        }
    }
    out
}

/// Lines before the trailing test module, without comment lines
fn strip_tests(content: &str) -> Vec<(usize, &str)> {
    let lines: Vec<&str> = content.lines().collect();
    let mut kept = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if trimmed == "#[cfg(test)]" {
            let next = lines[idx + 1..].iter().map(|l| l.trim()).find(|l| !l.is_empty());
            if next.is_some_and(is_mod_decl) {
                break;
            }
            continue;
        }
        if trimmed.starts_with("//") {
            continue;
        }
        kept.push((idx, *line));
    }
    kept
}

fn is_mod_decl(line: &str) -> bool {
    line.starts_with("mod ") || line.starts_with("pub(crate) mod ") || line.starts_with("pub mod ")
}

/// Every production line in `dirs` matching `pattern`, except in files
/// whose path ends with one of `allowed`
#[must_use]
pub fn find(dirs: &[&str], pattern: &str, allowed: &[&str]) -> Vec<Violation> {
    let root = workspace_root();
    let mut violations = Vec::new();
    for dir in dirs {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for (file, line, text) in production_lines(&path) {
            if allowed.iter().any(|a| file.ends_with(a)) {
                continue;
            }
            let code = text.split("//").next().unwrap_or(&text);
            if code.contains(pattern) {
                violations.push(Violation {
                    path: file,
                    line,
                    text: text.trim().to_string(),
                });
            }
        }
    }
    violations
}

/// Panic with a readable report when `violations` is not empty
pub fn report(rule: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n❌ {rule}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    panic!("\nFound {} violation(s): {rule}", violations.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_tests_stops_at_test_module() {
        let source = "use a;\n// note .unwrap()\nfn f() {}\n#[cfg(test)]\nuse b;\n#[cfg(test)]\nmod tests {\n    x.unwrap();\n}\n";
        let kept: Vec<&str> = strip_tests(source).into_iter().map(|(_, l)| l).collect();
        assert_eq!(kept, vec!["use a;", "fn f() {}", "use b;"]);
    }

    #[test]
    fn test_workspace_root_contains_ports() {
        assert!(workspace_root().join("ports/core/Cargo.toml").exists());
    }
}
