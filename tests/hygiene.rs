//! Hygiene — enforces coding standards at test time
//!
//! These tests scan the boardsync source tree for antipatterns. Each has a
//! budget (zero). Sync tiers swallow failures on purpose, so every swallowed
//! error must be logged, never discarded with `let _ =` or `.ok()`.

use std::fs;
use std::path::{Path, PathBuf};

struct SourceFile {
    path: PathBuf,
    content: String,
}

/// Production `.rs` files under `src/`, excluding `*_test.rs`.
fn source_files() -> Vec<SourceFile> {
    let mut files = Vec::new();
    collect_rs_files(Path::new("src"), &mut files);
    files.retain(|f| !f.path.to_string_lossy().ends_with("_test.rs"));
    files
}

fn collect_rs_files(dir: &Path, out: &mut Vec<SourceFile>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rs_files(&path, out);
        } else if path.extension().is_some_and(|e| e == "rs") {
            if let Ok(content) = fs::read_to_string(&path) {
                out.push(SourceFile { path, content });
            }
        }
    }
}

fn hits(files: &[SourceFile], pattern: &str) -> Vec<String> {
    files
        .iter()
        .flat_map(|file| {
            file.content
                .lines()
                .enumerate()
                .filter(|(_, line)| line.contains(pattern))
                .map(|(n, line)| format!("  {}:{}: {}", file.path.display(), n + 1, line.trim()))
                .collect::<Vec<_>>()
        })
        .collect()
}

fn assert_budget(pattern: &str, max: usize) {
    let found = hits(&source_files(), pattern);
    assert!(
        found.len() <= max,
        "`{pattern}` budget exceeded: found {}, max {max}.\n{}",
        found.len(),
        found.join("\n")
    );
}

// Panics: these crash the sync loop of every client sharing the process.

#[test]
fn unwrap_budget() {
    assert_budget(".unwrap()", 0);
}

#[test]
fn expect_budget() {
    assert_budget(".expect(", 0);
}

#[test]
fn panic_budget() {
    assert_budget("panic!(", 0);
}

#[test]
fn unreachable_budget() {
    assert_budget("unreachable!(", 0);
}

#[test]
fn todo_budget() {
    assert_budget("todo!(", 0);
    assert_budget("unimplemented!(", 0);
}

// Silent loss: discards errors without logging them.

#[test]
fn silent_discard_budget() {
    assert_budget("let _ =", 0);
}

#[test]
fn dot_ok_budget() {
    assert_budget(".ok()", 0);
}

#[test]
fn allow_dead_code_budget() {
    assert_budget("#[allow(dead_code)]", 0);
}

// Layout: every `#[path = "..._test.rs"]` points at a sibling that exists.

#[test]
fn test_modules_exist() {
    let mut missing = Vec::new();
    for file in source_files() {
        let dir = file.path.parent().unwrap_or(Path::new("src"));
        for line in file.content.lines() {
            let Some(rest) = line.trim().strip_prefix("#[path = \"") else {
                continue;
            };
            let Some((target, _)) = rest.split_once('"') else {
                continue;
            };
            if !dir.join(target).is_file() {
                missing.push(format!("  {}: {target}", file.path.display()));
            }
        }
    }
    assert!(missing.is_empty(), "missing test modules:\n{}", missing.join("\n"));
}
