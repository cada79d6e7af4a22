//! Integration Test: Thread Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT call `std::thread::sleep`. A thread
//! sleep on an async worker blocks every task scheduled on it; waiting is
//! always expressed through the runtime (`tokio::time`) or, better, by
//! awaiting the event being waited for.

use std::fs;
use std::path::{Path, PathBuf};

/// Source directories holding production code
const PRODUCTION_DIRS: &[&str] = &["parley/core/src", "parley/daemon/src"];

/// Test that production code never sleeps a thread
#[test]
fn test_no_thread_sleep_in_production_code() {
    let root = workspace_root();
    let mut violations = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        assert!(
            path.exists(),
            "production source dir {} is missing",
            path.display()
        );

        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                check_file(entry.path(), &mut violations);
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\n❌ Thread sleeps found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        panic!(
            "\nFound {} thread sleep(s) in production code.",
            violations.len()
        );
    }
}

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

fn check_file(path: &Path, violations: &mut Vec<String>) {
    let Ok(content) = fs::read_to_string(path) else {
        return;
    };

    let mut in_test_module = false;

    for (line_number, line) in content.lines().enumerate() {
        if line.contains("#[cfg(test)]") {
            in_test_module = true;
        }
        if in_test_module {
            continue;
        }

        let trimmed = line.trim_start();
        if trimmed.starts_with("//") {
            continue;
        }

        if trimmed.contains("thread::sleep") {
            violations.push(format!(
                "{}:{}: `{}`",
                path.display(),
                line_number + 1,
                trimmed
            ));
        }
    }
}
