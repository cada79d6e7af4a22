//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Production code in the core and daemon MUST NOT use blocking
//! I/O. Every remote-call boundary and file access runs on the async
//! runtime; a single blocking call can stall every in-flight turn sharing
//! the worker thread.
//!
//! **Required**: `tokio::fs`, `tokio::net`, async `reqwest`, not
//! `std::fs` reads/writes, `std::net`, or `reqwest::blocking`.

use std::fs;
use std::path::{Path, PathBuf};

/// Source directories holding production code
const PRODUCTION_DIRS: &[&str] = &["parley/core/src", "parley/daemon/src"];

/// Call patterns that indicate blocking I/O
const FORBIDDEN_PATTERNS: &[&str] = &[
    "std::fs::read",
    "std::fs::write",
    "std::fs::File",
    "std::fs::remove",
    "std::fs::create_dir",
    "std::fs::set_permissions",
    "std::net::TcpStream",
    "std::net::TcpListener",
    "std::net::UnixStream",
    "std::net::UnixListener",
    "reqwest::blocking",
];

/// Test that production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_production_code() {
    let violations = find_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ Blocking I/O calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - tokio::fs::read().await, tokio::fs::write().await");
        eprintln!("  - tokio::net::UnixListener::bind()");
        eprintln!("  - async reqwest");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.",
            violations.len()
        );
    }
}

fn workspace_root() -> PathBuf {
    // tests/architectural-enforcement -> workspace root
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

fn find_violations() -> Vec<String> {
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

    violations
}

fn check_file(path: &Path, violations: &mut Vec<String>) {
    let Ok(content) = fs::read_to_string(path) else {
        return;
    };

    let mut in_test_module = false;

    for (line_number, line) in content.lines().enumerate() {
        if line.contains("#[cfg(test)]") {
            // Everything after the test-module marker in these single
            // test-module-per-file sources is test code.
            in_test_module = true;
        }
        if in_test_module {
            continue;
        }

        let trimmed = line.trim_start();
        if trimmed.starts_with("//") {
            continue;
        }

        for pattern in FORBIDDEN_PATTERNS {
            if trimmed.contains(pattern) {
                violations.push(format!(
                    "{}:{}: `{}`",
                    path.display(),
                    line_number + 1,
                    trimmed
                ));
            }
        }
    }
}
