//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async code in the control crates MUST NOT use blocking I/O.
//! **Required**: `reqwest` async clients, `tokio::io` for the console,
//! `tokio::fs` where files are touched at runtime.
//!
//! Plain functions that run before the loop starts (configuration loading)
//! may read files synchronously.

use architectural_enforcement::{code_part, is_in_async_function, is_in_non_async_function, production_sources};

/// Test that production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_production_code() {
    let violations = find_blocking_io_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {}", violation);
        }

        eprintln!("\n❌ FORBIDDEN blocking I/O:");
        eprintln!("  - std::fs in async functions");
        eprintln!("  - std::net::TcpStream, std::net::TcpListener");
        eprintln!("  - std::process::Command");
        eprintln!("  - reqwest::blocking::*");
        eprintln!("  - std::io::stdin() / std::io::stdout() in async functions");
        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - reqwest::Client with .await");
        eprintln!("  - tokio::io::stdin() with AsyncBufReadExt");
        eprintln!("  - tokio::fs::read_to_string().await");
        eprintln!("\n✅ ACCEPTABLE blocking I/O:");
        eprintln!("  - Non-async functions (configuration loading before the loop starts)");
        eprintln!("  - Test code");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

fn find_blocking_io_violations() -> Vec<String> {
    let mut violations = Vec::new();

    for file in production_sources() {
        let lines = file.line_refs();

        for (idx, line) in lines.iter().enumerate() {
            let code = code_part(line);

            if code.contains("reqwest::blocking") {
                violations.push(file.violation(idx, "Blocking HTTP client"));
            }

            if code.contains("std::net::") || code.contains("use std::net") {
                violations.push(file.violation(idx, "Blocking network I/O"));
            }

            if code.contains("std::process::Command") {
                violations.push(file.violation(idx, "Blocking process I/O"));
            }

            if (code.contains("std::fs::") || code.contains("use std::fs"))
                && !is_in_non_async_function(&lines, idx)
            {
                violations.push(file.violation(idx, "Blocking file I/O"));
            }

            if (code.contains("std::io::stdin()") || code.contains("std::io::stdout()"))
                && is_in_async_function(&lines, idx)
            {
                violations.push(file.violation(idx, "Blocking stdin/stdout in async"));
            }
        }
    }

    violations
}
