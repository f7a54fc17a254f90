//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the control crates MUST NOT sleep to wait
//! for work. Periodic work uses `tokio::time::interval`, deadlines use
//! `tokio::time::timeout`, and events arrive on channels.
//!
//! **Allowed**: exponential backoff between retries, and test code.

use architectural_enforcement::{code_part, is_backoff_context, production_sources};

/// Test that production code only sleeps for retry backoff
#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {}", violation);
        }

        eprintln!("\n✅ REQUIRED alternatives:");
        eprintln!("  - tokio::time::interval for polling");
        eprintln!("  - tokio::time::timeout for deadlines");
        eprintln!("  - mpsc/oneshot channels for waiting on results");
        eprintln!("\n✅ ACCEPTABLE sleep:");
        eprintln!("  - Exponential backoff between retry attempts");
        eprintln!("  - Test code");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Blocking thread sleeps are never acceptable, backoff or not
#[test]
fn test_no_thread_sleep_in_production_code() {
    let mut violations = Vec::new();

    for file in production_sources() {
        for (idx, line) in file.lines.iter().enumerate() {
            if code_part(line).contains("thread::sleep") {
                violations.push(file.violation(idx, "Blocking thread sleep"));
            }
        }
    }

    assert!(
        violations.is_empty(),
        "std::thread::sleep blocks a runtime worker:\n{}",
        violations.join("\n")
    );
}

/// The control crates are scanned at all
#[test]
fn test_production_sources_found() {
    let files = production_sources();
    assert!(
        files.iter().any(|f| f.path.ends_with("control/core/src/reconcile.rs")),
        "control core sources not found; scanned {} files",
        files.len()
    );
    assert!(files.iter().any(|f| f.path.ends_with("control/daemon/src/main.rs")));
}

fn find_sleep_violations() -> Vec<String> {
    let mut violations = Vec::new();

    for file in production_sources() {
        let lines = file.line_refs();

        for (idx, line) in lines.iter().enumerate() {
            let code = code_part(line);
            if !(code.contains("::sleep(") || code.contains(".sleep(")) {
                continue;
            }

            if is_backoff_context(&lines, idx) {
                continue;
            }

            violations.push(file.violation(idx, "Sleep outside retry backoff"));
        }
    }

    violations
}
