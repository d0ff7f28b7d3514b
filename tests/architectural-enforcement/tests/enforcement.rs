//! Workspace-wide architecture rules

use architectural_enforcement::{find_violations, production_sources, workspace_root, Violation};

fn report(rule: &str, violations: &[Violation]) -> String {
    let lines: Vec<String> = violations.iter().map(ToString::to_string).collect();
    format!("{rule}:\n  {}", lines.join("\n  "))
}

#[test]
fn test_sources_are_found() {
    let files = production_sources(&workspace_root());
    assert!(
        files.iter().any(|p| p.ends_with("context.rs")),
        "expected dispatch/core/src/context.rs among {files:?}"
    );
}

#[test]
fn test_no_blocking_sleep() {
    let violations = find_violations(&workspace_root(), &["thread::sleep"], &[]);
    assert!(
        violations.is_empty(),
        "{}",
        report("blocking sleep in async code", &violations)
    );
}

#[test]
fn test_timers_only_where_cancellation_is_handled() {
    // Everything else sleeps through CallContext so cancellation is honoured
    let violations = find_violations(
        &workspace_root(),
        &["time::sleep", "sleep_until"],
        &["core/src/context.rs", "core/src/routing/admission.rs"],
    );
    assert!(
        violations.is_empty(),
        "{}",
        report("raw tokio timer outside CallContext", &violations)
    );
}

#[test]
fn test_no_unwrap_in_library_code() {
    let violations = find_violations(&workspace_root(), &[".unwrap()", ".expect("], &[]);
    assert!(
        violations.is_empty(),
        "{}",
        report("unwrap/expect in library code", &violations)
    );
}
