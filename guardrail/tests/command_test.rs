//! Command whitelist and shell-free execution tests.

#![cfg(unix)]

use guardrail::utils::logging::init_test_logging;
use guardrail::{
    CommandError, CommandSanitizer, CommandWhitelist, ExecOptions, RecordingAuditSink,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn exec_sanitizer() -> CommandSanitizer {
    let whitelist = CommandWhitelist::builder()
        .allow("echo")
        .allow("sleep")
        .allow("pwd")
        .allow("false")
        .build()
        .unwrap();
    // Metacharacter arguments are part of what these tests exercise.
    CommandSanitizer::new(whitelist).with_strict_mode(false)
}

#[tokio::test]
async fn metacharacter_argument_is_passed_literally_not_interpreted() {
    init_test_logging();
    let s = exec_sanitizer();

    // Under a shell this would run a second command. Here it must come back
    // verbatim as a single echoed argument.
    let result = s
        .execute_command("echo", &args(&["; rm -rf /"]), ExecOptions::default())
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.stdout.trim_end(), "; rm -rf /");
}

#[tokio::test]
async fn non_whitelisted_command_never_spawns() {
    init_test_logging();
    let s = exec_sanitizer();

    let err = s
        .execute_command("rm", &args(&["-rf", "/"]), ExecOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::NotAllowed(_)));
}

#[tokio::test]
async fn timeout_kills_the_child_and_fails_closed() {
    init_test_logging();
    let s = exec_sanitizer();

    let options = ExecOptions {
        timeout: Some(Duration::from_millis(100)),
        ..Default::default()
    };
    let start = std::time::Instant::now();
    let err = s
        .execute_command("sleep", &args(&["30"]), options)
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::TimedOut { .. }));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn cancellation_kills_the_child() {
    init_test_logging();
    let s = exec_sanitizer();

    let token = CancellationToken::new();
    let options = ExecOptions {
        cancellation: Some(token.clone()),
        ..Default::default()
    };
    let cancel = tokio::spawn({
        let token = token.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        }
    });

    let err = s
        .execute_command("sleep", &args(&["30"]), options)
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::Cancelled { .. }));
    cancel.await.unwrap();
}

#[tokio::test]
async fn cwd_option_controls_the_child_working_directory() {
    init_test_logging();
    let s = exec_sanitizer();
    let temp = TempDir::new().unwrap();
    let canonical = std::fs::canonicalize(temp.path()).unwrap();

    let options = ExecOptions {
        cwd: Some(canonical.clone()),
        ..Default::default()
    };
    let result = s.execute_command("pwd", &[], options).await.unwrap();
    assert_eq!(result.stdout.trim_end(), canonical.to_string_lossy());
}

#[tokio::test]
async fn nonzero_exit_is_a_completed_failure_not_an_error() {
    init_test_logging();
    let s = exec_sanitizer();

    let result = s
        .execute_command("false", &[], ExecOptions::default())
        .await
        .unwrap();
    assert!(!result.success);
    assert_ne!(result.exit_code, 0);
}

#[test]
fn sync_execution_has_the_same_semantics() {
    init_test_logging();
    let s = exec_sanitizer();

    let result = s
        .execute_command_sync("echo", &args(&["hello"]), ExecOptions::default())
        .unwrap();
    assert!(result.success);
    assert_eq!(result.stdout.trim_end(), "hello");

    let options = ExecOptions {
        timeout: Some(Duration::from_millis(100)),
        ..Default::default()
    };
    let err = s
        .execute_command_sync("sleep", &args(&["30"]), options)
        .unwrap_err();
    assert!(matches!(err, CommandError::TimedOut { .. }));
}

#[tokio::test]
async fn executions_are_audited_with_outcome() {
    init_test_logging();
    let sink = Arc::new(RecordingAuditSink::new());
    let whitelist = CommandWhitelist::builder().allow("echo").build().unwrap();
    let s = CommandSanitizer::new(whitelist).with_audit(sink.clone());

    let _ = s
        .execute_command("echo", &args(&["ok"]), ExecOptions::default())
        .await
        .unwrap();
    let records = sink.records();
    assert!(records.iter().any(|r| matches!(
        r,
        guardrail::AuditRecord::Command { base, outcome, .. }
            if base == "echo" && *outcome == "succeeded"
    )));
}

#[test]
fn whitelist_loaded_from_directory_drives_validation() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("git.json"),
        r#"{"name": "git", "subcommands": ["status"], "timeout_seconds": 60}"#,
    )
    .unwrap();

    let whitelist = CommandWhitelist::load_from_dir(dir.path()).unwrap();
    assert!(whitelist.allows("git"));
    assert!(!whitelist.allows("rm"));

    let s = CommandSanitizer::new(whitelist);
    assert!(s.validate_command("git", &args(&["status"])).is_ok());
    assert!(s.validate_command("git", &args(&["push"])).is_err());
}
