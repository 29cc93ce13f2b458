//! Audit sink contract and default implementations.
//!
//! Every rejection produced by this crate is reported to an [`AuditSink`]
//! synchronously, before the rejection is returned to the caller. The sink is
//! an explicit dependency passed in at validator construction rather than a
//! process-wide singleton, so tests construct a fresh validator with a
//! [`RecordingAuditSink`] instead of resetting global state.
//!
//! Sink methods are infallible by construction: an observability problem must
//! never suppress or convert a security decision.

use crate::constants::AUDIT_DETAIL_MAX_LEN;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

/// Outcome attached to a command-execution audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    Accepted,
    Rejected,
    Succeeded,
    Failed,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Accepted => "accepted",
            AuditOutcome::Rejected => "rejected",
            AuditOutcome::Succeeded => "succeeded",
            AuditOutcome::Failed => "failed",
        }
    }
}

/// Receives security decisions made by the validators.
///
/// Implementations must be cheap and non-blocking; they are invoked inline on
/// the validation path.
pub trait AuditSink: Send + Sync + fmt::Debug {
    /// Called for every rejected path or argument. `details` has already been
    /// scrubbed with [`scrub_for_audit`].
    fn log_security_violation(&self, event_type: &str, actor: &str, details: &str);

    /// Called for every command that was validated, rejected, or executed.
    fn log_command_execution(
        &self,
        base: &str,
        subcommand: Option<&str>,
        outcome: AuditOutcome,
        duration: Duration,
    );
}

/// Default sink: forwards events to `tracing`.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn log_security_violation(&self, event_type: &str, actor: &str, details: &str) {
        tracing::warn!(
            target: "guardrail::audit",
            event = event_type,
            actor,
            details,
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "security violation"
        );
    }

    fn log_command_execution(
        &self,
        base: &str,
        subcommand: Option<&str>,
        outcome: AuditOutcome,
        duration: Duration,
    ) {
        tracing::info!(
            target: "guardrail::audit",
            base,
            subcommand,
            outcome = outcome.as_str(),
            duration_ms = duration.as_millis() as u64,
            "command execution"
        );
    }
}

/// A single captured audit event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditRecord {
    Violation {
        event_type: String,
        actor: String,
        details: String,
    },
    Command {
        base: String,
        subcommand: Option<String>,
        outcome: &'static str,
    },
}

/// Sink that captures events in memory, for assertions in tests and for
/// embedding callers that forward the stream elsewhere.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().expect("audit record lock").clone()
    }

    pub fn violation_count(&self) -> usize {
        self.records()
            .iter()
            .filter(|r| matches!(r, AuditRecord::Violation { .. }))
            .count()
    }
}

impl AuditSink for RecordingAuditSink {
    fn log_security_violation(&self, event_type: &str, actor: &str, details: &str) {
        self.records
            .lock()
            .expect("audit record lock")
            .push(AuditRecord::Violation {
                event_type: event_type.to_string(),
                actor: actor.to_string(),
                details: details.to_string(),
            });
    }

    fn log_command_execution(
        &self,
        base: &str,
        subcommand: Option<&str>,
        outcome: AuditOutcome,
        _duration: Duration,
    ) {
        self.records
            .lock()
            .expect("audit record lock")
            .push(AuditRecord::Command {
                base: base.to_string(),
                subcommand: subcommand.map(str::to_string),
                outcome: outcome.as_str(),
            });
    }
}

/// Prepares hostile input for logging: truncates to [`AUDIT_DETAIL_MAX_LEN`]
/// characters and replaces control characters, so an attacker-controlled path
/// cannot inject fake log lines or terminal escapes into the audit stream.
pub fn scrub_for_audit(input: &str) -> String {
    input
        .chars()
        .take(AUDIT_DETAIL_MAX_LEN)
        .map(|c| if c.is_control() { '\u{FFFD}' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrub_replaces_control_characters() {
        let scrubbed = scrub_for_audit("evil\npath\0with\x1b[31mescapes");
        assert!(!scrubbed.contains('\n'));
        assert!(!scrubbed.contains('\0'));
        assert!(!scrubbed.contains('\x1b'));
        assert!(scrubbed.contains("evil"));
    }

    #[test]
    fn scrub_truncates_long_input() {
        let long = "a".repeat(5000);
        assert_eq!(scrub_for_audit(&long).chars().count(), AUDIT_DETAIL_MAX_LEN);
    }

    #[test]
    fn recording_sink_captures_in_order() {
        let sink = RecordingAuditSink::new();
        sink.log_security_violation("NULL_BYTE", "system", "bad");
        sink.log_command_execution("git", Some("status"), AuditOutcome::Succeeded, Duration::ZERO);
        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], AuditRecord::Violation { .. }));
    }
}
