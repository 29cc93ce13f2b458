//! Whitelist-based command validation and injection-safe execution.
//!
//! A command is only ever executed as an argument vector handed directly to
//! process creation (`tokio::process::Command` or `std::process::Command`) —
//! never concatenated into a string for a shell. That property is what
//! neutralizes injection even when an individual argument contains characters
//! that would be dangerous under shell expansion: there is no shell to expand
//! them. The strict-mode metacharacter rejection on top of that is defense in
//! depth for callers that log or forward arguments.
//!
//! The whitelist is loaded once and read-only for the life of the sanitizer.
//! A caller that needs a new whitelist constructs a new `CommandSanitizer`
//! and swaps the `Arc`.

use crate::audit::{AuditOutcome, AuditSink, TracingAuditSink, scrub_for_audit};
use crate::config::CommandRule;
use crate::constants::{DEFAULT_ACTOR, DEFAULT_COMMAND_TIMEOUT, SHELL_METACHARACTERS};
use crate::error::{
    CommandError, CommandInjectionError, CommandNotAllowedError, ValidationError,
};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// A command that passed whitelist and injection checks.
///
/// `args` is the caller's vector unchanged in content and order; it is always
/// passed to the operating system as a literal argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedCommand {
    pub base_command: String,
    pub sub_command: Option<String>,
    pub args: Vec<String>,
    raw_command: String,
}

impl SanitizedCommand {
    /// Human-readable rendition for audit logging only. Never re-parse or
    /// re-execute this string.
    pub fn raw_command(&self) -> &str {
        &self.raw_command
    }
}

/// Result of a completed child process. Failure to *complete* (spawn error,
/// timeout, cancellation) is reported as a [`CommandError`] instead.
#[derive(Debug, Clone)]
pub struct CommandExecResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

/// Per-invocation execution options.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Working directory for the child. Callers that take this from
    /// untrusted input validate it through `SymlinkResolver` first.
    pub cwd: Option<PathBuf>,
    /// Hard timeout; falls back to the whitelist rule's timeout, then the
    /// sanitizer default.
    pub timeout: Option<Duration>,
    /// Cooperative cancellation. On cancellation the child is killed before
    /// the error propagates; the sync form polls the token between waits.
    pub cancellation: Option<CancellationToken>,
}

#[derive(Debug)]
struct CompiledRule {
    subcommands: Option<HashSet<String>>,
    arg_patterns: Option<Vec<Regex>>,
    timeout: Option<Duration>,
}

/// Read-only allow-list of base commands. Anything absent is denied.
#[derive(Debug, Default)]
pub struct CommandWhitelist {
    rules: HashMap<String, CompiledRule>,
}

impl CommandWhitelist {
    /// Compiles declarative rules, rejecting the whole set if any regex is
    /// invalid — a half-loaded whitelist must never go live.
    pub fn from_rules(
        rules: impl IntoIterator<Item = CommandRule>,
    ) -> Result<Self, ValidationError> {
        let mut compiled = HashMap::new();
        let mut errors = Vec::new();

        for rule in rules {
            if !rule.enabled {
                continue;
            }
            let mut arg_patterns = None;
            if let Some(patterns) = &rule.allowed_arg_patterns {
                let mut regexes = Vec::with_capacity(patterns.len());
                for pattern in patterns {
                    match Regex::new(pattern) {
                        Ok(re) => regexes.push(re),
                        Err(e) => errors.push(format!(
                            "invalid argument pattern {:?} for '{}': {}",
                            pattern, rule.name, e
                        )),
                    }
                }
                arg_patterns = Some(regexes);
            }
            compiled.insert(
                rule.name.clone(),
                CompiledRule {
                    subcommands: rule
                        .subcommands
                        .as_ref()
                        .map(|s| s.iter().cloned().collect()),
                    arg_patterns,
                    timeout: rule.timeout_seconds.map(Duration::from_secs),
                },
            );
        }

        if errors.is_empty() {
            Ok(Self { rules: compiled })
        } else {
            Err(ValidationError { errors })
        }
    }

    /// Loads every enabled rule from a directory of `.json` files.
    pub fn load_from_dir(dir: &Path) -> anyhow::Result<Self> {
        let rules = crate::config::load_command_rules(dir)?;
        Self::from_rules(rules.into_values()).map_err(Into::into)
    }

    pub fn builder() -> CommandWhitelistBuilder {
        CommandWhitelistBuilder::default()
    }

    pub fn allows(&self, base: &str) -> bool {
        self.rules.contains_key(base)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    fn rule(&self, base: &str) -> Option<&CompiledRule> {
        self.rules.get(base)
    }
}

/// In-code whitelist construction for embedding callers.
#[derive(Debug, Default)]
pub struct CommandWhitelistBuilder {
    rules: Vec<CommandRule>,
}

impl CommandWhitelistBuilder {
    /// Allows `base` with any subcommand and any argument shape.
    pub fn allow(mut self, base: impl Into<String>) -> Self {
        self.rules.push(CommandRule::named(base));
        self
    }

    /// Allows `base` only when the first argument is one of `subcommands`.
    pub fn allow_with_subcommands<S: AsRef<str>>(
        mut self,
        base: impl Into<String>,
        subcommands: impl IntoIterator<Item = S>,
    ) -> Self {
        let mut rule = CommandRule::named(base);
        rule.subcommands = Some(
            subcommands
                .into_iter()
                .map(|s| s.as_ref().to_string())
                .collect(),
        );
        self.rules.push(rule);
        self
    }

    /// Allows `base` with every argument required to match at least one of
    /// the given regex patterns.
    pub fn allow_with_patterns<S: AsRef<str>>(
        mut self,
        base: impl Into<String>,
        patterns: impl IntoIterator<Item = S>,
    ) -> Self {
        let mut rule = CommandRule::named(base);
        rule.allowed_arg_patterns = Some(
            patterns
                .into_iter()
                .map(|s| s.as_ref().to_string())
                .collect(),
        );
        self.rules.push(rule);
        self
    }

    pub fn build(self) -> Result<CommandWhitelist, ValidationError> {
        CommandWhitelist::from_rules(self.rules)
    }
}

/// Validates commands against the whitelist and executes them without a
/// shell. Immutable after construction; safe for concurrent shared use.
#[derive(Debug)]
pub struct CommandSanitizer {
    whitelist: CommandWhitelist,
    strict_mode: bool,
    default_timeout: Duration,
    audit: Arc<dyn AuditSink>,
    actor: String,
}

impl CommandSanitizer {
    pub fn new(whitelist: CommandWhitelist) -> Self {
        Self {
            whitelist,
            strict_mode: true,
            default_timeout: DEFAULT_COMMAND_TIMEOUT,
            audit: Arc::new(TracingAuditSink),
            actor: DEFAULT_ACTOR.to_string(),
        }
    }

    /// Disables the strict metacharacter check on arguments. NUL and newline
    /// are rejected regardless.
    pub fn with_strict_mode(mut self, strict_mode: bool) -> Self {
        self.strict_mode = strict_mode;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn whitelist(&self) -> &CommandWhitelist {
        &self.whitelist
    }

    /// Checks `base` plus `args` against the whitelist and the injection
    /// rules. Both acceptance and rejection are audited.
    pub fn validate_command(
        &self,
        base: &str,
        args: &[String],
    ) -> Result<SanitizedCommand, CommandError> {
        let verdict = self.check_command(base, args);
        match &verdict {
            Ok(sanitized) => self.audit.log_command_execution(
                base,
                sanitized.sub_command.as_deref(),
                AuditOutcome::Accepted,
                Duration::ZERO,
            ),
            Err(e) => {
                self.audit.log_security_violation(
                    "COMMAND_REJECTED",
                    &self.actor,
                    &scrub_for_audit(&format!("{} {}: {}", base, args.join(" "), e)),
                );
                self.audit.log_command_execution(
                    base,
                    args.first().map(String::as_str),
                    AuditOutcome::Rejected,
                    Duration::ZERO,
                );
            }
        }
        verdict
    }

    fn check_command(&self, base: &str, args: &[String]) -> Result<SanitizedCommand, CommandError> {
        let Some(rule) = self.whitelist.rule(base) else {
            return Err(CommandNotAllowedError::BaseNotWhitelisted {
                command: base.to_string(),
            }
            .into());
        };

        let mut sub_command = None;
        if let Some(allowed) = &rule.subcommands {
            match args.first() {
                Some(sub) if allowed.contains(sub) => sub_command = Some(sub.clone()),
                Some(sub) => {
                    return Err(CommandNotAllowedError::SubcommandNotAllowed {
                        command: base.to_string(),
                        subcommand: sub.clone(),
                    }
                    .into());
                }
                None => {
                    return Err(CommandNotAllowedError::SubcommandNotAllowed {
                        command: base.to_string(),
                        subcommand: String::new(),
                    }
                    .into());
                }
            }
        }

        for arg in args {
            self.check_argument(arg, base)?;
        }

        if let Some(patterns) = &rule.arg_patterns {
            // Patterns constrain the arguments after the whitelisted
            // subcommand, if one is configured.
            let constrained = if sub_command.is_some() { &args[1..] } else { args };
            for arg in constrained {
                if !patterns.iter().any(|p| p.is_match(arg)) {
                    return Err(CommandNotAllowedError::ArgumentNotAllowed {
                        command: base.to_string(),
                        argument: arg.clone(),
                    }
                    .into());
                }
            }
        }

        Ok(SanitizedCommand {
            base_command: base.to_string(),
            sub_command,
            args: args.to_vec(),
            raw_command: format!("{} {}", base, args.join(" ")),
        })
    }

    /// Rejects arguments carrying injection-capable bytes: NUL and newline
    /// always, shell metacharacters when strict mode is on. Returns the
    /// argument unchanged when it passes.
    pub fn sanitize_argument<'a>(
        &self,
        arg: &'a str,
        context: &str,
    ) -> Result<&'a str, CommandInjectionError> {
        match self.check_argument(arg, context) {
            Ok(()) => Ok(arg),
            Err(e) => {
                self.audit.log_security_violation(
                    "COMMAND_INJECTION",
                    &self.actor,
                    &scrub_for_audit(&format!("{}: {}", context, arg)),
                );
                Err(e)
            }
        }
    }

    fn check_argument(&self, arg: &str, context: &str) -> Result<(), CommandInjectionError> {
        if arg.contains('\0') {
            return Err(CommandInjectionError::NullByte {
                context: context.to_string(),
                argument: scrub_for_audit(arg),
            });
        }
        if arg.contains('\n') || arg.contains('\r') {
            return Err(CommandInjectionError::Newline {
                context: context.to_string(),
                argument: scrub_for_audit(arg),
            });
        }
        if self.strict_mode
            && let Some(meta) = arg.chars().find(|c| SHELL_METACHARACTERS.contains(c))
        {
            return Err(CommandInjectionError::Metacharacter {
                context: context.to_string(),
                argument: scrub_for_audit(arg),
                meta,
            });
        }
        Ok(())
    }

    fn effective_timeout(&self, base: &str, options: &ExecOptions) -> Duration {
        options
            .timeout
            .or_else(|| self.whitelist.rule(base).and_then(|r| r.timeout))
            .unwrap_or(self.default_timeout)
    }

    /// Validates and executes a command, suspending at I/O. The child is
    /// spawned directly from the argument vector; on timeout or cancellation
    /// it is killed before the error is returned.
    pub async fn execute_command(
        &self,
        base: &str,
        args: &[String],
        options: ExecOptions,
    ) -> Result<CommandExecResult, CommandError> {
        let sanitized = self.validate_command(base, args)?;
        let timeout = self.effective_timeout(base, &options);
        let start = Instant::now();

        let mut cmd = tokio::process::Command::new(&sanitized.base_command);
        cmd.args(&sanitized.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }

        let output_fut = cmd.output();
        let outcome = if let Some(token) = &options.cancellation {
            tokio::select! {
                // Dropping the output future kills the child (kill_on_drop).
                _ = token.cancelled() => {
                    self.finish_audit(&sanitized, AuditOutcome::Failed, start);
                    return Err(CommandError::Cancelled {
                        command: sanitized.base_command,
                    });
                }
                res = tokio::time::timeout(timeout, output_fut) => res,
            }
        } else {
            tokio::time::timeout(timeout, output_fut).await
        };

        match outcome {
            Err(_) => {
                self.finish_audit(&sanitized, AuditOutcome::Failed, start);
                Err(CommandError::TimedOut {
                    command: sanitized.base_command,
                    timeout_secs: timeout.as_secs(),
                })
            }
            Ok(Err(e)) => {
                self.finish_audit(&sanitized, AuditOutcome::Failed, start);
                Err(CommandError::Spawn {
                    command: sanitized.base_command,
                    source: e,
                })
            }
            Ok(Ok(output)) => {
                let result = CommandExecResult {
                    success: output.status.success(),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    exit_code: output.status.code().unwrap_or(-1),
                    duration_ms: start.elapsed().as_millis() as u64,
                };
                let outcome = if result.success {
                    AuditOutcome::Succeeded
                } else {
                    AuditOutcome::Failed
                };
                self.finish_audit(&sanitized, outcome, start);
                Ok(result)
            }
        }
    }

    /// Blocking form with the same validation and timeout guarantees. The
    /// child is polled with `try_wait`; output pipes are drained on reader
    /// threads so a chatty child cannot deadlock against a full pipe.
    pub fn execute_command_sync(
        &self,
        base: &str,
        args: &[String],
        options: ExecOptions,
    ) -> Result<CommandExecResult, CommandError> {
        let sanitized = self.validate_command(base, args)?;
        let timeout = self.effective_timeout(base, &options);
        let start = Instant::now();

        let mut cmd = std::process::Command::new(&sanitized.base_command);
        cmd.args(&sanitized.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| {
            self.finish_audit(&sanitized, AuditOutcome::Failed, start);
            CommandError::Spawn {
                command: sanitized.base_command.clone(),
                source: e,
            }
        })?;

        let stdout_reader = spawn_pipe_reader(child.stdout.take());
        let stderr_reader = spawn_pipe_reader(child.stderr.take());

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    let cancelled = options
                        .cancellation
                        .as_ref()
                        .is_some_and(|t| t.is_cancelled());
                    if cancelled || start.elapsed() >= timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        self.finish_audit(&sanitized, AuditOutcome::Failed, start);
                        return Err(if cancelled {
                            CommandError::Cancelled {
                                command: sanitized.base_command,
                            }
                        } else {
                            CommandError::TimedOut {
                                command: sanitized.base_command,
                                timeout_secs: timeout.as_secs(),
                            }
                        });
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    self.finish_audit(&sanitized, AuditOutcome::Failed, start);
                    return Err(CommandError::Spawn {
                        command: sanitized.base_command,
                        source: e,
                    });
                }
            }
        };

        let stdout = join_pipe_reader(stdout_reader);
        let stderr = join_pipe_reader(stderr_reader);

        let result = CommandExecResult {
            success: status.success(),
            stdout,
            stderr,
            exit_code: status.code().unwrap_or(-1),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        let outcome = if result.success {
            AuditOutcome::Succeeded
        } else {
            AuditOutcome::Failed
        };
        self.finish_audit(&sanitized, outcome, start);
        Ok(result)
    }

    fn finish_audit(&self, sanitized: &SanitizedCommand, outcome: AuditOutcome, start: Instant) {
        self.audit.log_command_execution(
            &sanitized.base_command,
            sanitized.sub_command.as_deref(),
            outcome,
            start.elapsed(),
        );
    }
}

fn spawn_pipe_reader<R: std::io::Read + Send + 'static>(
    pipe: Option<R>,
) -> Option<std::thread::JoinHandle<Vec<u8>>> {
    pipe.map(|mut r| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = std::io::Read::read_to_end(&mut r, &mut buf);
            buf
        })
    })
}

fn join_pipe_reader(handle: Option<std::thread::JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|buf| String::from_utf8_lossy(&buf).to_string())
        .unwrap_or_default()
}
