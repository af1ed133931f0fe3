//! Language executors.
//!
//! Every executor follows the same lifecycle: validate the snippet against
//! its denylist, write it to a temporary script in the executor's own
//! directory, run the interpreter on it under a timeout with a scrubbed
//! environment, classify the outcome, and delete the script. The shared
//! parts live in [`ScriptSandbox`]; each language supplies its denylist,
//! interpreter and environment policy.

mod environment;
mod javascript;
mod platform;
mod process;
mod python;
mod shell;

pub use environment::EnvPolicy;
pub use javascript::JavaScriptExecutor;
pub use platform::{resolve_program, Platform};
pub use process::ProcessError;
pub use python::PythonExecutor;
pub use shell::ShellExecutor;

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tempfile::TempPath;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{default_allowed_modules, ExecutorConfig};
use crate::result::ExecutionResult;
use crate::security::Violation;
use process::{Invocation, RunOutcome};

/// How long the availability probe may take.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Contract shared by every language executor.
///
/// `execute` never fails: every outcome, including internal errors, comes
/// back as an [`ExecutionResult`].
#[async_trait]
pub trait LanguageExecutor: Send + Sync {
    /// Canonical identifier of the language this executor runs.
    fn language(&self) -> &str;

    /// True only if the runtime actually answered a trivial invocation.
    async fn is_available(&self) -> bool;

    /// Pure pre-flight check against the language's denylist.
    fn validate_code(&self, code: &str) -> Result<(), Violation>;

    /// Run `code`, using `timeout` seconds if given or the configured default.
    async fn execute(&self, code: &str, timeout: Option<u64>) -> ExecutionResult;

    /// Modules the executor advertises. Informational only.
    fn allowed_modules(&self) -> &[String] {
        &[]
    }
}

/// Per-language pieces a [`ScriptSandbox`] is assembled from.
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    pub language: &'static str,
    /// Script file extension, without the dot.
    pub extension: &'static str,
    /// Resolved interpreter. `None` when nothing usable was found.
    pub program: Option<PathBuf>,
    /// Interpreter arguments placed before the script path.
    pub args: Vec<String>,
    /// Arguments for the availability probe.
    pub probe_args: &'static [&'static str],
    pub env: EnvPolicy,
    /// Mark the script executable before running it.
    pub executable_script: bool,
    /// Enforce the memory ceiling with an address-space rlimit.
    pub limit_address_space: bool,
}

/// Shared execution lifecycle, configured once per executor.
#[derive(Debug)]
pub struct ScriptSandbox {
    language: &'static str,
    extension: &'static str,
    program: Option<PathBuf>,
    args: Vec<String>,
    probe_args: &'static [&'static str],
    env: Vec<(OsString, OsString)>,
    work_dir: PathBuf,
    default_timeout: u64,
    address_space_limit: Option<u64>,
    executable_script: bool,
    allowed_modules: Vec<String>,
    platform: Platform,
}

impl ScriptSandbox {
    /// Build the sandbox and create its working directory.
    pub fn new(spec: SandboxSpec, config: &ExecutorConfig, platform: Platform) -> Result<Self> {
        let work_dir = config.resolved_work_dir(spec.language);
        std::fs::create_dir_all(&work_dir)
            .with_context(|| format!("Failed to create work dir {}", work_dir.display()))?;

        let env = spec.env.resolve(std::env::vars_os(), &work_dir, &platform);
        let address_space_limit = (spec.limit_address_space && platform.address_space_limit)
            .then(|| config.memory_limit_bytes(spec.language));
        let allowed_modules = if config.allowed_modules.is_empty() {
            default_allowed_modules(spec.language)
        } else {
            config.allowed_modules.clone()
        };

        debug!(
            language = spec.language,
            program = ?spec.program,
            work_dir = %work_dir.display(),
            "Configured sandbox"
        );

        Ok(Self {
            language: spec.language,
            extension: spec.extension,
            program: spec.program,
            args: spec.args,
            probe_args: spec.probe_args,
            env,
            work_dir,
            default_timeout: config.timeout_seconds,
            address_space_limit,
            executable_script: spec.executable_script,
            allowed_modules,
            platform,
        })
    }

    pub const fn language(&self) -> &'static str {
        self.language
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Interpreter arguments placed before the script path.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn allowed_modules(&self) -> &[String] {
        &self.allowed_modules
    }

    /// Caller value when given and non-zero, else the configured default.
    pub fn effective_timeout(&self, requested: Option<u64>) -> u64 {
        requested.filter(|&t| t > 0).unwrap_or(self.default_timeout)
    }

    /// Run the interpreter's probe command.
    pub async fn probe(&self) -> bool {
        match &self.program {
            Some(program) => process::probe(program, self.probe_args, PROBE_TIMEOUT).await,
            None => false,
        }
    }

    /// Full lifecycle for one snippet. `verdict` is the executor's
    /// denylist result; a violation stops before anything touches disk.
    #[instrument(skip_all, fields(language = self.language, code_len = code.len()))]
    pub async fn execute(
        &self,
        code: &str,
        timeout: Option<u64>,
        verdict: Result<(), Violation>,
    ) -> ExecutionResult {
        if let Err(violation) = verdict {
            warn!(reason = %violation, "Code rejected by denylist");
            return ExecutionResult::security_violation(self.language, code, violation.reason);
        }

        let timeout_secs = self.effective_timeout(timeout);
        let started = Instant::now();

        match self.run(code, timeout_secs, started).await {
            Ok(result) => {
                info!(
                    status = %result.status(),
                    elapsed = result.execution_time(),
                    "Execution finished"
                );
                result
            }
            Err(e) => {
                error!(error = %e, "Execution failed");
                ExecutionResult::error(
                    self.language,
                    code,
                    format!("{e:#}"),
                    String::new(),
                    started.elapsed().as_secs_f64(),
                )
            }
        }
    }

    async fn run(&self, code: &str, timeout_secs: u64, started: Instant) -> Result<ExecutionResult> {
        let program = self
            .program
            .as_deref()
            .with_context(|| format!("No {} interpreter found on this host", self.language))?;

        let script = self.write_script(code)?;

        let mut args: Vec<OsString> = self.args.iter().map(OsString::from).collect();
        args.push(script.as_os_str().to_owned());
        let invocation = Invocation {
            program,
            args,
            env: &self.env,
            work_dir: &self.work_dir,
            timeout: Duration::from_secs(timeout_secs),
            address_space_limit: self.address_space_limit,
        };

        let outcome = process::run(&invocation, &self.platform).await;
        self.remove_script(script);

        let outcome = outcome.context("Failed to run interpreter")?;
        Ok(self.classify(code, outcome, timeout_secs, started.elapsed()))
    }

    /// Write `code` to a uniquely named script in the work dir.
    fn write_script(&self, code: &str) -> Result<TempPath> {
        // Recreate the directory in case something removed it since startup
        std::fs::create_dir_all(&self.work_dir)
            .with_context(|| format!("Failed to create work dir {}", self.work_dir.display()))?;

        let mut file = tempfile::Builder::new()
            .prefix("snippet_")
            .suffix(&format!(".{}", self.extension))
            .tempfile_in(&self.work_dir)
            .context("Failed to create script file")?;
        file.write_all(code.as_bytes())
            .and_then(|()| file.flush())
            .context("Failed to write script file")?;

        // Close our handle so the interpreter can open the file everywhere.
        let script = file.into_temp_path();
        if self.executable_script {
            self.platform
                .grant_execute(&script)
                .context("Failed to mark script executable")?;
        }
        Ok(script)
    }

    fn remove_script(&self, script: TempPath) {
        let path = script.to_path_buf();
        if let Err(e) = script.close() {
            warn!(path = %path.display(), error = %e, "Failed to remove script file");
        }
    }

    fn classify(
        &self,
        code: &str,
        outcome: RunOutcome,
        timeout_secs: u64,
        elapsed: Duration,
    ) -> ExecutionResult {
        let seconds = elapsed.as_secs_f64();
        match outcome {
            RunOutcome::TimedOut {
                partial_stdout,
                peak_memory,
            } => ExecutionResult::timeout(self.language, code, timeout_secs, partial_stdout, seconds)
                .with_memory_used(peak_memory),
            RunOutcome::Completed(done) if done.status.success() => {
                let result = ExecutionResult::success(self.language, code, done.stdout, seconds)
                    .with_memory_used(done.peak_memory)
                    .with_metadata("returncode", 0);
                if done.stderr.is_empty() {
                    result
                } else {
                    result.with_metadata("stderr", done.stderr)
                }
            }
            RunOutcome::Completed(done) => {
                let signal = self.platform.termination_signal(&done.status);
                // A signal-killed child has no exit code; report the negated signal.
                let returncode = done
                    .status
                    .code()
                    .or_else(|| signal.map(|s| -s))
                    .unwrap_or(-1);
                let message = if !done.stderr.trim().is_empty() {
                    done.stderr
                } else if let Some(signal) = signal {
                    format!("Process terminated by signal {signal}")
                } else {
                    format!("Process exited with code {returncode}")
                };
                let result = ExecutionResult::error(self.language, code, message, done.stdout, seconds)
                    .with_memory_used(done.peak_memory)
                    .with_metadata("returncode", returncode);
                match signal {
                    Some(signal) => result.with_metadata("signal", signal),
                    None => result,
                }
            }
        }
    }
}

/// Resolve the configured interpreter, or the platform default, to a path.
fn resolve_interpreter(config: &ExecutorConfig, language: &str, platform: &Platform) -> Option<PathBuf> {
    let name = config
        .interpreter
        .as_deref()
        .unwrap_or_else(|| platform.default_interpreter(language));
    let resolved = resolve_program(name);
    if resolved.is_none() {
        debug!(language, interpreter = name, "Interpreter not found");
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ExecutionStatus;

    fn sandbox(work_dir: &Path) -> ScriptSandbox {
        let config = ExecutorConfig {
            work_dir: Some(work_dir.to_path_buf()),
            timeout_seconds: 9,
            ..ExecutorConfig::default()
        };
        let spec = SandboxSpec {
            language: "bash",
            extension: "sh",
            program: Some(PathBuf::from("/bin/sh")),
            args: Vec::new(),
            probe_args: &["-c", "exit 0"],
            env: EnvPolicy::shell(),
            executable_script: true,
            limit_address_space: false,
        };
        ScriptSandbox::new(spec, &config, Platform::current()).unwrap()
    }

    #[test]
    fn creates_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        let sandbox = sandbox(&nested);
        assert!(nested.is_dir());
        assert_eq!(sandbox.work_dir(), nested);
    }

    #[test]
    fn effective_timeout_prefers_caller() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox(dir.path());
        assert_eq!(sandbox.effective_timeout(Some(2)), 2);
        assert_eq!(sandbox.effective_timeout(None), 9);
        assert_eq!(sandbox.effective_timeout(Some(0)), 9);
    }

    #[tokio::test]
    async fn violation_never_touches_disk() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox(dir.path());
        let result = sandbox
            .execute("rm -rf /", None, Err(Violation { reason: "nope".into() }))
            .await;
        assert_eq!(result.status(), ExecutionStatus::SecurityViolation);
        assert_eq!(result.execution_time(), 0.0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_interpreter_is_error_result() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExecutorConfig {
            work_dir: Some(dir.path().to_path_buf()),
            ..ExecutorConfig::default()
        };
        let spec = SandboxSpec {
            language: "python",
            extension: "py",
            program: None,
            args: Vec::new(),
            probe_args: &["--version"],
            env: EnvPolicy::python(),
            executable_script: false,
            limit_address_space: false,
        };
        let sandbox = ScriptSandbox::new(spec, &config, Platform::current()).unwrap();

        assert!(!sandbox.probe().await);
        let result = sandbox.execute("print(1)", None, Ok(())).await;
        assert_eq!(result.status(), ExecutionStatus::Error);
        assert!(result.error_message().unwrap().contains("interpreter"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn script_is_removed_after_run() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox(dir.path());
        let result = sandbox.execute("echo hi", Some(5), Ok(())).await;
        assert_eq!(result.status(), ExecutionStatus::Success);
        assert_eq!(result.output().trim(), "hi");
        assert_eq!(result.returncode(), Some(0));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_keeps_stdout_and_code() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox(dir.path());
        let result = sandbox
            .execute("echo partial; echo broken >&2; exit 4", Some(5), Ok(()))
            .await;
        assert_eq!(result.status(), ExecutionStatus::Error);
        assert_eq!(result.returncode(), Some(4));
        assert_eq!(result.output().trim(), "partial");
        assert_eq!(result.error_message().map(str::trim), Some("broken"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn signal_is_reported_as_negative_returncode() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox(dir.path());
        let result = sandbox.execute("kill -9 $$", Some(5), Ok(())).await;
        assert_eq!(result.status(), ExecutionStatus::Error);
        assert_eq!(result.returncode(), Some(-9));
        assert_eq!(result.metadata()["signal"], 9);
        assert_eq!(result.error_message(), Some("Process terminated by signal 9"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_failure_gets_generic_message() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox(dir.path());
        let result = sandbox.execute("exit 2", Some(5), Ok(())).await;
        assert_eq!(result.error_message(), Some("Process exited with code 2"));
    }
}
