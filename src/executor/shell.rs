//! Shell-scripting executor.
//!
//! Uses the literal command denylist and the platform's shell discovery:
//! bash or sh on Unix, Git Bash or the WSL launcher on Windows. When no
//! shell is found the executor reports itself unavailable.

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::{EnvPolicy, LanguageExecutor, Platform, SandboxSpec, ScriptSandbox};
use crate::config::ExecutorConfig;
use crate::detect::BASH;
use crate::result::ExecutionResult;
use crate::security::{CommandDenylist, Violation};

#[derive(Debug)]
pub struct ShellExecutor {
    sandbox: ScriptSandbox,
    denylist: CommandDenylist,
}

impl ShellExecutor {
    pub fn new(config: &ExecutorConfig) -> Result<Self> {
        let platform = Platform::current();
        let program = platform.discover_shell(config.interpreter.as_deref());
        if program.is_none() {
            debug!("No shell found among the platform candidates");
        }

        let spec = SandboxSpec {
            language: BASH,
            extension: "sh",
            program,
            args: Vec::new(),
            probe_args: &["-c", "exit 0"],
            env: EnvPolicy::shell(),
            executable_script: true,
            limit_address_space: true,
        };
        Ok(Self {
            sandbox: ScriptSandbox::new(spec, config, platform)?,
            denylist: CommandDenylist::shell(),
        })
    }
}

#[async_trait]
impl LanguageExecutor for ShellExecutor {
    fn language(&self) -> &str {
        BASH
    }

    async fn is_available(&self) -> bool {
        self.sandbox.probe().await
    }

    fn validate_code(&self, code: &str) -> Result<(), Violation> {
        self.denylist.check(code)
    }

    async fn execute(&self, code: &str, timeout: Option<u64>) -> ExecutionResult {
        self.sandbox
            .execute(code, timeout, self.validate_code(code))
            .await
    }

    fn allowed_modules(&self) -> &[String] {
        self.sandbox.allowed_modules()
    }
}
