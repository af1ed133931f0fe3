//! Script-interpreter executor (python).

use anyhow::Result;
use async_trait::async_trait;

use super::{resolve_interpreter, EnvPolicy, LanguageExecutor, Platform, SandboxSpec, ScriptSandbox};
use crate::config::ExecutorConfig;
use crate::detect::PYTHON;
use crate::result::ExecutionResult;
use crate::security::{PatternDenylist, Violation};

/// Runs python snippets with `-u` under the regex denylist.
#[derive(Debug)]
pub struct PythonExecutor {
    sandbox: ScriptSandbox,
}

impl PythonExecutor {
    pub fn new(config: &ExecutorConfig) -> Result<Self> {
        let platform = Platform::current();
        let spec = SandboxSpec {
            language: PYTHON,
            extension: "py",
            program: resolve_interpreter(config, PYTHON, &platform),
            args: vec!["-u".to_string()],
            probe_args: &["--version"],
            env: EnvPolicy::python(),
            executable_script: false,
            limit_address_space: true,
        };
        Ok(Self {
            sandbox: ScriptSandbox::new(spec, config, platform)?,
        })
    }
}

#[async_trait]
impl LanguageExecutor for PythonExecutor {
    fn language(&self) -> &str {
        PYTHON
    }

    async fn is_available(&self) -> bool {
        self.sandbox.probe().await
    }

    fn validate_code(&self, code: &str) -> Result<(), Violation> {
        PatternDenylist::python().check(code)
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
