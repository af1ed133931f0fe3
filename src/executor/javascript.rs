//! Dynamic-runtime executor (javascript on Node.js).

use anyhow::Result;
use async_trait::async_trait;

use super::{resolve_interpreter, EnvPolicy, LanguageExecutor, Platform, SandboxSpec, ScriptSandbox};
use crate::config::ExecutorConfig;
use crate::detect::JAVASCRIPT;
use crate::result::ExecutionResult;
use crate::security::{PatternDenylist, Violation};

/// Runs javascript snippets with Node.js.
///
/// V8 reserves far more address space than it uses, so the memory ceiling
/// is passed as a heap limit rather than an rlimit.
#[derive(Debug)]
pub struct JavaScriptExecutor {
    sandbox: ScriptSandbox,
}

impl JavaScriptExecutor {
    pub fn new(config: &ExecutorConfig) -> Result<Self> {
        let platform = Platform::current();
        let heap_mb = config.memory_limit_bytes(JAVASCRIPT) / (1024 * 1024);
        let spec = SandboxSpec {
            language: JAVASCRIPT,
            extension: "js",
            program: resolve_interpreter(config, JAVASCRIPT, &platform),
            args: vec![format!("--max-old-space-size={heap_mb}")],
            probe_args: &["--version"],
            env: EnvPolicy::javascript(),
            executable_script: false,
            limit_address_space: false,
        };
        Ok(Self {
            sandbox: ScriptSandbox::new(spec, config, platform)?,
        })
    }

    pub const fn sandbox(&self) -> &ScriptSandbox {
        &self.sandbox
    }
}

#[async_trait]
impl LanguageExecutor for JavaScriptExecutor {
    fn language(&self) -> &str {
        JAVASCRIPT
    }

    async fn is_available(&self) -> bool {
        self.sandbox.probe().await
    }

    fn validate_code(&self, code: &str) -> Result<(), Violation> {
        PatternDenylist::javascript().check(code)
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
