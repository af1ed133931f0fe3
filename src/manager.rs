//! Execution manager: the single entry point callers use.
//!
//! Owns the registered executors, infers the language when the caller does
//! not give one, and turns dispatch failures into ordinary `Error` results.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, ExecutorConfig};
use crate::detect::{self, BASH, DETECTION_ORDER, JAVASCRIPT, PYTHON};
use crate::executor::{JavaScriptExecutor, LanguageExecutor, PythonExecutor, ShellExecutor};
use crate::result::ExecutionResult;

/// Language recorded on results when detection failed.
pub const UNKNOWN_LANGUAGE: &str = "unknown";

/// A caller's execution request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Reserved for executor-specific options. Unused by the built-in executors.
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

/// Dispatches snippets to the executors that were available at startup.
pub struct ExecutionManager {
    executors: BTreeMap<String, Box<dyn LanguageExecutor>>,
}

impl std::fmt::Debug for ExecutionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionManager")
            .field("executors", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ExecutionManager {
    /// Build every enabled executor from `config` and keep the available ones.
    ///
    /// Executors that cannot be built or whose runtime does not answer are
    /// logged and skipped; the manager itself always comes up.
    pub async fn from_config(config: &Config) -> Self {
        let mut candidates: Vec<Box<dyn LanguageExecutor>> = Vec::new();
        for language in DETECTION_ORDER {
            let settings = config.executor(language);
            if !settings.enabled {
                info!(language, "Executor disabled by configuration");
                continue;
            }
            match build_executor(language, &settings) {
                Ok(executor) => candidates.push(executor),
                Err(e) => warn!(language, error = %e, "Failed to build executor"),
            }
        }
        Self::with_executors(candidates).await
    }

    /// Register the given executors, keeping only those whose runtime responds.
    pub async fn with_executors<I>(executors: I) -> Self
    where
        I: IntoIterator<Item = Box<dyn LanguageExecutor>>,
    {
        let mut registered = BTreeMap::new();
        for executor in executors {
            let language = executor.language().to_string();
            if executor.is_available().await {
                info!(language = %language, "Registered executor");
                registered.insert(language, executor);
            } else {
                warn!(language = %language, "Runtime not available, executor not registered");
            }
        }
        if registered.is_empty() {
            warn!("No executors available");
        }
        Self {
            executors: registered,
        }
    }

    /// Run `code`, detecting the language when `language` is `None`.
    ///
    /// Never fails: detection and lookup problems come back as `Error` results.
    #[instrument(skip(self, code), fields(code_len = code.len()))]
    pub async fn execute_code(
        &self,
        code: &str,
        language: Option<&str>,
        timeout: Option<u64>,
    ) -> ExecutionResult {
        let requested = language.map(str::trim).filter(|l| !l.is_empty());
        let language = match requested {
            Some(name) => detect::normalize_language(name),
            None => match detect::detect_language(code) {
                Some(detected) => {
                    debug!(language = detected, "Detected language");
                    detected.to_string()
                }
                None => {
                    return ExecutionResult::error(
                        UNKNOWN_LANGUAGE,
                        code,
                        "Could not detect the language of the code; please specify the language explicitly",
                        String::new(),
                        0.0,
                    );
                }
            },
        };

        let Some(executor) = self.executors.get(&language) else {
            let name = requested.unwrap_or(&language);
            return ExecutionResult::error(
                language.clone(),
                code,
                format!(
                    "Language '{name}' is not supported. Available: {:?}",
                    self.list_executors()
                ),
                String::new(),
                0.0,
            );
        };

        executor.execute(code, timeout).await
    }

    /// Caller-facing entry point taking a full request.
    pub async fn execute(&self, request: &ExecuteRequest) -> ExecutionResult {
        if !request.extra.is_empty() {
            debug!(keys = ?request.extra.keys().collect::<Vec<_>>(), "Ignoring extra options");
        }
        self.execute_code(&request.code, request.language.as_deref(), request.timeout)
            .await
    }

    /// Lexical language guess, exposed so callers can preview it.
    pub fn detect_language(&self, code: &str) -> Option<&'static str> {
        detect::detect_language(code)
    }

    /// Languages whose executors were available at startup.
    pub fn list_executors(&self) -> BTreeSet<String> {
        self.executors.keys().cloned().collect()
    }

    pub fn list_supported_languages(&self) -> BTreeSet<String> {
        self.list_executors()
    }

    /// The registered executor for `language` (aliases accepted).
    pub fn executor(&self, language: &str) -> Option<&dyn LanguageExecutor> {
        self.executors
            .get(&detect::normalize_language(language))
            .map(AsRef::as_ref)
    }
}

fn build_executor(language: &str, settings: &ExecutorConfig) -> Result<Box<dyn LanguageExecutor>> {
    Ok(match language {
        PYTHON => Box::new(PythonExecutor::new(settings)?),
        JAVASCRIPT => Box::new(JavaScriptExecutor::new(settings)?),
        BASH => Box::new(ShellExecutor::new(settings)?),
        other => anyhow::bail!("No executor implementation for '{other}'"),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::result::ExecutionStatus;
    use crate::security::Violation;

    /// Executor that echoes the code back without spawning anything.
    struct MockExecutor {
        language: &'static str,
        available: bool,
        calls: Arc<AtomicUsize>,
    }

    impl MockExecutor {
        fn boxed(language: &'static str, available: bool) -> Box<dyn LanguageExecutor> {
            Box::new(Self {
                language,
                available,
                calls: Arc::new(AtomicUsize::new(0)),
            })
        }
    }

    #[async_trait]
    impl LanguageExecutor for MockExecutor {
        fn language(&self) -> &str {
            self.language
        }

        async fn is_available(&self) -> bool {
            self.available
        }

        fn validate_code(&self, code: &str) -> Result<(), Violation> {
            if code.contains("forbidden") {
                Err(Violation {
                    reason: "forbidden".into(),
                })
            } else {
                Ok(())
            }
        }

        async fn execute(&self, code: &str, timeout: Option<u64>) -> ExecutionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Err(v) = self.validate_code(code) {
                return ExecutionResult::security_violation(self.language, code, v.reason);
            }
            ExecutionResult::success(self.language, code, format!("ran: {code}"), 0.01)
                .with_metadata("timeout", timeout.unwrap_or(0))
        }
    }

    async fn manager() -> ExecutionManager {
        ExecutionManager::with_executors([
            MockExecutor::boxed(PYTHON, true),
            MockExecutor::boxed(JAVASCRIPT, true),
            MockExecutor::boxed(BASH, true),
        ])
        .await
    }

    #[tokio::test]
    async fn unavailable_executors_are_not_registered() {
        let manager = ExecutionManager::with_executors([
            MockExecutor::boxed(PYTHON, true),
            MockExecutor::boxed(JAVASCRIPT, false),
        ])
        .await;
        let languages = manager.list_executors();
        assert!(languages.contains("python"));
        assert!(!languages.contains("javascript"));
        assert_eq!(manager.list_supported_languages(), languages);
    }

    #[tokio::test]
    async fn manager_with_nothing_available_still_initializes() {
        let manager = ExecutionManager::with_executors([MockExecutor::boxed(BASH, false)]).await;
        assert!(manager.list_executors().is_empty());
        let result = manager.execute_code("echo hi", Some("bash"), None).await;
        assert_eq!(result.status(), ExecutionStatus::Error);
    }

    #[tokio::test]
    async fn explicit_language_is_dispatched() {
        let manager = manager().await;
        let result = manager.execute_code("whatever", Some("python"), Some(4)).await;
        assert!(result.is_success());
        assert_eq!(result.language(), "python");
        assert_eq!(result.output(), "ran: whatever");
        assert_eq!(result.metadata()["timeout"], 4);
    }

    #[tokio::test]
    async fn aliases_are_normalized() {
        let manager = manager().await;
        assert_eq!(manager.execute_code("x", Some("JS"), None).await.language(), "javascript");
        assert_eq!(manager.execute_code("x", Some("sh"), None).await.language(), "bash");
        assert!(manager.executor("py").is_some());
    }

    #[tokio::test]
    async fn shebang_resolves_to_shell() {
        let manager = manager().await;
        let result = manager.execute_code("#!/bin/bash\necho hi", None, None).await;
        assert_eq!(result.language(), "bash");
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn undetectable_language_is_error_not_violation() {
        let manager = manager().await;
        let result = manager.execute_code("hello world", None, None).await;
        assert_eq!(result.status(), ExecutionStatus::Error);
        assert_eq!(result.language(), UNKNOWN_LANGUAGE);
        assert!(result.error_message().unwrap().contains("specify"));
    }

    #[tokio::test]
    async fn unsupported_language_is_named() {
        let manager = manager().await;
        let result = manager.execute_code("puts 1", Some("Ruby"), None).await;
        assert_eq!(result.status(), ExecutionStatus::Error);
        assert!(result.error_message().unwrap().contains("'Ruby'"));
    }

    #[tokio::test]
    async fn executor_result_is_returned_unmodified() {
        let manager = manager().await;
        let result = manager.execute_code("forbidden", Some("python"), None).await;
        assert_eq!(result.status(), ExecutionStatus::SecurityViolation);
        assert_eq!(result.error_message(), Some("forbidden"));
    }

    #[tokio::test]
    async fn request_extra_is_accepted() {
        let manager = manager().await;
        let request: ExecuteRequest = serde_json::from_str(
            r#"{"code": "console.log(1)", "extra": {"stdin": "ignored"}}"#,
        )
        .unwrap();
        let result = manager.execute(&request).await;
        assert_eq!(result.language(), "javascript");
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn blank_language_falls_back_to_detection() {
        let manager = manager().await;
        let result = manager.execute_code("print(1)", Some("  "), None).await;
        assert_eq!(result.language(), "python");
    }

    #[tokio::test]
    async fn detect_language_is_exposed() {
        let manager = manager().await;
        assert_eq!(manager.detect_language("console.log(1)"), Some("javascript"));
        assert_eq!(manager.detect_language("???"), None);
    }

    #[tokio::test]
    async fn from_config_skips_disabled_executors() {
        let dir = tempfile::tempdir().unwrap();
        let json = format!(
            r#"{{"executors": {{
                "python": {{"enabled": false}},
                "javascript": {{"enabled": false}},
                "bash": {{"work_dir": "{}"}}
            }}}}"#,
            dir.path().join("bash").display()
        );
        let config = Config::from_json(&json).unwrap();
        let manager = ExecutionManager::from_config(&config).await;
        let languages = manager.list_executors();
        assert!(!languages.contains("python"));
        assert!(!languages.contains("javascript"));
    }

    #[tokio::test]
    async fn concurrent_calls_are_independent() {
        let manager = Arc::new(manager().await);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    manager
                        .execute_code(&format!("job {i}"), Some("bash"), None)
                        .await
                })
            })
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            let result = handle.await.unwrap();
            assert_eq!(result.output(), format!("ran: job {i}"));
        }
    }
}
