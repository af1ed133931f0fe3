//! MCP server implementation using rmcp.
//!
//! Exposes the execution manager as MCP tools.

use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo};
use rmcp::schemars;
use rmcp::transport::stdio;
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::manager::ExecutionManager;
use crate::result::ExecutionResult;

/// MCP server for sandboxed code execution.
#[derive(Clone)]
pub struct SandboxServer {
    manager: Arc<ExecutionManager>,
    tool_router: ToolRouter<Self>,
}

/// Parameters for the execute tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecuteParams {
    /// The code to execute.
    #[schemars(description = "The code to execute")]
    pub code: String,

    /// Language of the code. Detected from the code when omitted.
    #[schemars(description = "Language of the code ('python', 'javascript', 'bash'). Detected when omitted")]
    #[serde(default)]
    pub language: Option<String>,

    /// Timeout in seconds. The executor default applies when omitted.
    #[schemars(description = "Timeout in seconds; the executor default applies when omitted")]
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// Parameters for the detect_language tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct DetectParams {
    #[schemars(description = "The code whose language should be detected")]
    pub code: String,
}

/// One entry of the list_languages response.
#[derive(Debug, Serialize)]
struct LanguageInfo<'a> {
    language: &'a str,
    allowed_modules: &'a [String],
}

#[tool_router]
impl SandboxServer {
    pub fn new(manager: Arc<ExecutionManager>) -> Self {
        Self {
            manager,
            tool_router: Self::tool_router(),
        }
    }

    /// Execute code with the matching language executor.
    #[tool(description = "Execute a python, javascript or bash snippet in a time-bounded sandbox")]
    async fn execute(
        &self,
        Parameters(params): Parameters<ExecuteParams>,
    ) -> Result<CallToolResult, McpError> {
        if params.code.trim().is_empty() {
            return Err(McpError::invalid_params("code must not be empty", None));
        }

        info!(
            language = ?params.language,
            code_len = params.code.len(),
            "Executing code"
        );

        let result = self
            .manager
            .execute_code(&params.code, params.language.as_deref(), params.timeout)
            .await;
        to_tool_result(&result)
    }

    /// List the languages whose runtimes were available at startup.
    #[tool(description = "List the languages that can be executed and the modules each advertises")]
    async fn list_languages(&self) -> Result<CallToolResult, McpError> {
        let languages = self.manager.list_executors();
        let entries: Vec<LanguageInfo<'_>> = languages
            .iter()
            .map(|language| LanguageInfo {
                language,
                allowed_modules: self
                    .manager
                    .executor(language)
                    .map(|executor| executor.allowed_modules())
                    .unwrap_or_default(),
            })
            .collect();
        let json = serde_json::to_string_pretty(&entries)
            .map_err(|e| McpError::internal_error(format!("Failed to serialize languages: {e}"), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    /// Guess the language of a snippet without running it.
    #[tool(description = "Detect the language of a code snippet without executing it")]
    async fn detect_language(
        &self,
        Parameters(params): Parameters<DetectParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.manager.detect_language(&params.code) {
            Some(language) => Ok(CallToolResult::success(vec![Content::text(language)])),
            None => Ok(CallToolResult::error(vec![Content::text(
                "Could not detect the language of the code",
            )])),
        }
    }
}

/// Serialize a result, flagging the tool call as failed unless it succeeded.
fn to_tool_result(result: &ExecutionResult) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(result)
        .map_err(|e| McpError::internal_error(format!("Failed to serialize result: {e}"), None))?;
    if result.is_success() {
        Ok(CallToolResult::success(vec![Content::text(json)]))
    } else {
        Ok(CallToolResult::error(vec![Content::text(json)]))
    }
}

#[tool_handler]
impl ServerHandler for SandboxServer {
    fn get_info(&self) -> ServerInfo {
        let languages = self.manager.list_executors();

        ServerInfo {
            protocol_version: rmcp::model::ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "code-sandbox".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(format!(
                "Execute short code snippets under a denylist and a timeout.\n\
                 Available languages: {languages:?}\n\
                 \n\
                 Use the 'execute' tool with:\n\
                 - code: the code to run\n\
                 - language: optional, one of {languages:?} (detected when omitted)\n\
                 - timeout: optional, in seconds"
            )),
        }
    }
}

/// Serve the sandbox server over stdio.
pub async fn serve_stdio(manager: Arc<ExecutionManager>) -> anyhow::Result<()> {
    let server = SandboxServer::new(manager);

    info!("Starting MCP server on stdio");

    let service = server
        .serve(stdio())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start MCP server: {e}"))?;

    service
        .waiting()
        .await
        .map_err(|e| anyhow::anyhow!("MCP server error: {e}"))?;

    Ok(())
}
