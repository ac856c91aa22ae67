//! Dynamic Sessions MCP Server
//!
//! Remote code interpreter sessions exposed via the Model Context Protocol.
//! Run with: cargo run

use dynamic_sessions_mcp::{
    auth::DefaultCredential,
    config::Config,
    tools::{files::SessionFileTools, ActiveTools, ToolContext, ToolRegistry},
    upload::{UploadRequest, UploadRouter},
};
use rmcp::{
    ErrorData as McpError,
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool,
    tool_handler,
    tool_router,
    transport::stdio,
};
use serde::Deserialize;
use schemars::JsonSchema;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PYTHON_TOOL: &str = "code_interpreter";
const NODEJS_TOOL: &str = "azure_dynamic_sessions_nodejs_interpreter";

// ========== Parameter Types ==========

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CodeParams {
    /// Code to execute
    pub code: String,
    /// Conversation ID (optional)
    pub conversation_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SessionUploadParams {
    /// Destination filename in the session
    pub remote_filename: String,
    /// File content, base64 encoded
    pub base64: String,
    /// Conversation ID (optional)
    pub conversation_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SessionDownloadParams {
    /// Filename in the session
    pub remote_filename: String,
    /// Local filename to save to, inside the download directory (optional)
    pub local_filename: Option<String>,
    /// Conversation ID (optional)
    pub conversation_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ConversationParams {
    /// Conversation ID (optional)
    pub conversation_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ChatUploadParams {
    /// Filename
    pub filename: String,
    /// File content, base64 or a data URL
    pub base64: String,
    /// Conversation ID (optional)
    pub conversation_id: Option<String>,
}

// ========== Server Implementation ==========

/// Dynamic Sessions MCP Server
#[derive(Clone)]
pub struct DynamicSessionsServer {
    tools: Arc<ActiveTools>,
    files: Arc<SessionFileTools>,
    uploads: Arc<UploadRouter>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl DynamicSessionsServer {
    pub fn new(tools: ActiveTools, files: SessionFileTools, uploads: UploadRouter) -> Self {
        Self {
            tools: Arc::new(tools),
            files: Arc::new(files),
            uploads: Arc::new(uploads),
            tool_router: Self::tool_router(),
        }
    }

    async fn run_interpreter(&self, tool: &str, p: CodeParams) -> Result<CallToolResult, McpError> {
        let args = serde_json::json!({ "code": p.code, "conversation_id": p.conversation_id });
        match self.tools.call(tool, args).await {
            Ok(value) => Ok(CallToolResult::success(vec![Content::text(value.to_string())])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }

    // ===== Interpreter Tools =====

    #[tool(description = "Execute Python code in a remote interpreter session. Images are returned as markdown links.")]
    async fn code_interpreter(&self, Parameters(p): Parameters<CodeParams>) -> Result<CallToolResult, McpError> {
        self.run_interpreter(PYTHON_TOOL, p).await
    }

    #[tool(description = "Execute JavaScript code in a remote Node.js interpreter session")]
    async fn nodejs_interpreter(&self, Parameters(p): Parameters<CodeParams>) -> Result<CallToolResult, McpError> {
        self.run_interpreter(NODEJS_TOOL, p).await
    }

    // ===== Session File Tools =====

    #[tool(description = "Upload a base64 encoded file into the interpreter session")]
    async fn sandbox_upload_file(&self, Parameters(p): Parameters<SessionUploadParams>) -> Result<CallToolResult, McpError> {
        match self.files.upload(p.remote_filename, p.base64, p.conversation_id).await {
            Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e)])),
        }
    }

    #[tool(description = "Download a file from the interpreter session")]
    async fn sandbox_download_file(&self, Parameters(p): Parameters<SessionDownloadParams>) -> Result<CallToolResult, McpError> {
        match self.files.download(p.remote_filename, p.local_filename, p.conversation_id).await {
            Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e)])),
        }
    }

    #[tool(description = "List files in the interpreter session")]
    async fn sandbox_list_files(&self, Parameters(p): Parameters<ConversationParams>) -> Result<CallToolResult, McpError> {
        match self.files.list(p.conversation_id).await {
            Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e)])),
        }
    }

    // ===== Chat Upload =====

    #[tool(description = "Upload a chat file attachment. It is indexed when a document index is configured, otherwise placed in the session.")]
    async fn upload_file(&self, Parameters(p): Parameters<ChatUploadParams>) -> Result<CallToolResult, McpError> {
        let request = UploadRequest {
            filename: p.filename,
            base64: p.base64,
            conversation_id: p.conversation_id,
        };
        match self.uploads.route(request).await {
            Ok(outcome) => match serde_json::to_string_pretty(&outcome) {
                Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
                Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
            },
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }
}

#[tool_handler]
impl ServerHandler for DynamicSessionsServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some("Remote Python and Node.js interpreter sessions with file upload and download.".into()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    tracing::info!("Starting Dynamic Sessions MCP Server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    let credentials = Arc::new(DefaultCredential::new());
    let pool = Arc::new(config.session_pool(credentials)?);

    let ctx = ToolContext {
        pool: pool.clone(),
        options: config.options,
    };
    let tools = ToolRegistry::builtin().build(&config.tools, &ctx);
    if tools.is_empty() {
        tracing::warn!("No interpreter tools enabled by DYNAMIC_SESSIONS_TOOLS");
    } else {
        tracing::info!("Enabled tools: {}", tools.names().join(", "));
    }

    let server = DynamicSessionsServer::new(
        tools,
        SessionFileTools::new(pool.clone(), &config.download_dir),
        UploadRouter::new(pool),
    );

    // Serve via stdio
    let service = server.serve(stdio()).await?;
    service.waiting().await?;

    Ok(())
}
