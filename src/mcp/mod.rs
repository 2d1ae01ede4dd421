//! MCP server exposing the query tools.
//!
//! Thin rmcp glue over `crate::tools`: request schemas, the tool router,
//! and JSON-serialized responses. The server speaks MCP over stdio and
//! works in both writer and read-only modes; write-shaped tools refuse on
//! read-only instances.

use std::sync::Arc;

use rmcp::{
    ServerHandler,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{ErrorData as McpError, *},
    schemars, tool, tool_handler, tool_router,
};
use serde::{Deserialize, Serialize};

use crate::runtime::ServerContext;
use crate::tools;

fn default_limit() -> usize {
    10
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct SearchCodeRequest {
    /// Natural language query describing the code you are looking for
    pub query: String,
    /// Maximum number of results to return (1-100)
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Filter results to a configured repository by name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Filter by language, e.g. "python", "go", "rust", "typescript"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Filter by entity type, e.g. "class", "function", "method", "import"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct FindSymbolRequest {
    /// Fully qualified symbol name, e.g. "my_module.MyClass.method"
    pub qualified_name: String,
    /// Include the full source text of the symbol
    #[serde(default)]
    pub include_source: bool,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct GetReferencesRequest {
    /// Fully qualified symbol name, e.g. "my_module.MyClass"
    pub qualified_name: String,
    /// Also include references FROM this symbol (calls, imports, type usage)
    #[serde(default)]
    pub include_outgoing: bool,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct FindUsagesRequest {
    /// Simple or qualified symbol name; simple names match by suffix
    pub symbol_name: String,
    /// Filter results to a configured repository by name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct GetIndexStatusRequest {
    /// Repository name; omit for all configured repositories
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct ReindexRepositoryRequest {
    /// Name of the repository to reindex
    pub repository: String,
    /// Reindex all files regardless of change detection and reset failures
    #[serde(default)]
    pub force: bool,
}

#[derive(Clone)]
pub struct CodeIntelligenceServer {
    context: Arc<ServerContext>,
    tool_router: ToolRouter<Self>,
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn tool_error(e: impl std::fmt::Display) -> McpError {
    McpError::internal_error(e.to_string(), None)
}

#[tool_router]
impl CodeIntelligenceServer {
    pub fn new(context: Arc<ServerContext>) -> Self {
        Self {
            context,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Search for code using semantic similarity. Returns matching entities \
                          ranked by relevance with file locations, signatures, and docstrings.")]
    pub async fn search_code(
        &self,
        Parameters(request): Parameters<SearchCodeRequest>,
    ) -> Result<CallToolResult, McpError> {
        let response = tools::search_code(
            &request.query,
            &self.context.embedder,
            &self.context.vectors,
            &self.context.state,
            request.limit,
            request.repository.as_deref(),
            request.language.as_deref(),
            request.entity_type.as_deref(),
        )
        .await
        .map_err(tool_error)?;
        json_result(&response)
    }

    #[tool(description = "Find a symbol by its fully qualified name, with suffix fallback. \
                          Returns location, visibility, signature, and optionally source code.")]
    pub async fn find_symbol(
        &self,
        Parameters(request): Parameters<FindSymbolRequest>,
    ) -> Result<CallToolResult, McpError> {
        let response = tools::find_symbol(
            &request.qualified_name,
            &self.context.graph,
            &self.context.state,
            request.include_source,
        )
        .await
        .map_err(tool_error)?;
        json_result(&response)
    }

    #[tool(description = "Get all references to a symbol: incoming by default, outgoing on \
                          request, with file locations and context snippets.")]
    pub async fn get_references(
        &self,
        Parameters(request): Parameters<GetReferencesRequest>,
    ) -> Result<CallToolResult, McpError> {
        let response = tools::get_symbol_references(
            &request.qualified_name,
            &self.context.graph,
            &self.context.state,
            request.include_outgoing,
        )
        .await
        .map_err(tool_error)?;
        json_result(&response)
    }

    #[tool(description = "Find all usages of a symbol by simple or qualified name, optionally \
                          restricted to one repository.")]
    pub async fn find_usages(
        &self,
        Parameters(request): Parameters<FindUsagesRequest>,
    ) -> Result<CallToolResult, McpError> {
        let response = tools::find_usages(
            &request.symbol_name,
            &self.context.graph,
            &self.context.state,
            request.repository.as_deref(),
        )
        .await
        .map_err(tool_error)?;
        json_result(&response)
    }

    #[tool(description = "Get indexing status: per-repository counts, pending and failed files, \
                          queue length, and the writer flag.")]
    pub async fn get_index_status(
        &self,
        Parameters(request): Parameters<GetIndexStatusRequest>,
    ) -> Result<CallToolResult, McpError> {
        let response = tools::get_index_status(
            &self.context.state,
            request.repository.as_deref(),
            self.context.is_writer(),
        )
        .await
        .map_err(tool_error)?;
        json_result(&response)
    }

    #[tool(description = "Queue a repository for reindexing. Force reindexes every file and \
                          resets failure counts. Refused on read-only instances.")]
    pub async fn reindex_repository(
        &self,
        Parameters(request): Parameters<ReindexRepositoryRequest>,
    ) -> Result<CallToolResult, McpError> {
        if !self.context.is_writer() {
            let refusal = crate::model::responses::ReindexResponse {
                repository: request.repository,
                status: "error".to_string(),
                files_queued: 0,
                message: Some(
                    "This server instance is read-only. Reindex is only available on the \
                     writer instance."
                        .to_string(),
                ),
            };
            return json_result(&refusal);
        }
        let response = tools::reindex_repository(
            &self.context.state,
            &self.context.indexer,
            &request.repository,
            request.force,
        )
        .await
        .map_err(tool_error)?;
        json_result(&response)
    }
}

#[tool_handler]
impl ServerHandler for CodeIntelligenceServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_protocol_version(ProtocolVersion::V_2024_11_05)
            .with_server_info(
                Implementation::new("mrcis", env!("CARGO_PKG_VERSION"))
                    .with_title("Multi-Repository Code Intelligence"),
            )
            .with_instructions(
                "This server indexes a configured set of source repositories and answers \
                 cross-repository code questions. Start with 'search_code' to find relevant \
                 entities, then 'find_symbol' for exact definitions. Use 'get_references' and \
                 'find_usages' to trace relationships across repositories, 'get_index_status' \
                 to check indexing progress, and 'reindex_repository' to refresh a repository.",
            )
    }
}

/// Serve MCP over stdio until the client disconnects.
pub async fn serve_stdio(context: Arc<ServerContext>) -> anyhow::Result<()> {
    use rmcp::{ServiceExt, transport::stdio};

    let server = CodeIntelligenceServer::new(context);
    let service = server.serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}
