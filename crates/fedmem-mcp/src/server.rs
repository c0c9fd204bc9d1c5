//! MCP Server Core
//!
//! One `McpServer` per session: the JSON-RPC dispatcher with the session
//! state machine, tool gating, schema validation, and per-call deadlines.
//! The transports own I/O; this type owns semantics.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use fedmem_core::{MemoryError, UserContext};

use crate::prompts;
use crate::protocol::messages::{
    CallToolRequest, CallToolResult, GetPromptRequest, InitializeRequest, InitializeResult,
    ListPromptsResult, ListToolsResult, ServerCapabilities, ServerInfo, ToolDescription,
};
use crate::protocol::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_VERSION};
use crate::state::AppState;
use crate::tools::{self, Visibility};

/// Session lifecycle. `initialize` is the only legal first message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    New,
    Initialized,
    Active,
    Closed,
}

/// Per-session MCP dispatcher.
pub struct McpServer {
    state: Arc<AppState>,
    user: Option<UserContext>,
    phase: SessionPhase,
    cancel: CancellationToken,
}

impl McpServer {
    pub fn new(
        state: Arc<AppState>,
        user: Option<UserContext>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            state,
            user,
            phase: SessionPhase::New,
            cancel,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn user(&self) -> Option<&UserContext> {
        self.user.as_ref()
    }

    pub fn close(&mut self) {
        self.phase = SessionPhase::Closed;
    }

    /// Handle one JSON-RPC message. `None` means no response (notification).
    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!(method = %request.method, "handling request");

        if self.phase == SessionPhase::Closed {
            if request.is_notification() {
                return None;
            }
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::session_closed(),
            ));
        }

        // Any non-initialize message before initialize is a transport error.
        if self.phase == SessionPhase::New
            && request.method != "initialize"
            && request.method != "notifications/initialized"
        {
            warn!(method = %request.method, "message before initialize");
            if request.is_notification() {
                return None;
            }
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::session_required(),
            ));
        }

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params),
            "notifications/initialized" => {
                self.phase = SessionPhase::Active;
                return None;
            }
            "ping" => Ok(serde_json::json!({})),
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(request.params).await,
            "prompts/list" => self.handle_prompts_list(),
            "prompts/get" => self.handle_prompts_get(request.params),
            method => Err(JsonRpcError::method_not_found(method)),
        };

        Some(match result {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(error) => JsonRpcResponse::error(request.id, error),
        })
    }

    fn handle_initialize(
        &mut self,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, JsonRpcError> {
        let request: InitializeRequest = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => InitializeRequest::default(),
        };

        // Version negotiation: accept an older client version rather than
        // advertising one it will reject.
        let negotiated = if request.protocol_version.as_str() < MCP_VERSION {
            request.protocol_version.clone()
        } else {
            MCP_VERSION.to_string()
        };

        self.phase = SessionPhase::Initialized;
        tracing::info!(
            protocol_version = %negotiated,
            authenticated = self.user.is_some(),
            "session initialized"
        );

        let result = InitializeResult {
            protocol_version: negotiated,
            server_info: ServerInfo::default(),
            capabilities: ServerCapabilities::default(),
            instructions: Some(
                "Federated memory across topical modules (technical, personal, work, \
                 learning, communication, creative). storeMemory routes writes by metadata \
                 and content; searchMemory fans out across modules and re-ranks by \
                 full-resolution similarity. listModules and getModuleStats work without \
                 credentials; everything else requires authentication."
                    .to_string(),
            ),
        };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    fn handle_tools_list(&self) -> Result<serde_json::Value, JsonRpcError> {
        let tools: Vec<ToolDescription> = tools::CATALOG
            .iter()
            .map(|tool| ToolDescription {
                name: tool.name.to_string(),
                title: tool.title.to_string(),
                description: tool.description.to_string(),
                input_schema: (tool.schema)(),
            })
            .collect();
        serde_json::to_value(ListToolsResult { tools })
            .map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    async fn handle_tools_call(
        &self,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, JsonRpcError> {
        let request: CallToolRequest = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => return Err(JsonRpcError::invalid_params("Missing tool call parameters")),
        };

        let base_url = &self.state.config.base_url;
        let Some(tool) = tools::find(&request.name) else {
            return Err(JsonRpcError::invalid_params(&format!(
                "unknown tool: {}",
                request.name
            )));
        };

        // Visibility gating happens before any handler runs.
        if tool.visibility == Visibility::Private && self.user.is_none() {
            return Err(JsonRpcError::auth_required(base_url));
        }

        let deadline = self.state.config.tool_deadline;
        let invocation = tools::dispatch(
            &self.state,
            self.user.as_ref(),
            &request.name,
            request.arguments,
            &self.cancel,
        );

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(MemoryError::Cancelled),
            outcome = tokio::time::timeout(deadline, invocation) => match outcome {
                Ok(result) => result,
                Err(_) => Err(MemoryError::Cancelled),
            },
        };

        match outcome {
            Ok(value) => serde_json::to_value(CallToolResult::json(&value))
                .map_err(|e| JsonRpcError::internal_error(&e.to_string())),
            Err(error) => {
                debug!(tool = %request.name, kind = error.kind(), "tool call failed");
                Err(JsonRpcError::from_memory_error(&error, base_url))
            }
        }
    }

    fn handle_prompts_list(&self) -> Result<serde_json::Value, JsonRpcError> {
        serde_json::to_value(ListPromptsResult {
            prompts: prompts::list(),
        })
        .map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    fn handle_prompts_get(
        &self,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, JsonRpcError> {
        let request: GetPromptRequest = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => return Err(JsonRpcError::invalid_params("Missing prompt parameters")),
        };
        match prompts::get(&request.name, request.arguments.as_ref()) {
            Some(result) => serde_json::to_value(result)
                .map_err(|e| JsonRpcError::internal_error(&e.to_string())),
            None => Err(JsonRpcError::invalid_params(&format!(
                "unknown prompt: {}",
                request.name
            ))),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
