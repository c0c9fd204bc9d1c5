//! MCP JSON-RPC Types
//!
//! Core types for the JSON-RPC 2.0 protocol used by MCP, plus the error
//! codes this server reserves: `-32001` authentication required, `-32000`
//! session/transport, `-32602` invalid arguments, `-32603` internal.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use fedmem_core::MemoryError;

/// MCP spec version — "2025-03-26" is the latest official version
/// that includes Streamable HTTP transport support.
pub const MCP_VERSION: &str = "2025-03-26";

/// JSON-RPC version
pub const JSONRPC_VERSION: &str = "2.0";

// ============================================================================
// JSON-RPC REQUEST/RESPONSE
// ============================================================================

/// JSON-RPC Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// A request without an id is a notification.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Whether this response carries the authentication-required error.
    pub fn needs_auth(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(|e| e.code == ErrorCode::AuthRequired as i32)
    }
}

// ============================================================================
// JSON-RPC ERROR
// ============================================================================

/// JSON-RPC Error Codes (standard + reserved by this server)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Standard JSON-RPC errors
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InvalidParams = -32602,
    InternalError = -32603,

    // Reserved by this server
    SessionError = -32000,
    AuthRequired = -32001,
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code as i32
    }
}

/// JSON-RPC Error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    fn new(code: ErrorCode, message: &str) -> Self {
        Self {
            code: code.into(),
            message: message.to_string(),
            data: None,
        }
    }

    pub fn parse_error() -> Self {
        Self::new(ErrorCode::ParseError, "Parse error")
    }

    pub fn invalid_request(message: &str) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(ErrorCode::MethodNotFound, &format!("Method not found: {method}"))
    }

    pub fn invalid_params(message: &str) -> Self {
        let mut error = Self::new(ErrorCode::InvalidParams, message);
        error.data = Some(serde_json::json!({"kind": "InvalidArgument"}));
        error
    }

    pub fn internal_error(message: &str) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// `-32000 "Session ID required"` — any non-initialize message in a new
    /// session.
    pub fn session_required() -> Self {
        Self::new(ErrorCode::SessionError, "Session ID required")
    }

    pub fn session_closed() -> Self {
        Self::new(ErrorCode::SessionError, "Session closed")
    }

    /// `-32001` with an `oauth_required` payload pointing at the discovery
    /// document.
    pub fn auth_required(base_url: &str) -> Self {
        Self {
            code: ErrorCode::AuthRequired.into(),
            message: "Authentication required".to_string(),
            data: Some(serde_json::json!({
                "kind": "AuthenticationRequired",
                "oauth_required": true,
                "resource_metadata":
                    format!("{base_url}/.well-known/oauth-protected-resource"),
            })),
        }
    }

    /// Map an engine error onto the reserved wire codes. Every payload
    /// carries `data.kind` so clients can branch without string matching.
    pub fn from_memory_error(error: &MemoryError, base_url: &str) -> Self {
        match error {
            MemoryError::AuthenticationRequired => Self::auth_required(base_url),
            MemoryError::InvalidArgument(_) => {
                let mut e = Self::new(ErrorCode::InvalidParams, &error.to_string());
                e.data = Some(serde_json::json!({"kind": error.kind()}));
                e
            }
            MemoryError::Cancelled => {
                let mut e = Self::new(ErrorCode::SessionError, &error.to_string());
                e.data = Some(serde_json::json!({"kind": error.kind()}));
                e
            }
            _ => {
                let mut e = Self::new(ErrorCode::InternalError, &error.to_string());
                e.data = Some(serde_json::json!({"kind": error.kind()}));
                e
            }
        }
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcError {}

// ============================================================================
// TESTS
// ============================================================================
