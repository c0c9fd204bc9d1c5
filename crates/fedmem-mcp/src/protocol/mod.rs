//! MCP Protocol Implementation
//!
//! JSON-RPC 2.0 over two equivalent HTTP transports with byte-identical
//! payloads: Streamable HTTP (`/mcp` + `mcp-session-id` header) and
//! token-in-URL SSE (`/{token}/sse` + per-session message endpoint).

pub mod http;
pub mod messages;
pub mod sse;
pub mod types;

/// Header carrying the session id on the streamable HTTP transport.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";
