//! Federated Memory MCP server library.
//!
//! The transport and tool surface over [`fedmem_core`]: JSON-RPC dispatch
//! with session lifecycle and tool gating, two HTTP transports (streamable
//! HTTP and token-in-URL SSE), the declarative tool catalog, and env-driven
//! configuration. The binary in `main.rs` wires these together; everything
//! here is also reachable from the end-to-end test crate.

pub mod config;
pub mod prompts;
pub mod protocol;
pub mod server;
pub mod session;
pub mod state;
pub mod tools;
pub mod wellknown;
