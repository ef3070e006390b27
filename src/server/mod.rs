//! Server module
//!
//! HTTP router, security headers and startup/shutdown plumbing.

pub mod headers;
pub mod http;
pub mod startup;

pub use http::{create_router, HttpConfig};
pub use startup::{run_server_with_config, ServerConfig, ServerHandle};
