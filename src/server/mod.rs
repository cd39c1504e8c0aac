//! HTTP surface
//!
//! A thin axum layer over the identity, quota, and migration components.
//! Routing and presentation beyond these seams belong to the surrounding
//! product, not this subsystem.

pub mod http;

pub use http::{build_router, build_server_config, serve, AppState, ServerConfig};
