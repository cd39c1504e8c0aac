//! guestpass library
//!
//! Identity, quota, and migration for a content-analysis product: visitors
//! get an anonymous session with a bounded resource quota, registration
//! migrates their activity into a durable account, and a background sweeper
//! reclaims abandoned sessions together with everything they own.

pub mod cli;
pub mod config;
pub mod identity;
pub mod logging;
pub mod migration;
pub mod quota;
pub mod resources;
pub mod server;
pub mod sessions;
