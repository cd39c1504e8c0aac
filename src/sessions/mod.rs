//! Session lifecycle
//!
//! Persistence for anonymous visitor sessions, registered-user sessions, and
//! user accounts, plus the background sweeper that reclaims abandoned
//! anonymous sessions and their data.

pub mod store;
pub mod sweeper;

pub use store::{
    AnonymousSession, RegisteredSession, SessionProvenance, SessionStore, SessionStoreError,
    User,
};
pub use sweeper::{
    build_sweeper_config, sweep, sweeper_loop, SweepOutcome, SweeperConfig,
};

pub(crate) use store::now_millis;
