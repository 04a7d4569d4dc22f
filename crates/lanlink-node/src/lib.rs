//! lanlink-node library entry point.
//!
//! Re-exports the module tree so integration tests in `tests/` and the
//! binary in `main.rs` share it. The engine's public surface is
//! [`application::engine::SessionEngine`]; everything under
//! `infrastructure` is plumbing it drives.

pub mod application;
pub mod infrastructure;

pub use application::engine::{EngineConfig, EngineError, SessionEngine, SessionState};
pub use application::notifier::EventNotifier;
