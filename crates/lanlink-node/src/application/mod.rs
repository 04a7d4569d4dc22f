//! Application layer: the session engine and its externally observable
//! signals.

pub mod engine;
pub mod notifier;
