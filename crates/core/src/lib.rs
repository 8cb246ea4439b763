//! Session daemon, snapshot/ref engine, and automation-engine plumbing.
//!
//! One daemon process serves one named session over a local socket,
//! owning a single [`engine::AutomationEngine`] instance and the
//! per-snapshot ref table. The [`registry`] module is the only component
//! that touches the shared runtime directory; everything else goes
//! through it.

pub mod client;
pub mod daemon;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod registry;
pub mod snapshot;

pub use error::{Error, Result};
