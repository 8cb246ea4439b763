//! Wire types for the agent-browser daemon protocol.
//!
//! This crate contains the serde-serializable types exchanged between the
//! client and the session daemon. Each request and each response is one
//! UTF-8 JSON document terminated by a single newline byte.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: no behavior beyond serialization, deserialization, and
//!   parse-time validation
//! * 1:1 with the wire: field names match what goes over the socket
//!
//! The daemon, the dispatch logic, and the snapshot engine live in
//! `ab-core` and are built on top of these types.

pub mod command;
pub mod error;
pub mod response;
pub mod snapshot;

pub use command::*;
pub use error::*;
pub use response::*;
pub use snapshot::*;
