//! Shared Fluxline message, error, and statistics types.
//!
//! This crate is dependency-boundary-safe for both the engine and embedding
//! applications: pure data types, no runtime machinery.

pub mod envelope;
pub mod error;
pub mod headers;
pub mod message;
pub mod metric;

pub use envelope::{DeadLetter, ErrorMessage};
pub use error::{BuildError, RuntimeError, ShutdownError};
pub use message::{Headers, Message, Payload};
pub use metric::{FlowSnapshot, FlowStats};
