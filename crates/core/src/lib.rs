//! # Agentmux Core
//!
//! Domain types, traits, and error definitions for the Agentmux
//! agent/provider orchestration engine. This crate has no network or
//! runtime dependencies; it defines the domain model that all other
//! crates implement against.
//!
//! ## Design Philosophy
//!
//! Every seam is a trait defined here (`ProviderAdapter`, `Operator`).
//! Implementations live in their respective crates. This enables:
//! - Swapping provider backends without touching orchestration code
//! - Easy testing with scripted mock adapters
//! - Clean dependency graph (all crates depend inward on core)

pub mod adapter;
pub mod cancel;
pub mod error;
pub mod message;
pub mod operator;

// Re-export key types at crate root for ergonomics
pub use adapter::{AdapterRequest, ProviderAdapter, WireMessage};
pub use cancel::CancelScope;
pub use error::{AgentError, DispatchError, Error, OperatorError, Result, TaskError};
pub use message::{Conversation, Message, Role};
pub use operator::{FnOperator, Operator, OperatorCatalog};
