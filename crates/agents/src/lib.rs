//! Agent registry for Agentmux.
//!
//! Cross-references the normalized catalog against the credentials
//! actually present in the environment to decide which agents are
//! *usable*. Every skip decision is recorded as a structured status entry
//! with a reason, so callers can always introspect why an agent is
//! unavailable, and registry construction never fails (zero active agents
//! is a valid, observable state).

pub mod env;
pub mod registry;

pub use env::{EnvSource, MapEnv, ProcessEnv};
pub use registry::{
    AgentRecord, AgentRegistry, AgentStatus, AvailableModel, SharedRegistry,
};
