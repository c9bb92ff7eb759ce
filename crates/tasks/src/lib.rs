//! Task execution engine for Agentmux.
//!
//! Composable workflows on top of the dispatch layer: single tasks
//! (fast or plan-then-execute), iterative agent review, human-gated
//! review, multi-agent brainstorming, and operator selection. Model
//! replies that were asked to be JSON go through a two-stage parser that
//! tolerates prose wrapping; where a reply shape can't be recovered the
//! workflow degrades instead of failing wherever the contract allows it.

pub mod engine;
pub mod gate;
pub mod parse;

pub use engine::{ModePreference, OperatorChoice, RankedIdea, TaskEngine, TaskRequest};
pub use gate::{ApprovalGate, StdioGate, Verdict};
