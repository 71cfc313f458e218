//! Agent framework for autonomous task execution
//!
//! Implements the ask-model, dispatch-tools, feed-back loop.

mod agent_loop;
mod state;

pub use agent_loop::{AgentLoop, AgentOutcome};
pub use state::{AbortReason, AgentConfig, AgentState, LoopStatus, DEFAULT_SYSTEM_PROMPT, MAX_ITERATIONS_NOTICE};
