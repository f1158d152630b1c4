//! # Chadbot LLM
//!
//! Provider abstraction and the tool-calling loop.
//!
//! The broker is provider-agnostic: a [`Provider`] is anything that can turn
//! a transcript plus a tool list into a completion. Concrete HTTP adapters
//! (OpenAI, Anthropic, local servers) live outside this workspace and are
//! registered at runtime.
//!
//! [`LlmRouter`] drives the loop: ask the provider, execute any tool calls
//! through the [`ToolExecutor`] seam (the broker bridges these to plugin
//! skills), feed the replies back, repeat until the model answers without
//! tool calls. History is pruned between iterations so long tool sessions
//! cannot grow the transcript without bound.

pub mod provider;
pub mod prune;
pub mod router;

pub use provider::{Provider, ProviderRegistry, ProviderResponse};
pub use prune::prune_history;
pub use router::{ChatContext, ChatOutcome, LlmRouter, RouterConfig, ToolExecutor, ToolReply, ToolSource};
