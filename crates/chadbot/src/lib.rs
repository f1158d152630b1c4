//! # Chadbot
//!
//! A pluggable chat-assistant backend: user messages are routed through an
//! LLM provider, and the model can call "skills" exposed by out-of-process
//! plugins connected over a Unix domain socket.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   one stream    ┌────────────────────────┐
//! │ plugin A ├────────────────▶│        Broker          │
//! └──────────┘  (unix socket)  │  StreamHandler         │   ┌──────────┐
//! ┌──────────┐                 │  SkillRegistry  ───────┼──▶│ LlmRouter│──▶ Provider
//! │ plugin B ├────────────────▶│  EventBus              │   └──────────┘
//! └──────────┘                 │  NamespacedStorage     │
//!                              │  PluginConfigStore     │
//!                              └────────────────────────┘
//! ```
//!
//! - **chadbot-core**: wire protocol, data model, connection seams
//! - **chadbot-broker**: registries, event fan-out, storage namespacing,
//!   per-connection frame dispatch
//! - **chadbot-llm**: provider abstraction and the tool-calling loop
//! - **chadbot-transport**: the Unix-socket frame server
//! - **chadbot-runtime**: config, logging, and the construction graph
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use chadbot::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BrokerConfig::load_from_file("chadbot.toml")?;
//!     chadbot::logging::init_from_config(&config.logging);
//!
//!     let broker = Broker::builder(config)
//!         .register_provider(my_provider())   // any impl of `Provider`
//!         .start()
//!         .await?;
//!
//!     broker.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

// Core types
pub use chadbot_core::*;

// Broker, router, transport, runtime
pub use chadbot_broker;
pub use chadbot_llm;
pub use chadbot_runtime;
pub use chadbot_transport;

pub use chadbot_runtime::logging;

/// Prelude module for convenient imports.
pub mod prelude {
    // Runtime - main entry point
    pub use chadbot_runtime::{Broker, BrokerConfig};

    // Provider seam for LLM adapters
    pub use chadbot_llm::{Provider, ProviderResponse};

    // Persistence seams for real backends
    pub use chadbot_broker::{ChatBroadcaster, ChatStore, TableStore};

    // Common wire and data types
    pub use chadbot_core::{
        ChatMessage, ConfigField, Event, EventData, InboundFrame, OutboundFrame, Role, Skill,
        ToolCall, ToolDescriptor,
    };
}
