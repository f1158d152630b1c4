//! # Chadbot Broker
//!
//! The plugin broker: everything between the transport's frame stream and
//! the LLM router.
//!
//! ## Components
//!
//! - [`EventBus`]: subject-pattern pub/sub fan-out to [`EventSink`]s
//! - [`SkillRegistry`]: globally-unique skill table with owner back-references
//! - [`PendingRequestMap`]: request-ID correlation for in-flight skill calls
//! - [`PluginManager`]: plugin records and lifecycle cascade
//! - [`NamespacedStorage`]: per-plugin table operations over a [`TableStore`]
//! - [`PluginConfigStore`]: file-backed per-plugin config with live reload
//! - [`ChatService`]: chat persistence facade and LLM-turn orchestration
//! - [`StreamHandler`]: the per-connection frame dispatch state machine
//! - [`SkillBridge`]: presents registered skills to the router as tools
//!
//! ## Lifecycle coupling
//!
//! A plugin's skills, subscriptions, and pending requests live exactly as
//! long as its connection: [`PluginManager::unregister`] purges skills,
//! cancels pending invocations, and drops bus subscriptions before the
//! record disappears, so a lookup racing with a disconnect observes
//! "not found" rather than a dangling owner.

pub mod bus;
pub mod chat;
pub mod config_store;
pub mod manager;
pub mod memory;
pub mod pending;
pub mod registry;
pub mod skills;
pub mod storage;
pub mod stream;

pub use bus::{EventBus, EventSink, SinkError, SubscriptionId};
pub use chat::{ChatBroadcaster, ChatService, ChatServiceConfig, ChatStore, LlmTurn, NewMessage};
pub use config_store::{ConfigChangeListener, ConfigStoreError, PluginConfigStore, WatcherHandle};
pub use manager::{Plugin, PluginManager};
pub use memory::{MemoryChatStore, MemoryTableStore};
pub use pending::{PendingReply, PendingRequestMap, SkillOutcome};
pub use registry::{SkillEntry, SkillRegistry};
pub use skills::SkillBridge;
pub use storage::{NamespacedStorage, StorageHandlerCache, StorageOutcome, TableStore, namespace_prefix};
pub use stream::StreamHandler;
