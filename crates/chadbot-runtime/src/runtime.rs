//! Broker assembly and lifecycle.
//!
//! [`BrokerBuilder`] wires the construction graph explicitly, no globals:
//! every component receives its dependencies at build time:
//!
//! ```text
//! stores ─▶ registries (skills, pending, bus) ─▶ PluginManager
//!   │                                               │
//!   └─▶ ChatService ◀── LlmRouter ◀── SkillBridge ──┘
//!              │
//!        StreamHandler ◀── UnixServer (transport)
//! ```
//!
//! Startup is fatal on a broken plugin-config file or an unbindable socket;
//! everything after that degrades per request.

use std::sync::Arc;

use tracing::info;

use chadbot_broker::{
    ChatBroadcaster, ChatService, ChatServiceConfig, ChatStore, ConfigChangeListener, EventBus,
    MemoryChatStore, MemoryTableStore, PendingRequestMap, PluginConfigStore, PluginManager,
    SkillBridge, SkillRegistry, StorageHandlerCache, StreamHandler, TableStore, WatcherHandle,
};
use chadbot_llm::{LlmRouter, Provider, ProviderRegistry, RouterConfig};
use chadbot_transport::{ServerHandle, UnixServer, UnixServerConfig};

use crate::config::BrokerConfig;
use crate::error::RuntimeResult;

/// Forwards config-store changes to the owning plugin's stream.
struct ManagerConfigListener(Arc<PluginManager>);

impl ConfigChangeListener for ManagerConfigListener {
    fn config_changed(
        &self,
        plugin: &str,
        key: &str,
        value: &str,
        all_values: &std::collections::BTreeMap<String, String>,
    ) {
        self.0.notify_config_changed(plugin, key, value, all_values);
    }
}

/// Builder for a [`Broker`].
pub struct BrokerBuilder {
    config: BrokerConfig,
    chat_store: Option<Arc<dyn ChatStore>>,
    table_store: Option<Arc<dyn TableStore>>,
    providers: Vec<Arc<dyn Provider>>,
    broadcaster: Option<Arc<dyn ChatBroadcaster>>,
}

impl BrokerBuilder {
    /// Installs the chat persistence backend. Defaults to the in-memory
    /// store.
    pub fn with_chat_store(mut self, store: Arc<dyn ChatStore>) -> Self {
        self.chat_store = Some(store);
        self
    }

    /// Installs the table-storage backend. Defaults to the in-memory store.
    pub fn with_table_store(mut self, store: Arc<dyn TableStore>) -> Self {
        self.table_store = Some(store);
        self
    }

    /// Registers an LLM provider. The first one becomes the default.
    pub fn register_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Installs a broadcaster notified of every persisted chat message.
    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn ChatBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// Builds the component graph, binds the socket, and starts serving.
    pub async fn start(self) -> RuntimeResult<Broker> {
        let config = self.config;

        // ── Registries ─────────────────────────────────────────────────────
        let registry = Arc::new(SkillRegistry::new());
        let bus = Arc::new(EventBus::new());
        let pending = Arc::new(PendingRequestMap::new());
        let manager = Arc::new(PluginManager::new(registry, bus, pending));

        // ── LLM routing ────────────────────────────────────────────────────
        let bridge = Arc::new(SkillBridge::new(Arc::clone(&manager)));
        let providers = Arc::new(ProviderRegistry::new());
        for provider in self.providers {
            providers.register(provider);
        }
        let router = Arc::new(LlmRouter::new(
            Arc::clone(&providers),
            Arc::clone(&bridge) as _,
            bridge as _,
            RouterConfig {
                skill_timeout: config.limits.skill_timeout(),
                max_tool_result_bytes: config.limits.max_tool_result_bytes,
                keep_exchanges: config.limits.keep_exchanges,
                max_iterations: config.limits.max_iterations,
            },
        ));

        // ── Services ───────────────────────────────────────────────────────
        let chat_store = self
            .chat_store
            .unwrap_or_else(|| Arc::new(MemoryChatStore::new()));
        let mut chat = ChatService::new(
            chat_store,
            router,
            Arc::clone(manager.bus()),
            ChatServiceConfig {
                op_timeout: config.limits.chat_op_timeout(),
            },
        );
        if let Some(broadcaster) = self.broadcaster {
            chat = chat.with_broadcaster(broadcaster);
        }
        let chat = Arc::new(chat);

        let table_store = self
            .table_store
            .unwrap_or_else(|| Arc::new(MemoryTableStore::new()));
        let storage = Arc::new(StorageHandlerCache::new(table_store));

        // ── Plugin config (fatal when unreadable) ──────────────────────────
        let config_store = Arc::new(PluginConfigStore::load(&config.plugin_config_path)?);
        config_store.set_listener(Arc::new(ManagerConfigListener(Arc::clone(&manager))));
        let watcher = config_store.watch(config.limits.config_debounce())?;

        // ── Transport (fatal when unbindable) ──────────────────────────────
        let handler = Arc::new(StreamHandler::new(
            Arc::clone(&manager),
            storage,
            Arc::clone(&config_store),
            chat,
        ));
        let server = UnixServer::bind(
            UnixServerConfig {
                path: config.socket.path.clone(),
                fallback_path: config.socket.fallback_path.clone(),
                queue_capacity: config.socket.queue_capacity,
            },
            handler,
        )
        .await?;

        info!(
            socket = %server.path().display(),
            providers = providers.names().len(),
            "Broker started"
        );

        Ok(Broker {
            manager,
            providers,
            config_store,
            server,
            _watcher: watcher,
        })
    }
}

/// A running broker.
pub struct Broker {
    manager: Arc<PluginManager>,
    providers: Arc<ProviderRegistry>,
    config_store: Arc<PluginConfigStore>,
    server: ServerHandle,
    _watcher: WatcherHandle,
}

impl Broker {
    /// Starts building a broker from a validated config.
    pub fn builder(config: BrokerConfig) -> BrokerBuilder {
        BrokerBuilder {
            config,
            chat_store: None,
            table_store: None,
            providers: Vec::new(),
            broadcaster: None,
        }
    }

    pub fn manager(&self) -> &Arc<PluginManager> {
        &self.manager
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    pub fn config_store(&self) -> &Arc<PluginConfigStore> {
        &self.config_store
    }

    /// The socket path plugins should connect to.
    pub fn socket_path(&self) -> &std::path::Path {
        self.server.path()
    }

    /// Blocks until `ctrl-c`, then shuts down.
    pub async fn wait_for_shutdown(self) {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
        self.shutdown();
    }

    /// Stops the listener, closes every plugin stream, and drops the
    /// config watcher.
    pub fn shutdown(self) {
        info!("Broker shutting down");
        for plugin in self.manager.list() {
            plugin.stream.close();
        }
        self.server.stop();
    }
}
