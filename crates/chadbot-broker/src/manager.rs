//! Plugin records and lifecycle.
//!
//! [`PluginManager`] is the exclusive owner of [`Plugin`] records: one per
//! active stream, created on `Register`, destroyed on stream close. It holds
//! the skill registry, event bus, and pending-request map so that
//! destruction can cascade in a safe order: skills first, then outstanding
//! invocations, then bus subscriptions, then the record itself. A skill
//! lookup racing with an unregister therefore observes "not found" rather
//! than resolving to a dead plugin.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use chadbot_core::config::ConfigField;
use chadbot_core::connection::PluginStream;
use chadbot_core::error::{BrokerError, BrokerResult};
use chadbot_core::event::Event;
use chadbot_core::protocol::OutboundFrame;

use crate::bus::{EventBus, EventSink, SinkError, SubscriptionId};
use crate::pending::PendingRequestMap;
use crate::registry::SkillRegistry;

// =============================================================================
// Plugin record
// =============================================================================

/// One connected plugin.
#[derive(Debug, Clone)]
pub struct Plugin {
    /// Broker-assigned id, stable for the connection's lifetime.
    pub id: String,
    /// Self-declared name, stable across reconnects. Storage namespaces and
    /// config values key on this.
    pub name: String,
    pub version: String,
    pub description: String,
    /// Outbound half of the plugin's stream.
    pub stream: PluginStream,
    /// Subject patterns this plugin subscribed to.
    pub subscriptions: Vec<String>,
    /// Declared config schema, when the plugin sent one.
    pub config_schema: Option<Vec<ConfigField>>,
    /// Documentation blob for the LLM system prompt.
    pub documentation: Option<String>,
    bus_subscription: Option<SubscriptionId>,
}

/// Delivers bus events onto a plugin stream without blocking the publisher.
struct StreamSink(PluginStream);

impl EventSink for StreamSink {
    fn deliver(&self, event: &Event) -> Result<(), SinkError> {
        if self.0.is_closed() {
            return Err(SinkError::Closed);
        }
        self.0
            .try_send(OutboundFrame::EventDispatch {
                event: event.clone(),
            })
            .map_err(|e| match e {
                chadbot_core::error::TransportError::QueueFull => SinkError::Full,
                _ => SinkError::Closed,
            })
    }
}

// =============================================================================
// PluginManager
// =============================================================================

/// Registry of connected plugins and the owner of their lifecycle.
pub struct PluginManager {
    plugins: RwLock<HashMap<String, Plugin>>,
    registry: Arc<SkillRegistry>,
    bus: Arc<EventBus>,
    pending: Arc<PendingRequestMap>,
    next_id: AtomicU64,
}

impl PluginManager {
    pub fn new(
        registry: Arc<SkillRegistry>,
        bus: Arc<EventBus>,
        pending: Arc<PendingRequestMap>,
    ) -> Self {
        Self {
            plugins: RwLock::new(HashMap::new()),
            registry,
            bus,
            pending,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &Arc<SkillRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn pending(&self) -> &Arc<PendingRequestMap> {
        &self.pending
    }

    /// Creates a plugin record for a freshly registered connection and
    /// returns its broker-assigned id.
    ///
    /// A name collision with a *live* plugin is rejected; a leftover record
    /// whose stream already closed is replaced (reconnect before the old
    /// connection's teardown finished).
    pub fn register(
        &self,
        name: &str,
        version: &str,
        description: &str,
        stream: PluginStream,
    ) -> BrokerResult<String> {
        // Check-and-insert under one write lock so two racing registrations
        // of the same name cannot both pass the collision check.
        let mut plugins = self.plugins.write();
        let existing = plugins
            .values()
            .find(|p| p.name == name)
            .map(|p| (p.id.clone(), p.stream.is_closed()));
        if let Some((stale_id, closed)) = existing {
            if !closed {
                return Err(BrokerError::DuplicatePlugin(name.to_string()));
            }
            warn!(plugin = %name, stale_id = %stale_id, "Replacing stale plugin record");
            if let Some(stale) = plugins.remove(&stale_id) {
                self.teardown(&stale_id, stale);
            }
        }

        let id = format!("plugin-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let plugin = Plugin {
            id: id.clone(),
            name: name.to_string(),
            version: version.to_string(),
            description: description.to_string(),
            stream,
            subscriptions: Vec::new(),
            config_schema: None,
            documentation: None,
            bus_subscription: None,
        };
        plugins.insert(id.clone(), plugin);
        info!(plugin = %name, plugin_id = %id, version = %version, "Plugin registered");
        Ok(id)
    }

    /// Destroys a plugin record, cascading: skills purged, pending
    /// invocations cancelled, bus subscription dropped.
    pub fn unregister(&self, plugin_id: &str) {
        let Some(plugin) = self.plugins.write().remove(plugin_id) else {
            return;
        };
        self.teardown(plugin_id, plugin);
    }

    /// Cascade for a record already removed from the map. Ordering matters:
    /// skills go first, so a lookup racing with this sees "not found" rather
    /// than a skill owned by a dead plugin.
    fn teardown(&self, plugin_id: &str, plugin: Plugin) {
        let skills = self.registry.unregister_all_of(plugin_id);
        let cancelled = self.pending.cancel_for_plugin(plugin_id);
        if let Some(sub) = plugin.bus_subscription {
            self.bus.unsubscribe(sub);
        }
        info!(
            plugin = %plugin.name,
            plugin_id = %plugin_id,
            skills,
            cancelled_requests = cancelled,
            "Plugin unregistered"
        );
    }

    pub fn get(&self, plugin_id: &str) -> Option<Plugin> {
        self.plugins.read().get(plugin_id).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<Plugin> {
        self.plugins
            .read()
            .values()
            .find(|p| p.name == name)
            .cloned()
    }

    /// Snapshot of all connected plugins, sorted by id.
    pub fn list(&self) -> Vec<Plugin> {
        let mut plugins: Vec<Plugin> = self.plugins.read().values().cloned().collect();
        plugins.sort_by(|a, b| a.id.cmp(&b.id));
        plugins
    }

    pub fn count(&self) -> usize {
        self.plugins.read().len()
    }

    /// Appends subject patterns to the plugin's subscription list and
    /// installs (or extends) its bus subscription. The subscription delivers
    /// `EventDispatch` frames onto the plugin's stream and lives exactly as
    /// long as the record.
    pub fn subscribe_events(&self, plugin_id: &str, subjects: Vec<String>) -> BrokerResult<()> {
        let mut plugins = self.plugins.write();
        let plugin = plugins
            .get_mut(plugin_id)
            .ok_or_else(|| BrokerError::PluginNotFound(plugin_id.to_string()))?;

        plugin.subscriptions.extend(subjects.iter().cloned());
        match plugin.bus_subscription {
            Some(sub) => {
                self.bus.add_patterns(sub, subjects);
            }
            None => {
                let sink = Arc::new(StreamSink(plugin.stream.clone()));
                plugin.bus_subscription = Some(self.bus.subscribe(subjects, sink));
            }
        }
        debug!(plugin = %plugin.name, subscriptions = plugin.subscriptions.len(), "Event subscription updated");
        Ok(())
    }

    pub fn set_config_schema(&self, plugin_id: &str, fields: Vec<ConfigField>) -> BrokerResult<()> {
        let mut plugins = self.plugins.write();
        let plugin = plugins
            .get_mut(plugin_id)
            .ok_or_else(|| BrokerError::PluginNotFound(plugin_id.to_string()))?;
        plugin.config_schema = Some(fields);
        Ok(())
    }

    pub fn set_documentation(&self, plugin_id: &str, markdown: String) -> BrokerResult<()> {
        let mut plugins = self.plugins.write();
        let plugin = plugins
            .get_mut(plugin_id)
            .ok_or_else(|| BrokerError::PluginNotFound(plugin_id.to_string()))?;
        plugin.documentation = Some(markdown);
        Ok(())
    }

    /// Pushes a `ConfigChanged` frame to the named plugin. A no-op when the
    /// plugin is not connected; the value itself is already persisted.
    pub fn notify_config_changed(
        &self,
        plugin_name: &str,
        key: &str,
        value: &str,
        all_values: &BTreeMap<String, String>,
    ) {
        let Some(plugin) = self.get_by_name(plugin_name) else {
            debug!(plugin = %plugin_name, key = %key, "Config changed for disconnected plugin");
            return;
        };
        let frame = OutboundFrame::ConfigChanged {
            key: key.to_string(),
            value: value.to_string(),
            all_values: all_values.clone(),
        };
        if let Err(e) = plugin.stream.try_send(frame) {
            warn!(plugin = %plugin_name, error = %e, "Failed to push config change");
        }
    }
}
