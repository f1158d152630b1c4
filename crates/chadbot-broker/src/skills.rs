//! Bridge between the LLM router and plugin skills.
//!
//! Implements the router's two seams: [`ToolSource`] (snapshot the skill
//! registry as tool descriptors, collect plugin documentation) and
//! [`ToolExecutor`] (correlated `SkillInvoke` / `SkillResponse` round-trip
//! over the owning plugin's stream).

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use chadbot_core::chat::{DeferredAttachment, ToolCall, ToolDescriptor};
use chadbot_core::error::{BrokerError, BrokerResult};
use chadbot_core::protocol::{InvokeContext, OutboundFrame};
use chadbot_llm::{ChatContext, ToolExecutor, ToolReply, ToolSource};

use crate::manager::PluginManager;
use crate::pending::PendingRequestMap;
use crate::registry::SkillRegistry;

/// Presents registered skills as tools and executes calls against their
/// owning plugins.
pub struct SkillBridge {
    registry: Arc<SkillRegistry>,
    manager: Arc<PluginManager>,
    pending: Arc<PendingRequestMap>,
}

impl SkillBridge {
    pub fn new(manager: Arc<PluginManager>) -> Self {
        Self {
            registry: Arc::clone(manager.registry()),
            pending: Arc::clone(manager.pending()),
            manager,
        }
    }
}

impl ToolSource for SkillBridge {
    fn tools(&self) -> Vec<ToolDescriptor> {
        self.registry
            .snapshot()
            .iter()
            .map(|entry| ToolDescriptor::from(&entry.skill))
            .collect()
    }

    fn plugin_docs(&self) -> Vec<(String, String)> {
        self.registry
            .plugins_with_skills()
            .into_iter()
            .filter_map(|name| {
                let plugin = self.manager.get_by_name(&name)?;
                let docs = plugin.documentation?;
                Some((name, docs))
            })
            .collect()
    }
}

#[async_trait]
impl ToolExecutor for SkillBridge {
    /// Looks up the skill, sends a `SkillInvoke` on the owning plugin's
    /// stream, and waits for the correlated response. The wait ends early
    /// when `cancel` fires or the plugin disconnects (its pending entries
    /// are swept on unregister); the router's own deadline bounds the rest.
    async fn execute(
        &self,
        call: &ToolCall,
        ctx: &ChatContext,
        cancel: &CancellationToken,
    ) -> BrokerResult<ToolReply> {
        let entry = self
            .registry
            .lookup(&call.name)
            .ok_or_else(|| BrokerError::SkillNotFound(call.name.clone()))?;
        let plugin = self
            .manager
            .get(&entry.plugin_id)
            .ok_or(BrokerError::PluginDisconnected)?;

        let request_id = self.pending.next_request_id();
        let reply = self.pending.register(&request_id, &plugin.id);

        debug!(
            skill = %call.name,
            plugin = %plugin.name,
            request_id = %request_id,
            "Invoking skill"
        );

        let frame = OutboundFrame::SkillInvoke {
            request_id: request_id.clone(),
            skill_name: call.name.clone(),
            arguments: call.arguments.clone(),
            context: Some(InvokeContext {
                chat_id: ctx.chat_id.clone(),
                user_id: ctx.user_id.clone(),
            }),
        };
        if plugin.stream.send(frame).await.is_err() {
            return Err(BrokerError::PluginDisconnected);
        }

        let outcome = tokio::select! {
            r = reply.wait() => r?,
            () = cancel.cancelled() => {
                self.pending.cancel(&request_id);
                return Err(BrokerError::Cancelled);
            }
        };

        if !outcome.success {
            let reason = if outcome.error.is_empty() {
                format!("skill '{}' failed", call.name)
            } else {
                outcome.error
            };
            return Err(BrokerError::SkillFailed(reason));
        }

        let deferred = if outcome.attachments.is_empty() {
            Vec::new()
        } else {
            vec![DeferredAttachment {
                content: String::new(),
                attachments: outcome.attachments,
            }]
        };
        Ok(ToolReply {
            content: outcome.result,
            deferred,
        })
    }
}
