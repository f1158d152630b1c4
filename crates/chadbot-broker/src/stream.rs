//! Per-connection frame dispatch.
//!
//! [`StreamHandler`] is the broker's [`FrameHandler`]: one session per
//! accepted connection, moving `AwaitRegister → Active` on the first
//! `Register` frame and torn down on disconnect. Frames in `AwaitRegister`
//! other than `Register` get `Error{code:1}`.
//!
//! Everything in the dispatch table runs inline on the connection's reader
//! task except `ChatLlmRequest`, which is spawned onto a worker task so a
//! multi-second LLM turn cannot stall the plugin's frame stream. The turn's
//! cancellation is tied to the connection, so a disconnecting requester
//! abandons its turn.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use chadbot_core::chat::Role;
use chadbot_core::connection::{ConnectionId, FrameHandler, PluginStream};
use chadbot_core::protocol::{InboundFrame, OutboundFrame, StorageOp};

use crate::chat::{ChatService, NewMessage};
use crate::config_store::PluginConfigStore;
use crate::manager::PluginManager;
use crate::pending::SkillOutcome;
use crate::storage::StorageHandlerCache;

enum Session {
    AwaitRegister(PluginStream),
    Active {
        stream: PluginStream,
        plugin_id: String,
    },
}

/// The broker-side connection state machine.
pub struct StreamHandler {
    manager: Arc<PluginManager>,
    storage: Arc<StorageHandlerCache>,
    config_store: Arc<PluginConfigStore>,
    chat: Arc<ChatService>,
    sessions: RwLock<HashMap<ConnectionId, Session>>,
}

impl StreamHandler {
    pub fn new(
        manager: Arc<PluginManager>,
        storage: Arc<StorageHandlerCache>,
        config_store: Arc<PluginConfigStore>,
        chat: Arc<ChatService>,
    ) -> Self {
        Self {
            manager,
            storage,
            config_store,
            chat,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn manager(&self) -> &Arc<PluginManager> {
        &self.manager
    }

    async fn send(&self, stream: &PluginStream, frame: OutboundFrame) {
        if let Err(e) = stream.send(frame).await {
            debug!(conn = %stream.id(), error = %e, "Failed to send frame");
        }
    }

    async fn handle_register(
        &self,
        id: ConnectionId,
        stream: PluginStream,
        name: String,
        version: String,
        description: String,
    ) {
        match self.manager.register(&name, &version, &description, stream.clone()) {
            Ok(plugin_id) => {
                self.sessions.write().insert(
                    id,
                    Session::Active {
                        stream: stream.clone(),
                        plugin_id: plugin_id.clone(),
                    },
                );
                self.send(
                    &stream,
                    OutboundFrame::RegisterResponse {
                        success: true,
                        plugin_id,
                        error: String::new(),
                    },
                )
                .await;
            }
            Err(e) => {
                warn!(plugin = %name, error = %e, "Registration rejected");
                self.send(
                    &stream,
                    OutboundFrame::RegisterResponse {
                        success: false,
                        plugin_id: String::new(),
                        error: e.to_string(),
                    },
                )
                .await;
                stream.close();
            }
        }
    }

    async fn handle_active(
        &self,
        stream: PluginStream,
        plugin_id: String,
        frame: InboundFrame,
    ) {
        match frame {
            InboundFrame::Register { name, .. } => {
                // Double registration on one connection.
                warn!(plugin_id = %plugin_id, name = %name, "Register on active connection");
                self.send(
                    &stream,
                    OutboundFrame::Error {
                        code: 0,
                        message: "already registered".into(),
                    },
                )
                .await;
            }

            InboundFrame::SkillRegister { skills } => {
                let plugin_name = match self.manager.get(&plugin_id) {
                    Some(p) => p.name,
                    None => return,
                };
                for skill in skills {
                    if let Err(e) =
                        self.manager
                            .registry()
                            .register(&plugin_id, &plugin_name, skill)
                    {
                        warn!(error = %e, "Skill registration rejected");
                        self.send(
                            &stream,
                            OutboundFrame::Error {
                                code: 0,
                                message: e.to_string(),
                            },
                        )
                        .await;
                    }
                }
            }

            InboundFrame::EventSubscribe { subjects } => {
                if let Err(e) = self.manager.subscribe_events(&plugin_id, subjects) {
                    debug!(plugin_id = %plugin_id, error = %e, "Event subscribe failed");
                }
            }

            InboundFrame::EventEmit { mut event } => {
                event.source_plugin = plugin_id.clone();
                self.manager.bus().publish(&event);
            }

            InboundFrame::SkillResponse {
                request_id,
                success,
                result,
                error,
                attachments,
            } => {
                let delivered = self.manager.pending().resolve(
                    &request_id,
                    SkillOutcome {
                        success,
                        result,
                        error,
                        attachments,
                    },
                );
                if !delivered {
                    debug!(request_id = %request_id, "Late or unknown skill response dropped");
                }
            }

            InboundFrame::StorageRequest { request_id, op } => {
                self.handle_storage(&stream, &plugin_id, request_id, op).await;
            }

            InboundFrame::ChatGetOrCreate {
                request_id,
                platform,
                linked_id,
                name,
            } => {
                let frame = match self.chat.get_or_create(&platform, &linked_id, &name).await {
                    Ok((chat, created)) => OutboundFrame::ChatGetOrCreateResponse {
                        request_id,
                        success: true,
                        chat_id: chat.id,
                        created,
                        error: String::new(),
                    },
                    Err(e) => OutboundFrame::ChatGetOrCreateResponse {
                        request_id,
                        success: false,
                        chat_id: String::new(),
                        created: false,
                        error: e.to_string(),
                    },
                };
                self.send(&stream, frame).await;
            }

            InboundFrame::ChatAddMessage {
                request_id,
                chat_id,
                role,
                content,
                attachments,
                display_only,
            } => {
                let result = match Role::from_str(&role) {
                    Ok(role) => {
                        self.chat
                            .add_message(NewMessage {
                                chat_id,
                                role,
                                content,
                                attachments,
                                display_only,
                            })
                            .await
                            .map(|_| ())
                            .map_err(|e| e.to_string())
                    }
                    Err(e) => Err(e),
                };
                let frame = match result {
                    Ok(()) => OutboundFrame::ChatAddMessageResponse {
                        request_id,
                        success: true,
                        error: String::new(),
                    },
                    Err(error) => OutboundFrame::ChatAddMessageResponse {
                        request_id,
                        success: false,
                        error,
                    },
                };
                self.send(&stream, frame).await;
            }

            InboundFrame::ChatGetMessages {
                request_id,
                chat_id,
                limit,
                offset,
            } => {
                let frame = match self.chat.get_messages(&chat_id, limit, offset).await {
                    Ok(messages) => OutboundFrame::ChatGetMessagesResponse {
                        request_id,
                        success: true,
                        messages,
                        error: String::new(),
                    },
                    Err(e) => OutboundFrame::ChatGetMessagesResponse {
                        request_id,
                        success: false,
                        messages: Vec::new(),
                        error: e.to_string(),
                    },
                };
                self.send(&stream, frame).await;
            }

            InboundFrame::ChatLlmRequest {
                request_id,
                chat_id,
                provider,
            } => {
                // Never block the reader on a model turn.
                let chat = Arc::clone(&self.chat);
                let reply_stream = stream.clone();
                let cancel = stream.closed_token().child_token();
                tokio::spawn(async move {
                    let frame = match chat.llm_request(&chat_id, &provider, cancel).await {
                        Ok(turn) => OutboundFrame::ChatLlmResponse {
                            request_id,
                            success: true,
                            content: turn.message.content,
                            error: String::new(),
                        },
                        Err(e) => OutboundFrame::ChatLlmResponse {
                            request_id,
                            success: false,
                            content: String::new(),
                            error: e.to_string(),
                        },
                    };
                    if let Err(e) = reply_stream.send(frame).await {
                        debug!(error = %e, "LLM response undeliverable");
                    }
                });
            }

            InboundFrame::ConfigSchema { fields } => {
                let plugin_name = match self.manager.get(&plugin_id) {
                    Some(p) => p.name,
                    None => return,
                };
                if let Err(e) = self.manager.set_config_schema(&plugin_id, fields.clone()) {
                    debug!(plugin_id = %plugin_id, error = %e, "Schema not stored");
                }
                if let Err(e) = self.config_store.seed_defaults(&plugin_name, &fields) {
                    warn!(plugin = %plugin_name, error = %e, "Failed to seed config defaults");
                }
                // Implicit in receipt of the schema: the plugin gets its
                // current values without asking.
                self.send(
                    &stream,
                    OutboundFrame::ConfigGetResponse {
                        request_id: String::new(),
                        values: self.config_store.get_all(&plugin_name),
                    },
                )
                .await;
            }

            InboundFrame::ConfigGet { request_id } => {
                let values = match self.manager.get(&plugin_id) {
                    Some(p) => self.config_store.get_all(&p.name),
                    None => Default::default(),
                };
                self.send(
                    &stream,
                    OutboundFrame::ConfigGetResponse { request_id, values },
                )
                .await;
            }

            InboundFrame::Documentation { markdown } => {
                if let Err(e) = self.manager.set_documentation(&plugin_id, markdown) {
                    debug!(plugin_id = %plugin_id, error = %e, "Documentation not stored");
                }
            }
        }
    }

    async fn handle_storage(
        &self,
        stream: &PluginStream,
        plugin_id: &str,
        request_id: String,
        op: StorageOp,
    ) {
        let Some(plugin) = self.manager.get(plugin_id) else {
            return;
        };
        let handler = self.storage.handler_for(&plugin.name);
        let frame = match handler.execute(&op).await {
            Ok(outcome) => OutboundFrame::StorageResponse {
                request_id,
                success: true,
                error: String::new(),
                rows: outcome.rows,
                rows_affected: outcome.rows_affected,
            },
            Err(e) => OutboundFrame::StorageResponse {
                request_id,
                success: false,
                error: e.to_string(),
                rows: Vec::new(),
                rows_affected: 0,
            },
        };
        self.send(stream, frame).await;
    }
}

#[async_trait]
impl FrameHandler for StreamHandler {
    async fn on_connect(&self, stream: PluginStream) {
        debug!(conn = %stream.id(), "Connection accepted");
        self.sessions
            .write()
            .insert(stream.id(), Session::AwaitRegister(stream));
    }

    async fn on_frame(&self, id: ConnectionId, frame: InboundFrame) {
        // Snapshot the session state without holding the lock across awaits.
        enum Dispatch {
            Unknown,
            NeedsRegister(PluginStream),
            Register(PluginStream),
            Active(PluginStream, String),
        }

        let dispatch = {
            let sessions = self.sessions.read();
            match sessions.get(&id) {
                None => Dispatch::Unknown,
                Some(Session::AwaitRegister(stream)) => {
                    if matches!(frame, InboundFrame::Register { .. }) {
                        Dispatch::Register(stream.clone())
                    } else {
                        Dispatch::NeedsRegister(stream.clone())
                    }
                }
                Some(Session::Active { stream, plugin_id }) => {
                    Dispatch::Active(stream.clone(), plugin_id.clone())
                }
            }
        };

        match dispatch {
            Dispatch::Unknown => {
                warn!(conn = %id, "Frame for unknown connection dropped");
            }
            Dispatch::NeedsRegister(stream) => {
                self.send(&stream, OutboundFrame::not_registered()).await;
            }
            Dispatch::Register(stream) => {
                if let InboundFrame::Register {
                    name,
                    version,
                    description,
                } = frame
                {
                    self.handle_register(id, stream, name, version, description)
                        .await;
                }
            }
            Dispatch::Active(stream, plugin_id) => {
                self.handle_active(stream, plugin_id, frame).await;
            }
        }
    }

    async fn on_disconnect(&self, id: ConnectionId) {
        let session = self.sessions.write().remove(&id);
        match session {
            Some(Session::Active { plugin_id, .. }) => {
                info!(conn = %id, plugin_id = %plugin_id, "Connection closed, unregistering plugin");
                self.manager.unregister(&plugin_id);
            }
            Some(Session::AwaitRegister(_)) => {
                debug!(conn = %id, "Unregistered connection closed");
            }
            None => {}
        }
    }
}
