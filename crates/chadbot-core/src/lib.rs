//! # Chadbot Core
//!
//! Core types for the chadbot plugin broker.
//!
//! This crate defines everything the other layers agree on, without any
//! runtime behaviour of its own:
//!
//! ## Foundation layer
//!
//! - **Wire protocol**: length-prefixed JSON envelopes and the
//!   [`InboundFrame`] / [`OutboundFrame`] tagged unions ([`protocol`])
//! - **Skills**: plugin-declared capabilities the LLM can invoke ([`skill`])
//! - **Events**: subject-tagged broadcast records and the dot-segment
//!   pattern matcher ([`event`])
//! - **Config schema**: per-plugin config field descriptors and the typed
//!   string coercion boundary ([`config`])
//! - **Chat model**: transcript messages, tool calls, tool descriptors, and
//!   persistence-facing records ([`chat`])
//!
//! ## Integration layer
//!
//! - **Connection seam**: [`PluginStream`] (the outbound half of a plugin
//!   connection) and [`FrameHandler`] (the trait the broker implements and
//!   the transport drives) ([`connection`])
//! - **Errors**: unified `thiserror` enums and `Result` aliases ([`error`])
//!
//! ## Data flow
//!
//! ```text
//! ┌──────────┐  InboundFrame   ┌──────────────┐   SkillInvoke   ┌────────┐
//! │  Plugin  │────────────────▶│ FrameHandler │◀───────────────│  LLM   │
//! │ (subproc)│◀────────────────│   (broker)   │────────────────▶│ router │
//! └──────────┘  OutboundFrame  └──────────────┘  SkillResponse  └────────┘
//! ```

pub mod chat;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod protocol;
pub mod skill;

pub use chat::{
    Attachment, ChatMessage, ChatRecord, DeferredAttachment, MessageRecord, Role, ToolCall,
    ToolDescriptor,
};
pub use config::{ConfigField, ConfigFieldKind, ConfigValue};
pub use connection::{ConnectionId, FrameHandler, PluginStream};
pub use error::{
    BrokerError, BrokerResult, ProtocolError, ProtocolResult, RouterError, RouterResult,
    StorageError, StorageResult, TransportError, TransportResult,
};
pub use event::{ChatMessageEvent, Event, EventData, subject_matches};
pub use protocol::{
    ColumnSpec, Envelope, InboundFrame, InvokeContext, OutboundFrame, PROTOCOL_VERSION, Row,
    StorageOp, ERROR_CODE_NOT_REGISTERED,
};
pub use skill::{ParamKind, Skill, SkillParameter};

/// Prelude for common imports.
pub mod prelude {
    pub use super::chat::*;
    pub use super::config::*;
    pub use super::connection::*;
    pub use super::error::*;
    pub use super::event::*;
    pub use super::protocol::*;
    pub use super::skill::*;
}
