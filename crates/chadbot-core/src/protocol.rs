//! Wire protocol for the plugin broker.
//!
//! Every message between the broker and a plugin is one length-prefixed JSON
//! [`Envelope`]. The envelope carries a schema version and a tagged payload;
//! [`InboundFrame`] enumerates the plugin→broker payloads, [`OutboundFrame`]
//! the broker→plugin payloads.
//!
//! # Correlation
//!
//! Request-scoped frames carry a `request_id` that is echoed verbatim in the
//! paired response. Responses that have no originating request (the implicit
//! [`OutboundFrame::ConfigGetResponse`] emitted after a
//! [`InboundFrame::ConfigSchema`]) carry an empty id.
//!
//! # Versioning
//!
//! [`PROTOCOL_VERSION`] is bumped on any incompatible payload change. The
//! transport rejects envelopes with a different version before they reach the
//! broker.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::chat::{Attachment, MessageRecord};
use crate::config::ConfigField;
use crate::event::Event;
use crate::skill::Skill;

/// Current wire schema version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Error code sent when a plugin speaks before registering.
pub const ERROR_CODE_NOT_REGISTERED: u32 = 1;

/// A row returned by a storage query: column name → stringified value.
///
/// `NULL` columns are represented as the empty string.
pub type Row = BTreeMap<String, String>;

// =============================================================================
// Envelope
// =============================================================================

/// The versioned outer shell of every frame on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope<T> {
    /// Wire schema version; must equal [`PROTOCOL_VERSION`].
    pub version: u32,
    /// The tagged payload.
    #[serde(flatten)]
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Wraps a payload in a current-version envelope.
    pub fn new(payload: T) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload,
        }
    }
}

// =============================================================================
// Inbound frames (plugin → broker)
// =============================================================================

/// Payloads a plugin may send to the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// First frame on every connection. Anything else beforehand is answered
    /// with [`OutboundFrame::Error`] code [`ERROR_CODE_NOT_REGISTERED`].
    Register {
        /// Self-declared plugin name, stable across reconnects.
        name: String,
        /// Plugin version string (informational).
        version: String,
        /// Human-readable description.
        #[serde(default)]
        description: String,
    },

    /// Declares one or more skills. Names are globally unique; collisions are
    /// rejected per skill and the earlier registration stands.
    SkillRegister { skills: Vec<Skill> },

    /// Appends subject patterns to this plugin's subscription list.
    EventSubscribe { subjects: Vec<String> },

    /// Publishes an event. The broker stamps `source_plugin` before fan-out;
    /// any value the plugin put there is overwritten.
    EventEmit { event: Event },

    /// Answers an earlier [`OutboundFrame::SkillInvoke`].
    SkillResponse {
        request_id: String,
        success: bool,
        #[serde(default)]
        result: String,
        #[serde(default)]
        error: String,
        /// Auxiliary messages to display after the assistant reply.
        #[serde(default)]
        attachments: Vec<Attachment>,
    },

    /// A namespaced storage operation.
    StorageRequest {
        request_id: String,
        #[serde(flatten)]
        op: StorageOp,
    },

    /// Looks up (or creates) the chat bound to a platform-specific id.
    ChatGetOrCreate {
        request_id: String,
        platform: String,
        linked_id: String,
        name: String,
    },

    /// Appends a message to a chat transcript.
    ChatAddMessage {
        request_id: String,
        chat_id: String,
        role: String,
        content: String,
        #[serde(default)]
        attachments: Vec<Attachment>,
        /// Display-only messages are shown to users but excluded from the
        /// transcript handed to the LLM.
        #[serde(default)]
        display_only: bool,
    },

    /// Reads a page of a chat transcript.
    ChatGetMessages {
        request_id: String,
        chat_id: String,
        limit: u32,
        offset: u32,
    },

    /// Triggers an LLM turn for a chat. Handled on a worker task; the
    /// response frame arrives whenever the turn completes.
    ChatLlmRequest {
        request_id: String,
        chat_id: String,
        /// Provider name; empty selects the default provider.
        #[serde(default)]
        provider: String,
    },

    /// Declares the plugin's config schema. Receipt implies a
    /// [`OutboundFrame::ConfigGetResponse`] with the current values, even
    /// though no request id exists.
    ConfigSchema { fields: Vec<ConfigField> },

    /// Reads the plugin's current config values.
    ConfigGet { request_id: String },

    /// Replaces the plugin's documentation blob (markdown). Included in the
    /// LLM system prompt while the plugin has registered skills.
    Documentation { markdown: String },
}

// =============================================================================
// Storage operations
// =============================================================================

/// A column declaration for `CreateTable`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    /// Backing-store column type tag (`text`, `integer`, `real`, `boolean`).
    pub kind: String,
}

/// The storage operation variants carried by [`InboundFrame::StorageRequest`].
///
/// `where_clause` is an opaque, backing-store-flavoured predicate string with
/// positional `?` placeholders bound from `args` in order. The broker never
/// parses it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StorageOp {
    CreateTable {
        table: String,
        columns: Vec<ColumnSpec>,
    },
    DropTable {
        table: String,
    },
    Insert {
        table: String,
        values: BTreeMap<String, String>,
    },
    Update {
        table: String,
        values: BTreeMap<String, String>,
        #[serde(default)]
        where_clause: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Delete {
        table: String,
        #[serde(default)]
        where_clause: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Query {
        table: String,
        #[serde(default)]
        where_clause: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        limit: Option<u32>,
    },
}

impl StorageOp {
    /// The logical table name this operation targets.
    pub fn table(&self) -> &str {
        match self {
            StorageOp::CreateTable { table, .. }
            | StorageOp::DropTable { table }
            | StorageOp::Insert { table, .. }
            | StorageOp::Update { table, .. }
            | StorageOp::Delete { table, .. }
            | StorageOp::Query { table, .. } => table,
        }
    }
}

// =============================================================================
// Outbound frames (broker → plugin)
// =============================================================================

/// Chat context forwarded with a skill invocation, when the invocation
/// happens inside an LLM turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InvokeContext {
    #[serde(default)]
    pub chat_id: String,
    #[serde(default)]
    pub user_id: String,
}

/// Payloads the broker may send to a plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Answers [`InboundFrame::Register`].
    RegisterResponse {
        success: bool,
        #[serde(default)]
        plugin_id: String,
        #[serde(default)]
        error: String,
    },

    /// Asks the plugin to run one of its skills.
    SkillInvoke {
        request_id: String,
        skill_name: String,
        arguments: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<InvokeContext>,
    },

    /// Delivers an event matching one of the plugin's subscriptions.
    EventDispatch { event: Event },

    /// A protocol-level error. `code` 1 means "must register first".
    Error { code: u32, message: String },

    /// Answers [`InboundFrame::StorageRequest`].
    StorageResponse {
        request_id: String,
        success: bool,
        #[serde(default)]
        error: String,
        #[serde(default)]
        rows: Vec<Row>,
        #[serde(default)]
        rows_affected: u64,
    },

    ChatGetOrCreateResponse {
        request_id: String,
        success: bool,
        #[serde(default)]
        chat_id: String,
        #[serde(default)]
        created: bool,
        #[serde(default)]
        error: String,
    },

    ChatAddMessageResponse {
        request_id: String,
        success: bool,
        #[serde(default)]
        error: String,
    },

    ChatGetMessagesResponse {
        request_id: String,
        success: bool,
        #[serde(default)]
        messages: Vec<MessageRecord>,
        #[serde(default)]
        error: String,
    },

    ChatLlmResponse {
        request_id: String,
        success: bool,
        #[serde(default)]
        content: String,
        #[serde(default)]
        error: String,
    },

    /// Current config values. `request_id` is empty when this is the implicit
    /// response to [`InboundFrame::ConfigSchema`].
    ConfigGetResponse {
        request_id: String,
        values: BTreeMap<String, String>,
    },

    /// Pushed when a config value changes (API write or live file edit).
    ConfigChanged {
        key: String,
        value: String,
        all_values: BTreeMap<String, String>,
    },
}

impl OutboundFrame {
    /// Shorthand for the "must register first" protocol error.
    pub fn not_registered() -> Self {
        OutboundFrame::Error {
            code: ERROR_CODE_NOT_REGISTERED,
            message: "must register first".into(),
        }
    }
}
