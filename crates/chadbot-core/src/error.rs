//! Unified error types for the broker core.
//!
//! Each layer gets its own `thiserror` enum and `Result` alias; errors that
//! degrade a single request are handled locally (§ error-frame replies),
//! while only broker-fatal conditions propagate out of the runtime.

use thiserror::Error;

// =============================================================================
// Protocol errors
// =============================================================================

/// Errors decoding or validating a wire frame.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    /// Envelope schema version does not match ours.
    #[error("protocol version mismatch: peer sent {got}, expected {expected}")]
    VersionMismatch { got: u32, expected: u32 },

    /// The frame body was not valid JSON for any known payload.
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

// =============================================================================
// Transport errors
// =============================================================================

/// Errors in the stream transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to bind the listen socket.
    #[error("failed to bind {path}: {source}")]
    Bind {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The peer's outbound queue is gone (stream closed).
    #[error("connection closed")]
    ConnectionClosed,

    /// The peer's outbound queue is full; the frame was dropped.
    #[error("outbound queue full")]
    QueueFull,

    /// I/O error on an established stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame encode/decode failure.
    #[error("codec error: {0}")]
    Codec(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

// =============================================================================
// Broker errors
// =============================================================================

/// Errors from the broker's registries and services.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// A skill with this name is already registered by another plugin.
    #[error("skill '{name}' already registered by plugin '{owner}'")]
    DuplicateSkill { name: String, owner: String },

    /// No skill with this name is registered.
    #[error("skill '{0}' not found")]
    SkillNotFound(String),

    /// No plugin with this id is connected.
    #[error("plugin '{0}' not found")]
    PluginNotFound(String),

    /// A live plugin with this name is already connected.
    #[error("plugin name '{0}' already in use")]
    DuplicatePlugin(String),

    /// The connection has not completed registration.
    #[error("connection is not registered")]
    NotRegistered,

    /// The skill's owning plugin disconnected before replying.
    #[error("plugin disconnected during invocation")]
    PluginDisconnected,

    /// The plugin executed the skill and reported a failure.
    #[error("{0}")]
    SkillFailed(String),

    /// A pending wait hit its deadline.
    #[error("skill invocation timed out after {0:?}")]
    InvocationTimeout(std::time::Duration),

    /// The caller's cancellation signal fired.
    #[error("operation cancelled")]
    Cancelled,

    /// A chat-service helper hit its deadline.
    #[error("chat operation timed out")]
    ChatTimeout,

    /// Chat persistence failure, stringified at the seam.
    #[error("chat store error: {0}")]
    ChatStore(String),

    /// The LLM turn failed (provider error, no providers, iteration cap).
    #[error("llm turn failed: {0}")]
    Llm(String),
}

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

// =============================================================================
// Storage errors
// =============================================================================

/// Errors from namespaced storage.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Logical table name failed the whitelist check.
    #[error("invalid table name '{0}'")]
    InvalidTableName(String),

    /// The physical table does not exist.
    #[error("table '{0}' not found")]
    TableNotFound(String),

    /// The backing store rejected the where-clause.
    #[error("bad where clause: {0}")]
    BadClause(String),

    /// Backing-store failure, stringified at the seam.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

// =============================================================================
// Router errors
// =============================================================================

/// Errors from the LLM tool-calling loop.
///
/// Per-call failures (skill timeout, plugin disconnect) never surface here;
/// they become textual tool replies and the turn continues. These variants
/// are the turn-fatal conditions only.
#[derive(Debug, Clone, Error)]
pub enum RouterError {
    /// No provider is registered at all.
    #[error("no LLM provider available")]
    NoProviderAvailable,

    /// Provider-level transport failure.
    #[error("provider '{provider}' failed: {message}")]
    Provider { provider: String, message: String },

    /// The caller's cancellation signal fired mid-turn.
    #[error("chat turn cancelled")]
    Cancelled,

    /// The iteration backstop tripped.
    #[error("tool-calling loop exceeded {0} iterations")]
    IterationLimit(u32),
}

/// Result type for router operations.
pub type RouterResult<T> = Result<T, RouterError>;
