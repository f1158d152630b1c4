//! # Chadbot Transport
//!
//! Unix-domain-socket server terminating one bidirectional frame stream per
//! connected plugin.
//!
//! Frames on the wire are length-prefixed JSON envelopes
//! ([`tokio_util::codec::LengthDelimitedCodec`] with a 4-byte big-endian
//! prefix). Each accepted connection gets:
//!
//! - one **reader task** draining inbound frames in order and handing them
//!   to the [`FrameHandler`](chadbot_core::connection::FrameHandler)
//!   sequentially, so per-plugin frame order is preserved;
//! - one **writer task** draining the connection's bounded outbound queue,
//!   so any number of producer tasks can send without interleaving frames.
//!
//! ```text
//!             ┌────────────────────── connection task ──────────────────────┐
//! UnixStream ─┤ read half ──▶ decode ──▶ FrameHandler::on_frame (in order)  │
//!             │ write half ◀── encode ◀── mpsc queue ◀── PluginStream.send  │
//!             └──────────────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod server;

pub use codec::{decode_inbound, encode_outbound};
pub use server::{ServerHandle, UnixServer, UnixServerConfig};
