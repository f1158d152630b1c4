//! # Chadbot Runtime
//!
//! Orchestration layer for the plugin broker: configuration loading,
//! logging setup, and the construction graph that wires the broker's
//! components together.
//!
//! ```rust,ignore
//! use chadbot_runtime::{Broker, BrokerConfig, logging};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BrokerConfig::load_from_file("chadbot.toml")?;
//!     logging::init_from_config(&config.logging);
//!
//!     let broker = Broker::builder(config)
//!         .register_provider(my_openai_adapter())
//!         .with_chat_store(my_postgres_chat_store())
//!         .start()
//!         .await?;
//!
//!     broker.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{BrokerConfig, LimitsConfig, LogFormat, LogLevel, LoggingConfig, SocketConfig};
pub use error::{ConfigError, ConfigResult, RuntimeError, RuntimeResult};
pub use runtime::{Broker, BrokerBuilder};
