//! Exchange-agnostic transport kernel.
//!
//! The kernel owns transport concerns only: signing, throttling, HTTP, WebSocket
//! sessions and the reconnecting stream loop. Exchange specifics (instruction
//! names, channel names, payload shapes) live behind [`Signer`] and [`WsCodec`].
//!
//! ```rust,no_run
//! use backpack_connector::core::kernel::*;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let rest = RestClientBuilder::new(RestClientConfig::new(
//!     "https://api.backpack.exchange".to_string(),
//!     "backpack".to_string(),
//! ))
//! .build()?;
//!
//! let depth: serde_json::Value = rest
//!     .get_json("/api/v1/depth", &[("symbol", "SOL_USDC")], false)
//!     .await?;
//! # let _ = depth;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod rest;
pub mod signer;
pub mod stream;
pub mod throttle;
pub mod ws;

pub use codec::{ChannelMessage, WsCodec};
pub use rest::{ReqwestRest, RestClient, RestClientBuilder, RestClientConfig};
pub use signer::{Ed25519Signer, SignatureResult, Signer};
pub use stream::{
    BackoffPolicy, ChannelRouter, ConnectionState, StreamConfig, StreamConsumer, StreamMonitor,
};
pub use throttle::{RateLimit, Throttler};
pub use ws::{TungsteniteWs, WsConfig, WsSession};
