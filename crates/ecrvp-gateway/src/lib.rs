//! ECR-VP Interpreter Gateway
//!
//! One asynchronous contract over heterogeneous providers:
//!
//! 1. [`Gateway::open_channel`] resolves the adapter and credential
//! 2. [`Channel::transmit`] queues turns, strictly in order
//! 3. [`Channel::finalize`] closes the transcript and checks capacity
//! 4. [`Channel::await_result`] delivers it and returns a [`RunResult`]
//!
//! Each channel owns its transcript; adapters keep no per-channel state, so
//! concurrently open channels share nothing but the immutable input. Errors
//! are never retried here.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod catalog;
mod channel;
mod config;
mod error;
mod gateway;
/// HTTP adapters for the built-in providers
pub mod http;

pub use catalog::{catalog, descriptor, Capabilities, ProviderDescriptor, WireFormat};
pub use channel::{
    Channel, ChannelId, ChannelRequest, ChannelState, InterpreterProvider, RunResult, Turn,
};
pub use config::{GatewayConfig, InterpreterConfig};
pub use error::GatewayError;
pub use gateway::Gateway;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
