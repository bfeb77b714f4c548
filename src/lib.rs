//! Vendor-agnostic LLM dispatch with a normalized, backpressured streaming relay.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod normalize;
pub mod provider;
pub mod relay;
pub mod stream;
pub mod types;

pub use client::{Dispatcher, DispatcherBuilder};
pub use config::{DispatchConfig, DispatchSettings, VendorConfig, VendorKind, build_dispatcher};
pub use error::{LLMError, VendorErrorKind};
pub use provider::{DynAdapter, TextStream, VendorAdapter};
pub use relay::{ChannelTransport, ClientDisconnected, ClientTransport, RelayOutcome, RelayWriter};
pub use types::*;
