//! Anthropic Messages API, registered under the `claude` vendor id.

mod error;
mod provider;
mod request;
mod response;
mod types;

pub use provider::ClaudeAdapter;
