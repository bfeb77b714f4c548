//! Reka chat adapter. Reka replies are consumed as one body even in streaming mode.

mod error;
mod provider;
mod request;
mod response;
mod types;

pub use provider::RekaAdapter;
