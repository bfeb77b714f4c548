//! Ollama `/api/chat` adapter (newline-delimited JSON streaming).

mod error;
mod provider;
mod request;
mod response;
mod types;

pub use provider::OllamaAdapter;
