//! Google Gemini `generateContent` / `streamGenerateContent` adapter.

mod error;
mod provider;
mod request;
mod response;
mod types;

pub use provider::GeminiAdapter;
