//! OpenAI Chat Completions wire format, shared by OpenAI, Groq and Mistral.

mod error;
mod provider;
mod request;
mod response;
mod types;

pub use provider::OpenAiCompatibleAdapter;
