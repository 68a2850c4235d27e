pub mod client;
pub mod openai;
pub mod prompts;

pub use client::{ChatRole, CompletionClient, CompletionRequest, PromptMessage};
pub use openai::OpenAiClient;
