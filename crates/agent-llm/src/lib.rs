pub mod openai;
pub mod openai_compat;
pub mod provider;

pub use openai::OpenAIProvider;
pub use provider::{LLMError, LLMProvider, Result};
