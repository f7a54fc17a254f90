//! LLM Backend Integration
//!
//! Abstracted access to language model servers through a common trait.
//!
//! # Available Backends
//!
//! - **Ollama**: Local LLM server (default)
//!
//! # Usage
//!
//! ```ignore
//! use farm_control_core::backend::{LlmBackend, LlmRequest, OllamaBackend};
//!
//! let backend = OllamaBackend::new("localhost", 11434, Duration::from_secs(60))?;
//! let request = LlmRequest::new("Hello!", "llama3.2").with_json_output(true);
//! let response = backend.send(&request).await?;
//! ```

mod ollama;
mod traits;

pub use ollama::OllamaBackend;
pub use traits::{LlmBackend, LlmRequest, LlmResponse, ModelInfo};
