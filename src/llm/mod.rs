//! LLM client stack: message types, HTTP backend, retry layer, breaker.

mod breaker;
mod client;
mod http;
mod types;

pub use breaker::ErrorRateBreaker;
pub use client::LlmClient;
pub use http::HttpBackend;
pub use types::{ChatBackend, ChatOutcome, Message, Role};

// Test seam; not part of public API stability guarantees.
#[doc(hidden)]
pub use client::testing;
