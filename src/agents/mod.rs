// Public module exports
pub mod chat_agent;

// Re-export main types for convenience
pub use chat_agent::{ChatAgent, Interaction};
