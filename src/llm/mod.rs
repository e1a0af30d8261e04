pub mod client;
pub mod intent_parser;
pub mod prompts;
pub mod summarizer;
pub mod types;

pub use client::*;
pub use intent_parser::*;
pub use summarizer::*;
pub use types::*;
