//! Streaming JSON recognition.

pub mod parser;

pub use parser::{JsonHandler, JsonParser, JSON_MAX_DEPTH};
