//! Wire-format conversion between vendor dialects and the unified model.
//!
//! Every function here is pure (no I/O); the streaming converters are state
//! structs driven line by line through [`crate::sse::LineTransform`].

pub mod anthropic;
pub mod anthropic_stream;
pub mod anthropic_wire;
pub mod gemini;
pub mod gemini_wire;
pub mod openai_stream;
pub mod openai_wire;
pub mod vertex;
