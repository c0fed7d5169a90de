//! Wire-format adapters (C1): each dialect's request/response types and their bidirectional
//! conversion to and from the canonical, OpenAI-shaped internal representation.

pub mod anthropic;
pub mod openai;
