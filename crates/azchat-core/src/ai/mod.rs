pub mod client;
pub mod types;

pub use client::ChatClient;
pub use types::{ChatChunk, ChatRequest, ChunkChoice, ChunkDelta, WireMessage};
