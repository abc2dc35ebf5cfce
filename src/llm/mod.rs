pub mod answer;
pub mod chat;
pub mod cross_encoder;
pub mod embeddings;
