pub mod bm25;
pub mod corpus;
pub mod filter;
pub mod hybrid;
pub mod rerank;
pub mod vector;
