pub mod cache;
pub mod core;
pub mod documents;
pub mod history;
pub mod ingest;
pub mod llm;
pub mod query;
pub mod rag;
pub mod server;
pub mod state;
pub mod storage;

#[cfg(test)]
mod testing;
