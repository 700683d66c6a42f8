//! Query Orchestrator: cache-first retrieval-augmented answering, returned
//! whole (`QueryOrchestrator::answer`) or as a cancellable token stream
//! (`QueryOrchestrator::stream`).

mod orchestrator;
mod stream;

pub use orchestrator::{
    AnswerSource, QueryAnswer, QueryError, QueryOptions, QueryOrchestrator, NO_CONTEXT_ANSWER,
};
pub use stream::{AnswerStream, Fragment, StreamState};
