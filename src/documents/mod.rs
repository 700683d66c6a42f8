//! Document lifecycle: registry, text extraction and the upload/delete
//! service.

pub mod extract;
mod service;
mod store;

pub use service::DocumentService;
pub use store::{Document, DocumentStatus, DocumentStore};
