//! Library boundary for the grading pipeline's external collaborators:
//! submission intake, reference-material ingestion and read-only result
//! browsing. The HTTP surface on top of these operations lives outside
//! this repository.

pub mod error;
pub mod ingest;
pub mod intake;
pub mod queries;

pub use error::ServerError;
