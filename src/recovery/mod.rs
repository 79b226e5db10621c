//! Settings recovery - pick the first readable settings source on load.

pub mod pipeline;

pub use pipeline::{list_backups, Candidate, LoadPipeline, Recovered};
