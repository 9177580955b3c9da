//! Prospector core: recurring collect → classify → act pipelines over
//! external source groups, with background job orchestration, incremental
//! crawling and duplicate suppression.

pub mod adapters;
pub mod capabilities;
pub mod config;
pub mod dedup;
pub mod jobs;
pub mod pipeline;
pub mod store;
pub mod testing;
pub mod types;

pub use config::Config;
