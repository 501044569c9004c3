pub mod catalog;
pub mod config;
pub mod crosswalk;
pub mod error;
pub mod metrics;
pub mod output;
pub mod pipeline;
pub mod reconcile;
pub mod region;
pub mod snapshot;
pub mod sources;
pub mod types;
