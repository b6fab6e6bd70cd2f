pub mod chains;
pub mod config;
pub mod job;
pub mod migrate;
pub mod queue;
pub mod recurring;
pub mod status;
