pub mod config;
pub mod registry;
pub mod report;
pub mod types;
