//! Database module for the ads service
//!
//! Storage backends for the ad repository: Postgres for deployments,
//! in-memory for tests and local runs.

pub mod memory;
pub mod models;
pub mod operations;

pub use memory::MemoryAdRepository;
pub use operations::DbOperations;
