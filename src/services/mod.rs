//! Long-running services: the audit coordinator and the sync processor

pub mod coordinator;
pub mod sync;
