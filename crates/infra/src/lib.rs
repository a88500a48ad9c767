//! Infrastructure layer: queue store adapters, configuration, worker loop.

pub mod config;
pub mod queue;
pub mod workers;
