// Common library shared by the worker, scheduler and API services

pub mod config;
pub mod envelope;
pub mod errors;
pub mod messaging;
pub mod queue;
pub mod scheduler;
pub mod telemetry;
pub mod trigger;
