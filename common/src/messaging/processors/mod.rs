// Business processors shipped with the service

pub mod hello;

pub use hello::{HelloEvent, HelloProcessor};

use crate::messaging::ProcessorRegistry;

/// Register every built-in processor. New processors are added here.
pub fn register_default_processors(registry: &mut ProcessorRegistry) {
    registry.register(HelloProcessor::new());
}
