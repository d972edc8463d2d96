pub mod publisher;
pub mod types;

// Re-export key types for convenience
pub use publisher::{EventPublisher, EventPublisherConfig, EventPublisherStats};
pub use types::ResilienceEvent;
