// ============================================================================
// spark-state - Core Module
// Fundamental types, errors and the tracking context
// ============================================================================

pub mod constants;
pub mod context;
pub mod error;
pub mod types;

// Re-export commonly used items
pub use constants::*;
pub use context::{current_subscription, is_tracking, is_untracking, tracking_depth, with_context, TrackingContext};
pub use error::DefinitionError;
pub use types::{InstanceId, Key, SubscriptionId, Value};
