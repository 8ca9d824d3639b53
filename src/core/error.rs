// ============================================================================
// spark-state - Errors
// Definition-time misuse of computed/watch registration
// ============================================================================

use thiserror::Error;

/// Returned when an [`ObservableClass`](crate::ObservableClass) definition is
/// inconsistent. Raised synchronously by the registration call, never deferred
/// to first use.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("`{class}::{name}` is not a method; watches can only be defined on methods")]
    WatchOnNonMethod { class: String, name: String },

    #[error("`{class}::{name}` is not an accessor; computeds can only be defined on accessors")]
    ComputedOnNonAccessor { class: String, name: String },

    #[error("`{class}::{member}` depends on `{dep}`, which is a method, not a property")]
    DependencyIsMethod {
        class: String,
        member: String,
        dep: String,
    },

    #[error("`{class}::{member}` depends on unknown property `{dep}`")]
    UnknownDependency {
        class: String,
        member: String,
        dep: String,
    },

    #[error("`{class}::{name}` already has a computed definition")]
    DuplicateComputed { class: String, name: String },
}
