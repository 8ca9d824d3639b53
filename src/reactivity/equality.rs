// ============================================================================
// spark-state - Identity Comparison
// Strict (`===`) identity for values and dependency snapshots
// ============================================================================

use std::rc::Rc;

use crate::core::types::{exact_int, Value};

// =============================================================================
// STRICT IDENTITY
// =============================================================================

/// Strict identity between two values.
///
/// This is the only comparison the kernel uses; there is no structural
/// equality. Two `Object`s are identical only if they are the same
/// allocation.
///
/// # Example
/// ```
/// use spark_state::{identical, Value};
///
/// assert!(identical(&Value::from(1), &Value::from(1.0)));
/// assert!(!identical(&Value::from(f64::NAN), &Value::from(f64::NAN)));
///
/// let shared = Value::object(vec![1]);
/// assert!(identical(&shared, &shared.clone()));
/// assert!(!identical(&Value::object(vec![1]), &Value::object(vec![1])));
/// ```
pub fn identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) => true,
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        // NaN is never identical, and IEEE `==` already says so
        (Value::Float(x), Value::Float(y)) => x == y,
        // Exact: large ints must not round onto a neighbouring float
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => {
            exact_int(*y) == Some(*x)
        }
        (Value::Str(x), Value::Str(y)) => Rc::ptr_eq(x, y) || x == y,
        (Value::Object(x), Value::Object(y)) => {
            std::ptr::eq(Rc::as_ptr(x) as *const (), Rc::as_ptr(y) as *const ())
        }
        _ => false,
    }
}

/// Negation of [`identical`] (`!==`), the write-notification test.
pub fn not_identical(a: &Value, b: &Value) -> bool {
    !identical(a, b)
}

// =============================================================================
// SNAPSHOT DIFF
// =============================================================================

/// Elementwise diff of a dependency snapshot against fresh values.
///
/// A missing previous snapshot counts as different. One comparison per
/// dependency; lengths always match for a fixed dependency list.
pub fn snapshot_differs(previous: Option<&[Value]>, current: &[Value]) -> bool {
    match previous {
        None => true,
        Some(previous) => {
            previous.len() != current.len()
                || previous
                    .iter()
                    .zip(current)
                    .any(|(old, new)| not_identical(old, new))
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
