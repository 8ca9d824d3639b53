// ============================================================================
// spark-state - Ergonomic Macros
// ============================================================================

/// Clone variables into a move closure.
///
/// Callbacks handed to subscriptions and class members are `'static`, so
/// every `Rc` they capture has to be cloned first.
///
/// # Usage
///
/// ```rust
/// use spark_state::{cloned, make_observable, run_tracked, Subscription};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let user = make_observable([("age", 17)]);
/// let hits = Rc::new(Cell::new(0));
///
/// let sub = Subscription::new("render", cloned!(hits => move || hits.set(hits.get() + 1)));
/// run_tracked(|| user.get("age"), &sub);
///
/// user.set("age", 18);
/// spark_state::flush();
/// assert_eq!(hits.get(), 1);
/// ```
#[macro_export]
macro_rules! cloned {
    ($($n:ident),+ => $e:expr) => {
        {
            $( let $n = $n.clone(); )+
            $e
        }
    };
}

/// Build a plain observable from `key: value` pairs.
///
/// Values of different types are converted with `Value::from`.
///
/// # Usage
///
/// ```rust
/// use spark_state::observable;
///
/// let user = observable! { age: 17, name: "gy", admin: false };
/// assert_eq!(user.get("age").as_int(), Some(17));
/// assert_eq!(user.get("name").as_str(), Some("gy"));
/// ```
#[macro_export]
macro_rules! observable {
    () => {
        $crate::make_observable(::std::iter::empty::<(&str, $crate::Value)>())
    };
    ($($key:ident : $value:expr),+ $(,)?) => {
        $crate::make_observable([
            $( (stringify!($key), $crate::Value::from($value)) ),+
        ])
    };
}
