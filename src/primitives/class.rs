// ============================================================================
// spark-state - Observable Classes
// Declarative fields, methods, accessors, computeds and watches
// ============================================================================
//
// An ObservableClass is the definition-time half of an observable: default
// fields, named methods and accessors, and the registration calls that turn
// an accessor into a memoized computed or make a method run when named
// properties change. Misuse is rejected by the registration call itself.
//
// Definitions apply to instances created afterwards; existing instances keep
// the definition they were created with.
// ============================================================================

use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::core::error::DefinitionError;
use crate::core::types::{Key, Value};
use crate::primitives::observable::Observable;
use crate::primitives::watch;

// =============================================================================
// TYPE ALIASES
// =============================================================================

/// Zero-argument method, called with the instance
pub type MethodFn = Rc<dyn Fn(&Observable)>;

/// Zero-argument accessor, called with the instance
pub type AccessorFn = Rc<dyn Fn(&Observable) -> Value>;

// =============================================================================
// DEFINITIONS
// =============================================================================

#[derive(Clone)]
pub(crate) enum Member {
    Method(MethodFn),
    Accessor(AccessorFn),
}

#[derive(Debug, Clone)]
pub(crate) struct WatchDef {
    pub method: Key,
    pub deps: Rc<[Key]>,
}

#[derive(Debug, Clone)]
pub(crate) struct ComputedDef {
    pub deps: Rc<[Key]>,
}

#[derive(Clone)]
pub(crate) struct ClassDef {
    pub name: Rc<str>,
    pub fields: Vec<(Key, Value)>,
    pub members: FxHashMap<Key, Member>,
    pub watches: Vec<WatchDef>,
    pub computeds: FxHashMap<Key, ComputedDef>,
}

impl ClassDef {
    pub fn method(&self, name: &str) -> Option<MethodFn> {
        match self.members.get(name) {
            Some(Member::Method(f)) => Some(f.clone()),
            _ => None,
        }
    }

    pub fn accessor(&self, name: &str) -> Option<AccessorFn> {
        match self.members.get(name) {
            Some(Member::Accessor(f)) => Some(f.clone()),
            _ => None,
        }
    }

    pub fn is_member(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }

    fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|(k, _)| &**k == name)
    }

    fn check_deps(&self, member: &str, deps: &[&str]) -> Result<Rc<[Key]>, DefinitionError> {
        deps.iter()
            .map(|&dep| match self.members.get(dep) {
                Some(Member::Method(_)) => Err(DefinitionError::DependencyIsMethod {
                    class: self.name.to_string(),
                    member: member.to_string(),
                    dep: dep.to_string(),
                }),
                Some(Member::Accessor(_)) => Ok(Key::from(dep)),
                None if self.has_field(dep) => Ok(Key::from(dep)),
                None => Err(DefinitionError::UnknownDependency {
                    class: self.name.to_string(),
                    member: member.to_string(),
                    dep: dep.to_string(),
                }),
            })
            .collect()
    }
}

// =============================================================================
// OBSERVABLE CLASS
// =============================================================================

/// Definition of a family of observable instances.
///
/// # Example
///
/// ```
/// use spark_state::{ObservableClass, Value};
///
/// let mut user = ObservableClass::new("User");
/// user.field("name", "gy")
///     .field("age", 17)
///     .accessor("age2", |this| {
///         this.get("age").as_int().map_or(Value::Undefined, |age| Value::from(age + 1))
///     })
///     .method("on_age_change", |_this| {});
///
/// user.define_computed("age2", &["age"]).unwrap();
/// user.define_watch("on_age_change", &["age", "age2"]).unwrap();
///
/// let u = user.instantiate();
/// assert_eq!(u.get("age2").as_int(), Some(18));
/// ```
#[derive(Clone)]
pub struct ObservableClass {
    def: Rc<ClassDef>,
}

impl ObservableClass {
    pub fn new(name: impl Into<Rc<str>>) -> Self {
        Self {
            def: Rc::new(ClassDef {
                name: name.into(),
                fields: Vec::new(),
                members: FxHashMap::default(),
                watches: Vec::new(),
                computeds: FxHashMap::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    fn def_mut(&mut self) -> &mut ClassDef {
        Rc::make_mut(&mut self.def)
    }

    // =========================================================================
    // MEMBERS
    // =========================================================================

    /// Declare a field with its default value. Replaces any member or field
    /// of the same name.
    pub fn field(&mut self, name: impl Into<Key>, value: impl Into<Value>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        let def = self.def_mut();
        def.members.remove(&name);
        def.computeds.remove(&name);
        match def.fields.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => def.fields.push((name, value)),
        }
        self
    }

    /// Declare a method. Replaces any member or field of the same name.
    pub fn method(&mut self, name: impl Into<Key>, f: impl Fn(&Observable) + 'static) -> &mut Self {
        self.member(name.into(), Member::Method(Rc::new(f)))
    }

    /// Declare a read-only accessor. Replaces any member or field of the
    /// same name.
    pub fn accessor(
        &mut self,
        name: impl Into<Key>,
        f: impl Fn(&Observable) -> Value + 'static,
    ) -> &mut Self {
        self.member(name.into(), Member::Accessor(Rc::new(f)))
    }

    fn member(&mut self, name: Key, member: Member) -> &mut Self {
        let def = self.def_mut();
        def.fields.retain(|(k, _)| *k != name);
        if matches!(member, Member::Method(_)) {
            def.computeds.remove(&name);
        }
        def.members.insert(name, member);
        self
    }

    // =========================================================================
    // REGISTRATION
    // =========================================================================

    /// Memoize accessor `name` over the explicit dependency list `deps`.
    ///
    /// Fails if `name` is not an accessor, is already computed, or if a
    /// dependency names a method or an undeclared property.
    pub fn define_computed(&mut self, name: &str, deps: &[&str]) -> Result<(), DefinitionError> {
        if self.def.accessor(name).is_none() {
            return Err(DefinitionError::ComputedOnNonAccessor {
                class: self.def.name.to_string(),
                name: name.to_string(),
            });
        }
        if self.def.computeds.contains_key(name) {
            return Err(DefinitionError::DuplicateComputed {
                class: self.def.name.to_string(),
                name: name.to_string(),
            });
        }
        let deps = self.def.check_deps(name, deps)?;

        tracing::debug!(class = %self.def.name, name, deps = deps.len(), "define computed");
        self.def_mut()
            .computeds
            .insert(Key::from(name), ComputedDef { deps });
        Ok(())
    }

    /// Run method `name` (via the scheduler) whenever any of `deps` changes.
    ///
    /// Every instance runs the method once on its first flush, whatever the
    /// initial values are (even if every dependency is `Undefined`).
    ///
    /// Fails if `name` is not a method, or if a dependency names a method or
    /// an undeclared property.
    pub fn define_watch(&mut self, name: &str, deps: &[&str]) -> Result<(), DefinitionError> {
        if self.def.method(name).is_none() {
            return Err(DefinitionError::WatchOnNonMethod {
                class: self.def.name.to_string(),
                name: name.to_string(),
            });
        }
        let deps = self.def.check_deps(name, deps)?;

        tracing::debug!(class = %self.def.name, name, deps = deps.len(), "define watch");
        self.def_mut().watches.push(WatchDef {
            method: Key::from(name),
            deps,
        });
        Ok(())
    }

    // =========================================================================
    // INSTANTIATION
    // =========================================================================

    /// Create an instance with the declared defaults.
    pub fn instantiate(&self) -> Observable {
        self.instantiate_with(std::iter::empty::<(Key, Value)>())
    }

    /// Create an instance, overriding some defaults first.
    ///
    /// Overrides are applied before the instance is observable, so they never
    /// notify. Every watch then fires once on the next flush.
    pub fn instantiate_with<K, V>(&self, overrides: impl IntoIterator<Item = (K, V)>) -> Observable
    where
        K: Into<Key>,
        V: Into<Value>,
    {
        let mut fields = self.def.fields.clone();
        for (key, value) in overrides {
            let key = key.into();
            if self.def.is_member(&key) {
                tracing::warn!(class = %self.def.name, key = %key, "override names a method or accessor, ignored");
                continue;
            }
            let value = value.into();
            match fields.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = value,
                None => fields.push((key, value)),
            }
        }

        let instance = Observable::from_parts(Some(self.def.clone()), fields);
        for def in &self.def.watches {
            watch::install(&instance, def);
        }

        // Initial watch run: every watch diffs against an empty snapshot
        instance.dispatch_effects();
        instance
    }
}

impl fmt::Debug for ObservableClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut members: Vec<&str> = self.def.members.keys().map(|k| &**k).collect();
        members.sort_unstable();
        f.debug_struct("ObservableClass")
            .field("name", &self.def.name)
            .field("fields", &self.def.fields.iter().map(|(k, _)| &**k).collect::<Vec<_>>())
            .field("members", &members)
            .field("watches", &self.def.watches.len())
            .field("computeds", &self.def.computeds.len())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
