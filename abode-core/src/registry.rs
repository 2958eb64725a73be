//! Name-keyed table of factories.
use crate::AbodeError;
use log::debug;
use std::collections::BTreeMap;

/// A table mapping names to factories, populated by explicit calls to
/// [`Registry::register`].
///
/// `F` is usually a function pointer building a boxed trait object, for example
/// a recurrent core or a sensor.
///
/// ```rust
/// use abode_core::Registry;
///
/// let mut registry: Registry<fn(usize) -> Vec<f32>> = Registry::new("buffer");
/// registry.register("zeros", |n| vec![0.0; n]).unwrap();
///
/// let build = registry.get("zeros").unwrap();
/// assert_eq!(build(3).len(), 3);
/// assert!(registry.register("zeros", |n| vec![1.0; n]).is_err());
/// ```
#[derive(Clone)]
pub struct Registry<F> {
    kind: String,
    entries: BTreeMap<String, F>,
    case_insensitive: bool,
}

impl<F> Registry<F> {
    /// Creates an empty registry. `kind` is used in error messages.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            entries: BTreeMap::new(),
            case_insensitive: false,
        }
    }

    /// Creates an empty registry whose names are compared case-insensitively.
    pub fn case_insensitive(kind: impl Into<String>) -> Self {
        Self {
            case_insensitive: true,
            ..Self::new(kind)
        }
    }

    fn key(&self, name: &str) -> String {
        match self.case_insensitive {
            true => name.to_lowercase(),
            false => name.to_string(),
        }
    }

    /// Registers `factory` under `name`.
    ///
    /// Registering the same name twice is rejected.
    pub fn register(&mut self, name: &str, factory: F) -> Result<(), AbodeError> {
        let key = self.key(name);
        if self.entries.contains_key(&key) {
            return Err(AbodeError::ConfigurationError(format!(
                "{} '{}' is already registered",
                self.kind, name
            )));
        }
        debug!("Registered {} '{}'", self.kind, key);
        self.entries.insert(key, factory);
        Ok(())
    }

    /// Looks up the factory registered under `name`.
    pub fn get(&self, name: &str) -> Result<&F, AbodeError> {
        self.entries.get(&self.key(name)).ok_or_else(|| {
            AbodeError::ConfigurationError(format!(
                "Did not recognize {} '{}', registered: {:?}",
                self.kind,
                name,
                self.names()
            ))
        })
    }

    /// Returns `true` if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&self.key(name))
    }

    /// Returns the registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(|k| k.as_str()).collect()
    }
}
