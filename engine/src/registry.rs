//! Type registry.
//!
//! Each entity type used with the sync client is registered once with an
//! identity function `T -> RecordKey`. The registry is keyed by `TypeId`
//! and hands back the typed registration at every call site.

use crate::{error::Result, Error, RecordKey};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Equality strategy for record keys.
pub type KeyComparer = Arc<dyn Fn(&RecordKey, &RecordKey) -> bool + Send + Sync>;

/// Registration metadata for one entity type.
pub struct TypeRegistration<T> {
    type_name: String,
    identity: Arc<dyn Fn(&T) -> RecordKey + Send + Sync>,
    comparer: Option<KeyComparer>,
}

impl<T: 'static> TypeRegistration<T> {
    /// Register `T` with an identity function.
    ///
    /// The function may return anything convertible into a [`RecordKey`]:
    /// a string, an integer, a UUID, an `Option` of those, or a composite
    /// built with [`RecordKey::composite`].
    pub fn new<K, F>(identity: F) -> Self
    where
        F: Fn(&T) -> K + Send + Sync + 'static,
        K: Into<RecordKey>,
    {
        Self {
            type_name: short_type_name::<T>(),
            identity: Arc::new(move |value| identity(value).into()),
            comparer: None,
        }
    }

    /// Override the type name used to namespace storage.
    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }

    /// Use a custom equality for keys instead of `==`.
    pub fn with_comparer<F>(mut self, comparer: F) -> Self
    where
        F: Fn(&RecordKey, &RecordKey) -> bool + Send + Sync + 'static,
    {
        self.comparer = Some(Arc::new(comparer));
        self
    }
}

impl<T> TypeRegistration<T> {
    /// The storage type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Extract and validate the key of a value.
    pub fn key_of(&self, value: &T) -> Result<RecordKey> {
        let key = (self.identity)(value);
        self.check_key(&key)?;
        Ok(key)
    }

    /// Validate a key supplied directly by a caller.
    pub fn check_key(&self, key: &RecordKey) -> Result<()> {
        key.validate().map_err(|reason| Error::InvalidIdentity {
            type_name: self.type_name.clone(),
            reason,
        })
    }

    /// Compare two keys with the registered strategy.
    pub fn keys_equal(&self, a: &RecordKey, b: &RecordKey) -> bool {
        match &self.comparer {
            Some(comparer) => comparer(a, b),
            None => a == b,
        }
    }

    /// Whether a custom comparer was installed.
    pub fn has_custom_comparer(&self) -> bool {
        self.comparer.is_some()
    }

    /// Check that namespaces built from this type name are unambiguous.
    ///
    /// The type name must be non-empty and must not contain the partition
    /// separator, so the first separator in a namespace always ends the type
    /// name and any partition string maps to exactly one namespace.
    pub fn check_type_name(&self, separator: &str) -> Result<()> {
        let reason = if self.type_name.trim().is_empty() {
            "type name is empty".to_string()
        } else if separator.is_empty() {
            "partition separator is empty".to_string()
        } else if self.type_name.contains(separator) {
            format!("type name contains the partition separator '{}'", separator)
        } else {
            return Ok(());
        };
        Err(Error::InvalidTypeName {
            type_name: self.type_name.clone(),
            reason,
        })
    }

    /// Storage namespace for a partition of this type.
    pub fn namespace(&self, partition: Option<&str>, separator: &str) -> String {
        match partition {
            Some(partition) => format!("{}{}{}", self.type_name, separator, partition),
            None => self.type_name.clone(),
        }
    }
}

impl<T> Clone for TypeRegistration<T> {
    fn clone(&self) -> Self {
        Self {
            type_name: self.type_name.clone(),
            identity: Arc::clone(&self.identity),
            comparer: self.comparer.clone(),
        }
    }
}

impl<T> fmt::Debug for TypeRegistration<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistration")
            .field("type_name", &self.type_name)
            .field("custom_comparer", &self.comparer.is_some())
            .finish()
    }
}

/// `std::any::type_name` without module path or generic arguments.
fn short_type_name<T>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

struct RegisteredType {
    type_name: String,
    registration: Arc<dyn Any + Send + Sync>,
}

/// Registry of all registered types.
///
/// Registering a type twice replaces the earlier registration.
#[derive(Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<TypeId, RegisteredType>>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the registration for `T`.
    pub fn insert<T: 'static>(&self, registration: TypeRegistration<T>) {
        let entry = RegisteredType {
            type_name: registration.type_name.clone(),
            registration: Arc::new(registration),
        };
        self.types
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(TypeId::of::<T>(), entry);
    }

    /// Look up the registration for `T`.
    pub fn get<T: 'static>(&self) -> Result<Arc<TypeRegistration<T>>> {
        let entry = self
            .types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TypeId::of::<T>())
            .map(|registered| Arc::clone(&registered.registration))
            .ok_or(Error::TypeNotRegistered(std::any::type_name::<T>()))?;

        entry
            .downcast::<TypeRegistration<T>>()
            .map_err(|_| Error::TypeNotRegistered(std::any::type_name::<T>()))
    }

    /// Whether `T` is registered.
    pub fn contains<T: 'static>(&self) -> bool {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&TypeId::of::<T>())
    }

    /// Storage names of every registered type, sorted.
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|registered| registered.type_name.clone())
            .collect();
        names.sort();
        names
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.types.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.len())
            .finish()
    }
}
