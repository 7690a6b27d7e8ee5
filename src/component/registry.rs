//! Ordered, name-unique component registry.
//!
//! # Responsibilities
//! - Own every component for the lifetime of the process
//! - Preserve registration order (init/configure/run order)
//! - Reject duplicate names and prefixes without partial inserts
//! - Resolve components by name into their concrete type

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use super::{Component, ComponentState};

/// Error type for registry operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Component names must be non-empty.
    #[error("component name must not be empty")]
    EmptyName,

    /// A component with this name is already registered.
    #[error("component '{name}' is already registered")]
    DuplicateName {
        /// The conflicting name.
        name: String,
    },

    /// Another component already owns this configuration prefix.
    #[error("prefix '{prefix}' of component '{name}' is already owned by '{owner}'")]
    DuplicatePrefix {
        /// The conflicting prefix.
        prefix: String,
        /// The component being registered.
        name: String,
        /// The component that registered the prefix first.
        owner: String,
    },

    /// No component with this name.
    #[error("component '{name}' is not registered")]
    NotFound {
        /// The requested name.
        name: String,
    },

    /// The component exists but is not of the requested type.
    #[error("component '{name}' is not a {expected}")]
    TypeMismatch {
        /// The requested name.
        name: String,
        /// The requested type.
        expected: &'static str,
    },
}

struct Entry {
    component: Arc<dyn Component>,
    typed: Arc<dyn Any + Send + Sync>,
    state: Mutex<ComponentState>,
}

/// Ordered collection of named components.
#[derive(Default)]
pub struct Registry {
    entries: Vec<Entry>,
    by_name: HashMap<String, usize>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component, returning a typed handle to it.
    pub fn register<C: Component>(&mut self, component: C) -> Result<Arc<C>, RegistryError> {
        self.register_shared(Arc::new(component))
    }

    /// Register an already shared component.
    pub fn register_shared<C: Component>(
        &mut self,
        component: Arc<C>,
    ) -> Result<Arc<C>, RegistryError> {
        let name = component.name().to_string();
        let prefix = component.prefix();

        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.by_name.contains_key(&name) {
            return Err(RegistryError::DuplicateName { name });
        }
        if let Some(owner) = self.entries.iter().find(|e| e.component.prefix() == prefix) {
            return Err(RegistryError::DuplicatePrefix {
                prefix: prefix.to_string(),
                name,
                owner: owner.component.name().to_string(),
            });
        }

        tracing::debug!(component = %name, prefix = %prefix, "Component registered");

        self.by_name.insert(name, self.entries.len());
        self.entries.push(Entry {
            component: component.clone(),
            typed: component.clone(),
            state: Mutex::new(ComponentState::Created),
        });
        Ok(component)
    }

    /// Look up a component by name as its concrete type.
    ///
    /// Returns `None` when the name is unknown or the type does not match.
    pub fn resolve<C: Component>(&self, name: &str) -> Option<Arc<C>> {
        self.must_resolve(name).ok()
    }

    /// Look up a component by name, failing when it is absent or of another type.
    pub fn must_resolve<C: Component>(&self, name: &str) -> Result<Arc<C>, RegistryError> {
        let entry = self.entry(name).ok_or_else(|| RegistryError::NotFound {
            name: name.to_string(),
        })?;
        entry
            .typed
            .clone()
            .downcast::<C>()
            .map_err(|_| RegistryError::TypeMismatch {
                name: name.to_string(),
                expected: type_name::<C>(),
            })
    }

    /// Look up a component by name through the lifecycle contract only.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Component>> {
        self.entry(name).map(|e| e.component.clone())
    }

    /// Components in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Component>> + '_ {
        self.entries.iter().map(|e| &e.component)
    }

    /// Component names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.component.name()).collect()
    }

    /// Current lifecycle state of a component.
    pub fn state(&self, name: &str) -> Option<ComponentState> {
        self.entry(name).map(|e| *e.state.lock())
    }

    pub(crate) fn set_state(&self, name: &str, state: ComponentState) {
        if let Some(entry) = self.entry(name) {
            let mut current = entry.state.lock();
            tracing::trace!(component = %name, from = %*current, to = %state, "Component state change");
            *current = state;
        }
    }

    /// Number of registered components.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no component is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, name: &str) -> Option<&Entry> {
        self.by_name.get(name).and_then(|&i| self.entries.get(i))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("components", &self.names())
            .finish()
    }
}
