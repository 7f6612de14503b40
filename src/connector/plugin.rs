//! Connector types and the type registry
//!
//! A [`ConnectorType`] is the pluggable part of the system: it validates a
//! property map and builds running [`Connector`]s from stored
//! configurations. Types are looked up by name in a [`TypeRegistry`] that
//! is filled at startup from the `[[plugins]]` manifest.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use super::{Connector, ConnectorError, ConnectorResult, FilesystemType};
use crate::config::PluginConfig;
use crate::storage::StoredConfiguration;

/// Type-specific configuration properties
pub type Properties = BTreeMap<String, String>;

// ============================================================================
// Validation
// ============================================================================

/// Result of validating a configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Configuration is usable; the map is the one to install and may differ
    /// from what was submitted
    Accepted(Properties),

    /// Configuration was refused; the caller can fix and resubmit
    Rejected {
        message: String,
        suggested: Option<Properties>,
    },
}

impl ValidationOutcome {
    pub fn reject(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
            suggested: None,
        }
    }

    /// Interpret a plugin response carrying an optional message and an
    /// optional altered configuration.
    ///
    /// A message always means rejection, even with an altered configuration
    /// attached. Without a message the altered configuration, if any,
    /// replaces `submitted`.
    pub fn from_response(
        message: Option<String>,
        altered: Option<Properties>,
        submitted: &Properties,
    ) -> Self {
        match message {
            Some(message) => Self::Rejected {
                message,
                suggested: altered,
            },
            None => Self::Accepted(altered.unwrap_or_else(|| submitted.clone())),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

// ============================================================================
// Plugin Contract
// ============================================================================

/// Builds trial connectors during validation without persisting anything
pub trait ConnectorFactory: Send + Sync {
    fn make_connector(&self, properties: &Properties) -> ConnectorResult<Arc<dyn Connector>>;
}

/// A pluggable connector implementation
pub trait ConnectorType: Send + Sync {
    /// Name the type is registered under
    fn type_name(&self) -> &str;

    /// Check a configuration before it is installed.
    ///
    /// Expected refusals are `Ok(ValidationOutcome::Rejected { .. })`; `Err`
    /// is reserved for failures the caller cannot fix by editing the form.
    fn validate_config(
        &self,
        properties: &Properties,
        locale: &str,
        factory: &dyn ConnectorFactory,
    ) -> ConnectorResult<ValidationOutcome>;

    /// Build a running connector for instance `name`
    fn instantiate(
        &self,
        name: &str,
        config: &StoredConfiguration,
    ) -> ConnectorResult<Arc<dyn Connector>>;
}

/// Factory handed to `validate_config`
pub struct TrialFactory<'a> {
    connector_type: &'a dyn ConnectorType,
    instance_name: &'a str,
}

impl<'a> TrialFactory<'a> {
    pub fn new(connector_type: &'a dyn ConnectorType, instance_name: &'a str) -> Self {
        Self {
            connector_type,
            instance_name,
        }
    }
}

impl ConnectorFactory for TrialFactory<'_> {
    fn make_connector(&self, properties: &Properties) -> ConnectorResult<Arc<dyn Connector>> {
        tracing::debug!(
            connector = %self.instance_name,
            type_name = self.connector_type.type_name(),
            "Building trial connector"
        );
        let config = StoredConfiguration::new(self.connector_type.type_name(), properties.clone());
        self.connector_type.instantiate(self.instance_name, &config)
    }
}

// ============================================================================
// Type Registry
// ============================================================================

/// Map from type name to connector type
#[derive(Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<String, Arc<dyn ConnectorType>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Types compiled into this binary
    pub fn builtin_catalog() -> Vec<Arc<dyn ConnectorType>> {
        vec![Arc::new(FilesystemType)]
    }

    /// Registry holding every built-in type
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for connector_type in Self::builtin_catalog() {
            registry.register(connector_type);
        }
        registry
    }

    /// Build a registry from the plugin manifest.
    ///
    /// An empty manifest enables the whole catalog. Entries naming a type
    /// that is not in the catalog are an error.
    pub fn from_manifest(
        manifest: &[PluginConfig],
        catalog: Vec<Arc<dyn ConnectorType>>,
    ) -> ConnectorResult<Self> {
        let mut registry = Self::new();

        if manifest.is_empty() {
            for connector_type in catalog {
                registry.register(connector_type);
            }
            return Ok(registry);
        }

        let available: HashMap<String, Arc<dyn ConnectorType>> = catalog
            .into_iter()
            .map(|t| (t.type_name().to_string(), t))
            .collect();

        for entry in manifest {
            let connector_type = available
                .get(&entry.type_name)
                .ok_or_else(|| ConnectorError::unknown_type(&entry.type_name))?;

            if entry.enabled {
                registry.register(connector_type.clone());
            } else {
                tracing::info!(type_name = %entry.type_name, "Connector type disabled by manifest");
            }
        }

        Ok(registry)
    }

    /// Register a type, replacing any previous one of the same name
    pub fn register(
        &mut self,
        connector_type: Arc<dyn ConnectorType>,
    ) -> Option<Arc<dyn ConnectorType>> {
        let name = connector_type.type_name().to_string();
        tracing::debug!(type_name = %name, "Registered connector type");
        self.types.insert(name, connector_type)
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<dyn ConnectorType>> {
        self.types.get(type_name).cloned()
    }

    /// Look up a type or fail with `UnknownType`
    pub fn require(&self, type_name: &str) -> ConnectorResult<Arc<dyn ConnectorType>> {
        self.get(type_name)
            .ok_or_else(|| ConnectorError::unknown_type(type_name))
    }

    /// Registered type names, sorted
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}
