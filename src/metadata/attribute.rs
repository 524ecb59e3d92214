//! Attribute Registry
//!
//! Attributes are registered once by name and are immutable afterwards.
//! Creation is idempotent: registering a name that already exists returns the
//! existing attribute unchanged, whatever type or properties were requested.
//!
//! # Thread Safety
//!
//! The registry uses a `RwLock` with a read-locked fast path for lookups of
//! already registered names and a double-checked write path for creation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::MetadataError;
use crate::types::{AttributeId, AttributeProperties, ValueType};

/// Maximum allowed length of an attribute name
pub const MAX_ATTRIBUTE_NAME_LENGTH: usize = 512;

// ============================================================================
// Attribute
// ============================================================================

/// A registered attribute
///
/// Cheap to clone; the name is shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Attribute {
    id: AttributeId,
    name: Arc<str>,
    value_type: ValueType,
    properties: AttributeProperties,
}

impl Attribute {
    /// Attribute id
    pub fn id(&self) -> AttributeId {
        self.id
    }

    /// Attribute name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared value type
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Property set
    pub fn properties(&self) -> AttributeProperties {
        self.properties
    }

    /// Whether the attribute forms context tree edges
    pub fn is_nested(&self) -> bool {
        self.properties.contains(AttributeProperties::NESTED)
    }

    /// Whether the attribute is stored only as an immediate value
    pub fn is_as_value(&self) -> bool {
        self.properties.contains(AttributeProperties::AS_VALUE)
    }

    /// Whether the attribute is hidden
    pub fn is_hidden(&self) -> bool {
        self.properties.contains(AttributeProperties::HIDDEN)
    }

    /// Whether the attribute is excluded from event processing
    pub fn is_skip_events(&self) -> bool {
        self.properties.contains(AttributeProperties::SKIP_EVENTS)
    }
}

// ============================================================================
// Attribute Registry
// ============================================================================

#[derive(Debug, Default)]
struct RegistryInner {
    by_name: HashMap<Arc<str>, AttributeId>,
    attributes: Vec<Attribute>,
}

/// Thread-safe registry of attributes
#[derive(Debug, Default)]
pub struct AttributeRegistry {
    inner: RwLock<RegistryInner>,
}

impl AttributeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an attribute, or return the existing one with this name
    pub fn create(
        &self,
        name: &str,
        value_type: ValueType,
        properties: AttributeProperties,
    ) -> Result<Attribute, MetadataError> {
        if name.is_empty() || name.len() > MAX_ATTRIBUTE_NAME_LENGTH {
            return Err(MetadataError::InvalidAttributeName(name.to_string()));
        }

        // Fast path: already registered
        if let Some(attr) = self.find(name) {
            return Ok(attr);
        }

        let mut inner = self.inner.write();

        // Double-check after acquiring the write lock
        if let Some(&id) = inner.by_name.get(name) {
            return Ok(inner.attributes[id.0 as usize].clone());
        }

        let id = AttributeId::allocate(inner.attributes.len())?;
        let attr = Attribute {
            id,
            name: Arc::from(name),
            value_type,
            properties,
        };
        inner.by_name.insert(attr.name.clone(), id);
        inner.attributes.push(attr.clone());

        Ok(attr)
    }

    /// Look up an attribute by name
    pub fn find(&self, name: &str) -> Option<Attribute> {
        let inner = self.inner.read();
        inner
            .by_name
            .get(name)
            .map(|id| inner.attributes[id.0 as usize].clone())
    }

    /// Look up an attribute by id
    pub fn get(&self, id: AttributeId) -> Option<Attribute> {
        self.inner.read().attributes.get(id.0 as usize).cloned()
    }

    /// All attributes in id order
    pub fn all(&self) -> Vec<Attribute> {
        self.inner.read().attributes.clone()
    }

    /// Number of registered attributes
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().attributes.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
