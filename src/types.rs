//! Core identifier and property types used throughout the engine
//!
//! # Key Types
//!
//! - **`AttributeId`**: Compact identifier of a registered attribute
//! - **`NodeId`**: Arena index of a node in the context tree
//! - **`ValueType`**: Type tag carried by every [`Value`](crate::value::Value)
//! - **`AttributeProperties`**: Property bit-set controlling keying and nesting
//!
//! # Example
//!
//! ```rust
//! use snapagg::types::{AttributeProperties, NodeId, ValueType};
//!
//! let props = AttributeProperties::NESTED | AttributeProperties::HIDDEN;
//! assert!(props.contains(AttributeProperties::NESTED));
//!
//! assert_eq!(ValueType::from_tag(4), Some(ValueType::String));
//! assert!(NodeId::ROOT.is_root());
//! ```

use bitflags::bitflags;
use std::fmt;

use crate::error::MetadataError;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of an attribute in a [`MetadataStore`](crate::metadata::MetadataStore)
///
/// Ids are assigned densely in creation order. `AttributeId::INVALID` marks the
/// artificial root node of the context tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeId(pub u32);

impl AttributeId {
    /// Attribute id of the tree root and of unresolved attributes
    pub const INVALID: AttributeId = AttributeId(u32::MAX);

    /// Whether this id refers to a real attribute
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    /// Id as u64, the width used on the wire
    pub fn as_u64(self) -> u64 {
        self.0 as u64
    }

    /// Id for the next attribute of a registry holding `len` attributes
    ///
    /// `u32::MAX` is reserved for [`INVALID`](Self::INVALID).
    pub(crate) fn allocate(len: usize) -> Result<Self, MetadataError> {
        u32::try_from(len)
            .ok()
            .filter(|&id| id != u32::MAX)
            .map(AttributeId)
            .ok_or(MetadataError::IdSpaceExhausted {
                kind: "attribute",
                len,
            })
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "<invalid>")
        }
    }
}

/// Index of a node in the context tree arena
///
/// Node 0 is always the artificial root. It never appears in parent chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    /// The artificial root node
    pub const ROOT: NodeId = NodeId(0);

    /// Whether this is the root node
    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }

    /// Id as u64, the width used on the wire
    pub fn as_u64(self) -> u64 {
        self.0 as u64
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    /// Id for the next node of an arena holding `len` nodes
    pub(crate) fn allocate(len: usize) -> Result<Self, MetadataError> {
        u32::try_from(len)
            .map(NodeId)
            .map_err(|_| MetadataError::IdSpaceExhausted { kind: "node", len })
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Value types
// ============================================================================

/// Type tag of a value
///
/// The discriminants double as the one-byte type tag of the wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ValueType {
    /// Empty / invalid value
    Inv = 0,
    /// Opaque user blob
    Usr = 1,
    /// Signed 64-bit integer
    Int = 2,
    /// Unsigned 64-bit integer
    UInt = 3,
    /// UTF-8 string
    String = 4,
    /// Opaque address
    Addr = 5,
    /// IEEE-754 double
    Double = 6,
    /// Boolean
    Bool = 7,
    /// A type tag itself
    Type = 8,
}

impl ValueType {
    /// Wire tag of this type
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Decode a wire tag
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => ValueType::Inv,
            1 => ValueType::Usr,
            2 => ValueType::Int,
            3 => ValueType::UInt,
            4 => ValueType::String,
            5 => ValueType::Addr,
            6 => ValueType::Double,
            7 => ValueType::Bool,
            8 => ValueType::Type,
            _ => return None,
        })
    }

    /// Lower-case type name
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Inv => "inv",
            ValueType::Usr => "usr",
            ValueType::Int => "int",
            ValueType::UInt => "uint",
            ValueType::String => "string",
            ValueType::Addr => "addr",
            ValueType::Double => "double",
            ValueType::Bool => "bool",
            ValueType::Type => "type",
        }
    }

    /// Whether values of this type take part in arithmetic kernels
    pub fn is_numeric(self) -> bool {
        matches!(self, ValueType::Int | ValueType::UInt | ValueType::Double)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Attribute properties
// ============================================================================

bitflags! {
    /// Property bit-set of an attribute
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct AttributeProperties: u32 {
        /// Participates in hierarchical context and forms tree edges
        const NESTED = 0x01;
        /// Stored only as an immediate leaf value
        const AS_VALUE = 0x02;
        /// Excluded from default aggregation keys
        const SKIP_EVENTS = 0x04;
        /// Internal attribute, excluded from default keys
        const HIDDEN = 0x08;
    }
}

impl AttributeProperties {
    /// No properties set
    pub const DEFAULT: AttributeProperties = AttributeProperties::empty();
}

impl Default for AttributeProperties {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_tags() {
        for tag in 0..=8u8 {
            let ty = ValueType::from_tag(tag).unwrap();
            assert_eq!(ty.tag(), tag);
        }
        assert_eq!(ValueType::from_tag(9), None);
    }

    #[test]
    fn test_invalid_attribute() {
        assert!(!AttributeId::INVALID.is_valid());
        assert!(AttributeId(0).is_valid());
        assert_eq!(AttributeId::INVALID.to_string(), "<invalid>");
    }

    #[test]
    fn test_properties_default_is_empty() {
        assert!(AttributeProperties::default().is_empty());
        let p = AttributeProperties::AS_VALUE | AttributeProperties::SKIP_EVENTS;
        assert!(!p.contains(AttributeProperties::NESTED));
        assert_eq!(AttributeProperties::from_bits_truncate(p.bits()), p);
    }

    #[test]
    fn test_id_allocation_is_bounded() {
        assert_eq!(NodeId::allocate(7), Ok(NodeId(7)));
        assert_eq!(NodeId::allocate(u32::MAX as usize), Ok(NodeId(u32::MAX)));
        assert_eq!(AttributeId::allocate(3), Ok(AttributeId(3)));

        // u32::MAX is the invalid attribute marker
        assert!(matches!(
            AttributeId::allocate(u32::MAX as usize),
            Err(MetadataError::IdSpaceExhausted { kind: "attribute", .. })
        ));

        #[cfg(target_pointer_width = "64")]
        {
            let past = u32::MAX as usize + 1;
            assert_eq!(
                NodeId::allocate(past),
                Err(MetadataError::IdSpaceExhausted { kind: "node", len: past })
            );
            assert!(AttributeId::allocate(past).is_err());
        }
    }
}
