//! Error types for the aggregation engine

use thiserror::Error;

use crate::types::{AttributeId, NodeId};

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    /// Wire decoding error
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Attribute or context tree error
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// Malformed aggregation spec
    #[error("Spec error: {0}")]
    Spec(#[from] SpecError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors decoding the binary value/record encoding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended in the middle of an item
    #[error("Truncated input: needed {needed} more bytes at offset {offset}")]
    Truncated {
        /// Offset where decoding stopped
        offset: usize,
        /// Bytes still required
        needed: usize,
    },

    /// A varint did not terminate within 64 bits
    #[error("Varint overflow at offset {0}")]
    VarintOverflow(usize),

    /// Unknown value type tag
    #[error("Unknown type tag: {0}")]
    UnknownTypeTag(u8),

    /// String payload is not valid UTF-8
    #[error("Invalid UTF-8 in string payload")]
    InvalidUtf8,

    /// A payload value is out of range for its type
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Bytes left over after a complete item
    #[error("{0} trailing bytes after complete item")]
    TrailingBytes(usize),
}

/// Errors raised by the attribute registry and context tree
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    /// No attribute with this id
    #[error("Unknown attribute id: {0}")]
    UnknownAttribute(AttributeId),

    /// The registry or tree ran out of 32-bit ids
    #[error("{kind} id space exhausted at {len} entries")]
    IdSpaceExhausted {
        /// What ran out: "attribute" or "node"
        kind: &'static str,
        /// Number of entries already allocated
        len: usize,
    },

    /// Attribute name rejected
    #[error("Invalid attribute name: {0}")]
    InvalidAttributeName(String),

    /// No node with this id
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    /// A foreign node's parent could not be mapped to a local node
    #[error("Cannot resolve parent {parent} of foreign node {node}")]
    UnresolvedParent {
        /// Foreign id of the node being merged
        node: u64,
        /// Foreign id of its parent
        parent: u64,
    },

    /// A foreign id could not be mapped to a local node
    #[error("Cannot resolve foreign node {0}")]
    UnresolvedNode(u64),

    /// A foreign attribute id could not be mapped to a local attribute
    #[error("Cannot resolve foreign attribute {0}")]
    UnresolvedAttribute(u64),
}

/// Malformed aggregation op or key specification
///
/// Reported once when an aggregator is built; the offending op is skipped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpecError {
    /// No kernel with this name
    #[error("Unknown aggregation kernel: {0}")]
    UnknownKernel(String),

    /// Wrong number of input attributes
    #[error("Kernel {kernel} expects {expected} input attribute(s), got {actual}")]
    WrongArity {
        /// Kernel name
        kernel: String,
        /// Expected input count
        expected: usize,
        /// Supplied input count
        actual: usize,
    },

    /// Wrong number of numeric arguments
    #[error("Kernel {kernel} expects {min}..={max} numeric argument(s), got {actual}")]
    WrongArgumentCount {
        /// Kernel name
        kernel: String,
        /// Minimum argument count
        min: usize,
        /// Maximum argument count
        max: usize,
        /// Supplied argument count
        actual: usize,
    },

    /// A numeric argument is not finite
    #[error("Kernel {kernel} has non-finite argument {value}")]
    InvalidArgument {
        /// Kernel name
        kernel: String,
        /// Offending value
        value: f64,
    },

    /// Empty attribute name in a key list or op
    #[error("Empty attribute name in {0}")]
    EmptyAttributeName(String),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversions() {
        let err: Error = CodecError::UnknownTypeTag(42).into();
        assert!(matches!(err, Error::Codec(CodecError::UnknownTypeTag(42))));

        let err: Error = MetadataError::UnknownNode(NodeId(7)).into();
        assert_eq!(err.to_string(), "Metadata error: Unknown node: 7");
    }

    #[test]
    fn test_spec_error_display() {
        let err = SpecError::WrongArity {
            kernel: "ratio".to_string(),
            expected: 2,
            actual: 1,
        };
        assert_eq!(
            err.to_string(),
            "Kernel ratio expects 2 input attribute(s), got 1"
        );
    }
}
