//! Portable descriptions of attributes and nodes
//!
//! These carry metadata across store instances (threads, processes) so that
//! records referencing foreign ids can be re-interned locally through an
//! [`IdMap`](super::IdMap).
//!
//! ```text
//! AttributeInfo: [varint id][varint name len][name][type tag][varint props]
//! NodeInfo:      [varint id][varint attribute][varint parent + 1][value]
//! ```
//!
//! A parent of `0` on the wire means the node hangs off the root.

use crate::codec::{write_varint, Reader};
use crate::error::CodecError;
use crate::types::{AttributeProperties, ValueType};
use crate::value::Value;

/// Description of an attribute as known to its origin store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeInfo {
    /// Attribute id in the origin store
    pub id: u64,
    /// Attribute name
    pub name: String,
    /// Value type
    pub value_type: ValueType,
    /// Property set
    pub properties: AttributeProperties,
}

impl AttributeInfo {
    /// Append the encoding to `buf`
    pub fn pack(&self, buf: &mut Vec<u8>) {
        write_varint(buf, self.id);
        write_varint(buf, self.name.len() as u64);
        buf.extend_from_slice(self.name.as_bytes());
        buf.push(self.value_type.tag());
        write_varint(buf, self.properties.bits() as u64);
    }

    /// Decode one attribute description
    pub fn unpack(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let id = reader.varint()?;
        let len = reader.length()?;
        let name = std::str::from_utf8(reader.bytes(len)?)
            .map_err(|_| CodecError::InvalidUtf8)?
            .to_string();
        let tag = reader.byte()?;
        let value_type = ValueType::from_tag(tag).ok_or(CodecError::UnknownTypeTag(tag))?;
        let bits = reader.varint()?;
        let bits = u32::try_from(bits)
            .map_err(|_| CodecError::InvalidValue(format!("property bits {}", bits)))?;

        Ok(Self {
            id,
            name,
            value_type,
            properties: AttributeProperties::from_bits_truncate(bits),
        })
    }
}

/// Description of a context tree node as known to its origin store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// Node id in the origin store
    pub id: u64,
    /// Attribute id in the origin store
    pub attribute: u64,
    /// Parent id in the origin store; `None` for top-level nodes
    pub parent: Option<u64>,
    /// Node value
    pub value: Value,
}

impl NodeInfo {
    /// Append the encoding to `buf`
    pub fn pack(&self, buf: &mut Vec<u8>) {
        write_varint(buf, self.id);
        write_varint(buf, self.attribute);
        write_varint(buf, self.parent.map_or(0, |p| p.saturating_add(1)));
        self.value.pack(buf);
    }

    /// Decode one node description
    pub fn unpack(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let id = reader.varint()?;
        let attribute = reader.varint()?;
        let parent = reader.varint()?.checked_sub(1);
        let value = Value::unpack(reader)?;
        Ok(Self {
            id,
            attribute,
            parent,
            value,
        })
    }
}

/// Encode a batch of attribute and node descriptions
///
/// Layout: `[varint n_attrs][attrs...][varint n_nodes][nodes...]`.
pub fn pack_metadata(attributes: &[AttributeInfo], nodes: &[NodeInfo]) -> Vec<u8> {
    let mut buf = Vec::new();
    write_varint(&mut buf, attributes.len() as u64);
    for attr in attributes {
        attr.pack(&mut buf);
    }
    write_varint(&mut buf, nodes.len() as u64);
    for node in nodes {
        node.pack(&mut buf);
    }
    buf
}

/// Decode a batch produced by [`pack_metadata`]
pub fn unpack_metadata(data: &[u8]) -> Result<(Vec<AttributeInfo>, Vec<NodeInfo>), CodecError> {
    let mut reader = Reader::new(data);

    let n_attrs = reader.varint()?;
    let mut attributes = Vec::with_capacity(n_attrs.min(1024) as usize);
    for _ in 0..n_attrs {
        attributes.push(AttributeInfo::unpack(&mut reader)?);
    }

    let n_nodes = reader.varint()?;
    let mut nodes = Vec::with_capacity(n_nodes.min(1024) as usize);
    for _ in 0..n_nodes {
        nodes.push(NodeInfo::unpack(&mut reader)?);
    }

    reader.finish()?;
    Ok((attributes, nodes))
}
