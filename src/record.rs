//! Snapshot records
//!
//! A [`Record`] is a small ordered list of [`Entry`] values. Each entry either
//! references a context tree node (a whole nested path) or carries an
//! immediate `(attribute, value)` pair.
//!
//! Entries are searched, not indexed: lookups scan the list. Order is kept so
//! that inclusive propagation and region profiles see entries as produced.
//!
//! # Wire format
//!
//! ```text
//! [varint n_refs] [varint node id]*
//! [varint n_imm]  ([varint attribute id] [value])*
//! ```
//!
//! Ids on the wire belong to the producing store; decoding translates them
//! through an [`IdMap`].

use std::fmt;

use crate::codec::{write_varint, Reader};
use crate::error::{Error, Result};
use crate::metadata::{IdMap, MetadataStore};
use crate::types::{AttributeId, NodeId};
use crate::value::Value;

/// One entry of a record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Entry {
    /// Reference to a context tree node
    Reference(NodeId),
    /// Immediate attribute/value pair
    Immediate(AttributeId, Value),
}

impl Entry {
    /// Build an immediate entry
    pub fn immediate(attribute: AttributeId, value: impl Into<Value>) -> Self {
        Entry::Immediate(attribute, value.into())
    }

    /// Referenced node, if this is a reference entry
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Entry::Reference(id) => Some(*id),
            Entry::Immediate(..) => None,
        }
    }

    /// Whether this is a reference entry
    pub fn is_reference(&self) -> bool {
        matches!(self, Entry::Reference(_))
    }

    /// Attribute of the entry: the node's own attribute for references
    pub fn attribute(&self, db: &MetadataStore) -> Option<AttributeId> {
        match self {
            Entry::Reference(id) => db.node(*id).map(|n| n.attribute()),
            Entry::Immediate(attr, _) => Some(*attr),
        }
    }

    /// Value of the entry: the node's own value for references
    pub fn value(&self, db: &MetadataStore) -> Option<Value> {
        match self {
            Entry::Reference(id) => db.node(*id).map(|n| n.value().clone()),
            Entry::Immediate(_, value) => Some(value.clone()),
        }
    }

    /// Value of `attribute` as seen by this entry
    ///
    /// Reference entries search their parent chain, nearest node first.
    pub fn value_of(&self, db: &MetadataStore, attribute: AttributeId) -> Option<Value> {
        match self {
            Entry::Immediate(attr, value) if *attr == attribute => Some(value.clone()),
            Entry::Immediate(..) => None,
            Entry::Reference(id) => db
                .parent_chain(*id)
                .find(|n| n.attribute() == attribute)
                .map(|n| n.value().clone()),
        }
    }
}

/// An ordered list of entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    entries: Vec<Entry>,
}

impl Record {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-allocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Append an entry
    pub fn push(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    /// Append a node reference
    pub fn push_reference(&mut self, node: NodeId) {
        self.entries.push(Entry::Reference(node));
    }

    /// Append an immediate pair
    pub fn push_immediate(&mut self, attribute: AttributeId, value: impl Into<Value>) {
        self.entries.push(Entry::Immediate(attribute, value.into()));
    }

    /// Builder-style [`push_reference`](Self::push_reference)
    pub fn with_reference(mut self, node: NodeId) -> Self {
        self.push_reference(node);
        self
    }

    /// Builder-style [`push_immediate`](Self::push_immediate)
    pub fn with_immediate(mut self, attribute: AttributeId, value: impl Into<Value>) -> Self {
        self.push_immediate(attribute, value);
        self
    }

    /// Entries in order
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Iterate over entries
    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the record has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Referenced nodes in order
    pub fn references(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.iter().filter_map(Entry::node)
    }

    /// Value of the first immediate entry for `attribute`
    pub fn immediate(&self, attribute: AttributeId) -> Option<&Value> {
        self.entries.iter().find_map(|e| match e {
            Entry::Immediate(attr, value) if *attr == attribute => Some(value),
            _ => None,
        })
    }

    /// Value of `attribute` anywhere in the record
    ///
    /// Immediates are checked first, then the reference chains in order.
    pub fn get(&self, db: &MetadataStore, attribute: AttributeId) -> Option<Value> {
        if let Some(value) = self.immediate(attribute) {
            return Some(value.clone());
        }
        self.entries
            .iter()
            .filter(|e| e.is_reference())
            .find_map(|e| e.value_of(db, attribute))
    }

    // ========================================================================
    // Wire encoding
    // ========================================================================

    /// Append the wire encoding to `buf`
    pub fn pack(&self, buf: &mut Vec<u8>) {
        let refs: Vec<NodeId> = self.references().collect();
        write_varint(buf, refs.len() as u64);
        for id in refs {
            write_varint(buf, id.as_u64());
        }

        let n_imm = self.entries.len() - self.references().count();
        write_varint(buf, n_imm as u64);
        for entry in &self.entries {
            if let Entry::Immediate(attr, value) = entry {
                write_varint(buf, attr.as_u64());
                value.pack(buf);
            }
        }
    }

    /// Wire encoding as a fresh buffer
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.pack(&mut buf);
        buf
    }

    /// Decode one record, translating foreign ids through `idmap`
    ///
    /// References come first in the decoded record, followed by immediates.
    pub fn unpack(reader: &mut Reader<'_>, db: &MetadataStore, idmap: &IdMap) -> Result<Record> {
        let n_refs = reader.varint()?;
        let mut refs = Vec::with_capacity(n_refs.min(64) as usize);
        for _ in 0..n_refs {
            refs.push(reader.varint()?);
        }

        let n_imm = reader.varint()?;
        let mut imms = Vec::with_capacity(n_imm.min(64) as usize);
        for _ in 0..n_imm {
            let attr = reader.varint()?;
            imms.push((attr, Value::unpack(reader)?));
        }

        db.merge_record(&refs, &imms, idmap).map_err(Error::from)
    }

    /// Decode a buffer holding exactly one record
    pub fn from_bytes(data: &[u8], db: &MetadataStore, idmap: &IdMap) -> Result<Record> {
        let mut reader = Reader::new(data);
        let record = Self::unpack(&mut reader, db, idmap)?;
        reader.finish()?;
        Ok(record)
    }
}

impl From<Vec<Entry>> for Record {
    fn from(entries: Vec<Entry>) -> Self {
        Self { entries }
    }
}

impl FromIterator<Entry> for Record {
    fn from_iter<T: IntoIterator<Item = Entry>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl IntoIterator for Record {
    type Item = Entry;
    type IntoIter = std::vec::IntoIter<Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match entry {
                Entry::Reference(id) => write!(f, "@{}", id)?,
                Entry::Immediate(attr, value) => write!(f, "{}={}", attr, value)?,
            }
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttributeProperties, ValueType};

    fn setup() -> (MetadataStore, AttributeId, AttributeId, NodeId) {
        let db = MetadataStore::new();
        let func = db
            .create_attribute("function", ValueType::String, AttributeProperties::NESTED)
            .unwrap()
            .id();
        let time = db
            .create_attribute("time", ValueType::Int, AttributeProperties::AS_VALUE)
            .unwrap()
            .id();
        let main = Value::from("main");
        let solve = Value::from("solve");
        let node = db.intern_path([(func, &main), (func, &solve)]).unwrap();
        (db, func, time, node)
    }

    #[test]
    fn test_lookup_prefers_immediates_then_chains() {
        let (db, func, time, node) = setup();
        let record = Record::new()
            .with_reference(node)
            .with_immediate(time, 12i64);

        assert_eq!(record.get(&db, time), Some(Value::Int(12)));
        assert_eq!(record.get(&db, func), Some(Value::from("solve")));
        assert_eq!(record.immediate(func), None);
        assert_eq!(record.references().collect::<Vec<_>>(), vec![node]);
    }

    #[test]
    fn test_entry_attribute_of_reference_is_node_attribute() {
        let (db, func, time, node) = setup();
        assert_eq!(Entry::Reference(node).attribute(&db), Some(func));
        assert_eq!(Entry::immediate(time, 1i64).attribute(&db), Some(time));
        assert_eq!(
            Entry::Reference(node).value(&db),
            Some(Value::from("solve"))
        );
    }

    #[test]
    fn test_pack_unpack_same_store() {
        let (db, _, time, node) = setup();
        let record = Record::new()
            .with_reference(node)
            .with_immediate(time, -5i64);

        let bytes = record.to_bytes();
        let decoded = Record::from_bytes(&bytes, &db, &IdMap::new()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_unpack_unknown_node_fails() {
        let (db, _, time, _) = setup();
        let mut bytes = Vec::new();
        write_varint(&mut bytes, 1);
        write_varint(&mut bytes, 4242);
        write_varint(&mut bytes, 1);
        write_varint(&mut bytes, time.as_u64());
        Value::Int(1).pack(&mut bytes);

        assert!(matches!(
            Record::from_bytes(&bytes, &db, &IdMap::new()),
            Err(Error::Metadata(_))
        ));
    }

    #[test]
    fn test_display() {
        let record = Record::new()
            .with_reference(NodeId(3))
            .with_immediate(AttributeId(1), 7i64);
        assert_eq!(record.to_string(), "{@3, 1=7}");
    }
}
