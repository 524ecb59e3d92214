//! Metadata Store for Attributes and Context Nodes
//!
//! The store owns the attribute registry and the context node tree and is the
//! single collaborator every aggregator and region profile is handed:
//!
//! ```text
//! ┌─────────────────────┐     ┌─────────────────────┐
//! │  AttributeRegistry  │     │  NodeTree           │
//! │  name → Attribute   │◀────│  (attr,parent,val)  │
//! └─────────────────────┘     └─────────────────────┘
//!            ▲                          ▲
//!            └──────── MetadataStore ───┘
//!                           ▲
//!              IdMap ───────┘  (merge of foreign ids)
//! ```
//!
//! There is no process-wide instance; callers create a store and share it by
//! reference (or `Arc`) across threads.
//!
//! # Components
//!
//! - `AttributeRegistry`: Idempotent-by-name attribute creation
//! - `NodeTree`: Interned context tree with lazy parent chains
//! - `IdMap`: Foreign id translation for cross-instance merges
//! - `AttributeInfo` / `NodeInfo`: Portable metadata descriptions

pub mod attribute;
pub mod info;
pub mod tree;

pub use attribute::{Attribute, AttributeRegistry, MAX_ATTRIBUTE_NAME_LENGTH};
pub use info::{pack_metadata, unpack_metadata, AttributeInfo, NodeInfo};
pub use tree::{IdMap, Node, NodeTree, ParentChain};

use std::collections::HashSet;

use tracing::debug;

use crate::error::MetadataError;
use crate::record::{Entry, Record};
use crate::types::{AttributeId, AttributeProperties, NodeId, ValueType};
use crate::value::Value;

/// Attribute registry plus context tree
#[derive(Debug, Default)]
pub struct MetadataStore {
    attributes: AttributeRegistry,
    tree: NodeTree,
}

impl MetadataStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    /// Register an attribute, or return the existing one with this name
    pub fn create_attribute(
        &self,
        name: &str,
        value_type: ValueType,
        properties: AttributeProperties,
    ) -> Result<Attribute, MetadataError> {
        self.attributes.create(name, value_type, properties)
    }

    /// Look up an attribute by name
    pub fn get_attribute(&self, name: &str) -> Option<Attribute> {
        self.attributes.find(name)
    }

    /// Look up an attribute by id
    pub fn attribute(&self, id: AttributeId) -> Option<Attribute> {
        self.attributes.get(id)
    }

    /// Look up an attribute by id, failing if it is unknown
    pub fn require_attribute(&self, id: AttributeId) -> Result<Attribute, MetadataError> {
        self.attributes
            .get(id)
            .ok_or(MetadataError::UnknownAttribute(id))
    }

    /// The attribute registry
    pub fn attributes(&self) -> &AttributeRegistry {
        &self.attributes
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    /// The context tree
    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    /// Node by id
    pub fn node(&self, id: NodeId) -> Option<Node> {
        self.tree.node(id)
    }

    /// Node by id, failing if it is unknown
    pub fn require_node(&self, id: NodeId) -> Result<Node, MetadataError> {
        self.tree.node(id).ok_or(MetadataError::UnknownNode(id))
    }

    /// Intern `(attribute, parent, value)`; the attribute must be registered
    pub fn intern(
        &self,
        attribute: AttributeId,
        parent: NodeId,
        value: Value,
    ) -> Result<NodeId, MetadataError> {
        self.require_attribute(attribute)?;
        self.tree.intern(attribute, parent, value)
    }

    /// Intern a root-first path and return its deepest node
    ///
    /// An empty path yields the root.
    pub fn intern_path<'a, I>(&self, path: I) -> Result<NodeId, MetadataError>
    where
        I: IntoIterator<Item = (AttributeId, &'a Value)>,
    {
        path.into_iter().try_fold(NodeId::ROOT, |parent, (attr, value)| {
            self.intern(attr, parent, value.clone())
        })
    }

    /// Walk from `id` up to, but excluding, the root
    pub fn parent_chain(&self, id: NodeId) -> ParentChain<'_> {
        self.tree.parent_chain(id)
    }

    // ========================================================================
    // Foreign merge
    // ========================================================================

    fn map_attribute(&self, foreign: u64, idmap: &IdMap) -> Result<AttributeId, MetadataError> {
        if let Some(local) = idmap.attribute(foreign) {
            return Ok(local);
        }
        u32::try_from(foreign)
            .ok()
            .map(AttributeId)
            .filter(|id| self.attributes.get(*id).is_some())
            .ok_or(MetadataError::UnresolvedAttribute(foreign))
    }

    fn map_node(&self, foreign: u64, idmap: &IdMap) -> Result<NodeId, MetadataError> {
        if let Some(local) = idmap.node(foreign) {
            return Ok(local);
        }
        u32::try_from(foreign)
            .ok()
            .map(NodeId)
            .filter(|id| !id.is_root() && self.tree.contains(*id))
            .ok_or(MetadataError::UnresolvedNode(foreign))
    }

    /// Register a foreign attribute by name and record the id translation
    pub fn merge_attribute(
        &self,
        info: &AttributeInfo,
        idmap: &mut IdMap,
    ) -> Result<Attribute, MetadataError> {
        let attr = self.create_attribute(&info.name, info.value_type, info.properties)?;
        idmap.insert_attribute(info.id, attr.id());
        Ok(attr)
    }

    /// Merge a foreign node whose attribute and parent are already known
    ///
    /// The attribute resolves through `idmap`, falling back to a local
    /// attribute with the same id; the parent resolves the same way. Rejects
    /// nodes carrying the empty value.
    pub fn merge_node(&self, info: &NodeInfo, idmap: &mut IdMap) -> Result<NodeId, MetadataError> {
        if info.value.is_empty() {
            return Err(MetadataError::UnresolvedNode(info.id));
        }
        let attribute = self.map_attribute(info.attribute, idmap)?;
        self.tree
            .merge_foreign(info.id, attribute, info.parent, info.value.clone(), idmap)
    }

    /// Merge batches of foreign attributes and nodes, ancestors first
    pub fn merge_metadata(
        &self,
        attributes: &[AttributeInfo],
        nodes: &[NodeInfo],
        idmap: &mut IdMap,
    ) -> Result<(), MetadataError> {
        for info in attributes {
            self.merge_attribute(info, idmap)?;
        }
        for info in nodes {
            self.merge_node(info, idmap)?;
        }
        debug!(
            attributes = attributes.len(),
            nodes = nodes.len(),
            "merged foreign metadata"
        );
        Ok(())
    }

    /// Import an attribute of another store instance
    pub fn import_attribute(
        &self,
        foreign: &MetadataStore,
        id: AttributeId,
        idmap: &mut IdMap,
    ) -> Result<AttributeId, MetadataError> {
        if let Some(local) = idmap.attribute(id.as_u64()) {
            return Ok(local);
        }
        let attr = foreign.require_attribute(id)?;
        let local = self.create_attribute(attr.name(), attr.value_type(), attr.properties())?;
        idmap.insert_attribute(id.as_u64(), local.id());
        Ok(local.id())
    }

    /// Import a node of another store instance
    ///
    /// Every still-unmapped ancestor is interned first, root-most first, so the
    /// local path mirrors the foreign one.
    pub fn import_node(
        &self,
        foreign: &MetadataStore,
        id: NodeId,
        idmap: &mut IdMap,
    ) -> Result<NodeId, MetadataError> {
        if id.is_root() {
            return Ok(NodeId::ROOT);
        }
        if let Some(local) = idmap.node(id.as_u64()) {
            return Ok(local);
        }
        if !foreign.tree.contains(id) {
            return Err(MetadataError::UnknownNode(id));
        }

        // Collect the unmapped suffix of the chain, deepest first
        let mut pending = Vec::new();
        let mut parent = NodeId::ROOT;
        for node in foreign.parent_chain(id) {
            if let Some(local) = idmap.node(node.id().as_u64()) {
                parent = local;
                break;
            }
            pending.push(node);
        }

        for node in pending.into_iter().rev() {
            let attr = self.import_attribute(foreign, node.attribute(), idmap)?;
            parent = self.tree.intern(attr, parent, node.value().clone())?;
            idmap.insert_node(node.id().as_u64(), parent);
        }

        Ok(parent)
    }

    /// Describe every registered attribute
    pub fn export_attributes(&self) -> Vec<AttributeInfo> {
        self.attributes
            .all()
            .into_iter()
            .map(|a| AttributeInfo {
                id: a.id().as_u64(),
                name: a.name().to_string(),
                value_type: a.value_type(),
                properties: a.properties(),
            })
            .collect()
    }

    /// Describe the given nodes and all their ancestors, ancestors first
    pub fn export_nodes<I>(&self, ids: I) -> Result<Vec<NodeInfo>, MetadataError>
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        for id in ids {
            if id.is_root() {
                continue;
            }
            self.require_node(id)?;
            let chain: Vec<Node> = self
                .parent_chain(id)
                .take_while(|n| !seen.contains(&n.id()))
                .collect();
            for node in chain.into_iter().rev() {
                seen.insert(node.id());
                out.push(NodeInfo {
                    id: node.id().as_u64(),
                    attribute: node.attribute().as_u64(),
                    parent: node.parent().filter(|p| !p.is_root()).map(NodeId::as_u64),
                    value: node.value().clone(),
                });
            }
        }

        Ok(out)
    }

    /// Build a local record from foreign node references and immediates
    ///
    /// Ids resolve through `idmap`, falling back to local ids. Fails without
    /// side effects if any id cannot be resolved.
    pub fn merge_record(
        &self,
        references: &[u64],
        immediates: &[(u64, Value)],
        idmap: &IdMap,
    ) -> Result<Record, MetadataError> {
        let mut record = Record::with_capacity(references.len() + immediates.len());
        for &foreign in references {
            record.push(Entry::Reference(self.map_node(foreign, idmap)?));
        }
        for (foreign, value) in immediates {
            let attr = self.map_attribute(*foreign, idmap)?;
            record.push(Entry::Immediate(attr, value.clone()));
        }
        Ok(record)
    }
}
