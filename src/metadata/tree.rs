//! Context Node Tree
//!
//! An append-only, content-addressed trie of `(attribute, parent, value)`
//! triples. Nodes live in an arena and refer to their parent by index.
//!
//! ```text
//!              [0] root (invalid attribute)
//!              /                \
//!     [1] function=main     [4] phase=init
//!            |
//!     [2] function=solve
//!            |
//!     [3] loop=iter
//! ```
//!
//! Interning the same triple twice yields the same [`NodeId`], so records that
//! share a context prefix share the ancestor nodes. Nodes are never mutated or
//! removed.
//!
//! # Thread Safety
//!
//! `intern` takes a read lock for the lookup and upgrades to a write lock only
//! when a node must be appended, re-checking after acquiring it. Readers
//! walking parent chains are never invalidated by appends.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::MetadataError;
use crate::types::{AttributeId, NodeId};
use crate::value::Value;

/// A node of the context tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    id: NodeId,
    attribute: AttributeId,
    value: Value,
    parent: Option<NodeId>,
}

impl Node {
    /// Node id
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Attribute labelling the edge to this node
    pub fn attribute(&self) -> AttributeId {
        self.attribute
    }

    /// Value carried by this node
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Parent node; `None` only for the root
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Whether this is the artificial root
    pub fn is_root(&self) -> bool {
        self.id.is_root()
    }
}

type NodeKey = (AttributeId, NodeId, Value);

#[derive(Debug)]
struct TreeInner {
    nodes: Vec<Node>,
    index: HashMap<NodeKey, NodeId>,
}

/// Thread-safe context node tree
#[derive(Debug)]
pub struct NodeTree {
    inner: RwLock<TreeInner>,
}

impl Default for NodeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTree {
    /// Create a tree holding only the root node
    pub fn new() -> Self {
        let root = Node {
            id: NodeId::ROOT,
            attribute: AttributeId::INVALID,
            value: Value::Empty,
            parent: None,
        };
        Self {
            inner: RwLock::new(TreeInner {
                nodes: vec![root],
                index: HashMap::new(),
            }),
        }
    }

    /// Return the node for `(attribute, parent, value)`, creating it if needed
    pub fn intern(
        &self,
        attribute: AttributeId,
        parent: NodeId,
        value: Value,
    ) -> Result<NodeId, MetadataError> {
        if !attribute.is_valid() {
            return Err(MetadataError::UnknownAttribute(attribute));
        }

        let key = (attribute, parent, value);

        // Fast path: node already exists
        {
            let inner = self.inner.read();
            if let Some(&id) = inner.index.get(&key) {
                return Ok(id);
            }
            if parent.index() >= inner.nodes.len() {
                return Err(MetadataError::UnknownNode(parent));
            }
        }

        let mut inner = self.inner.write();

        // Double-check after acquiring the write lock
        if let Some(&id) = inner.index.get(&key) {
            return Ok(id);
        }

        let id = NodeId::allocate(inner.nodes.len())?;
        let (attribute, parent, value) = key;
        inner.nodes.push(Node {
            id,
            attribute,
            value: value.clone(),
            parent: Some(parent),
        });
        inner.index.insert((attribute, parent, value), id);

        Ok(id)
    }

    /// Find an existing node without creating one
    pub fn find(&self, attribute: AttributeId, parent: NodeId, value: &Value) -> Option<NodeId> {
        self.inner
            .read()
            .index
            .get(&(attribute, parent, value.clone()))
            .copied()
    }

    /// Node by id
    pub fn node(&self, id: NodeId) -> Option<Node> {
        self.inner.read().nodes.get(id.index()).cloned()
    }

    /// Whether `id` refers to an existing node
    pub fn contains(&self, id: NodeId) -> bool {
        id.index() < self.inner.read().nodes.len()
    }

    /// Number of nodes, including the root
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().nodes.len()
    }

    /// Whether only the root exists
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Walk from `id` up to, but excluding, the root
    ///
    /// The iterator is lazy and can be restarted by cloning it.
    pub fn parent_chain(&self, id: NodeId) -> ParentChain<'_> {
        ParentChain {
            tree: self,
            next: Some(id),
        }
    }

    /// Merge a node built by another tree instance
    ///
    /// The foreign parent resolves through `idmap` first, then to a local node
    /// with the same id. `None` means the node hangs off the root. On success
    /// `idmap` maps `foreign_id` to the returned local node.
    pub fn merge_foreign(
        &self,
        foreign_id: u64,
        attribute: AttributeId,
        parent_foreign_id: Option<u64>,
        value: Value,
        idmap: &mut IdMap,
    ) -> Result<NodeId, MetadataError> {
        if let Some(local) = idmap.node(foreign_id) {
            return Ok(local);
        }

        let parent = match parent_foreign_id {
            None => NodeId::ROOT,
            Some(p) => idmap
                .node(p)
                .or_else(|| {
                    u32::try_from(p)
                        .ok()
                        .map(NodeId)
                        .filter(|id| self.contains(*id))
                })
                .ok_or(MetadataError::UnresolvedParent {
                    node: foreign_id,
                    parent: p,
                })?,
        };

        let local = self.intern(attribute, parent, value)?;
        idmap.insert_node(foreign_id, local);
        Ok(local)
    }
}

// ============================================================================
// Parent Chain
// ============================================================================

/// Lazy iterator from a node up to the root, root excluded
#[derive(Debug, Clone)]
pub struct ParentChain<'a> {
    tree: &'a NodeTree,
    next: Option<NodeId>,
}

impl Iterator for ParentChain<'_> {
    type Item = Node;

    fn next(&mut self) -> Option<Node> {
        let id = self.next.take()?;
        if id.is_root() {
            return None;
        }
        let node = self.tree.node(id)?;
        self.next = node.parent;
        Some(node)
    }
}

// ============================================================================
// IdMap
// ============================================================================

/// Translation table from foreign ids to local ids
///
/// Filled while merging metadata produced by another store instance, and
/// consulted when decoding records that reference foreign ids.
#[derive(Debug, Clone, Default)]
pub struct IdMap {
    nodes: HashMap<u64, NodeId>,
    attributes: HashMap<u64, AttributeId>,
}

impl IdMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Local node for a foreign node id
    pub fn node(&self, foreign: u64) -> Option<NodeId> {
        self.nodes.get(&foreign).copied()
    }

    /// Record a node translation
    pub fn insert_node(&mut self, foreign: u64, local: NodeId) {
        self.nodes.insert(foreign, local);
    }

    /// Local attribute for a foreign attribute id
    pub fn attribute(&self, foreign: u64) -> Option<AttributeId> {
        self.attributes.get(&foreign).copied()
    }

    /// Record an attribute translation
    pub fn insert_attribute(&mut self, foreign: u64, local: AttributeId) {
        self.attributes.insert(foreign, local);
    }

    /// Number of mapped nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of mapped attributes
    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    /// Whether nothing has been mapped
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.attributes.is_empty()
    }
}
