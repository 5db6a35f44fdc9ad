//! Attribute tree
//!
//! Bidirectional mapping between attribute paths and quarks, plus the
//! parent/child topology. Quarks are handed out densely in creation
//! order and never reused, so `Vec` indexing by quark is the whole
//! lookup story; each node additionally keeps a name-to-quark map for
//! descending by path.
//!
//! The tree itself is not synchronized; [`crate::StateSystem`] wraps it
//! in a reader/writer lock (shared for lookups, exclusive for
//! insertions).

use rustc_hash::FxHashMap;
use tracehist_core::{Quark, Result, StateError, PATH_SEPARATOR, ROOT_QUARK};

/// One attribute node.
#[derive(Debug)]
struct AttributeNode {
    /// Last path component. Empty only for the root.
    name: String,
    /// Parent quark, [`ROOT_QUARK`] for first-level attributes.
    parent: Quark,
    /// Children in insertion order.
    child_order: Vec<Quark>,
    /// Name-to-quark map of the children.
    children: FxHashMap<String, Quark>,
}

impl AttributeNode {
    fn new(name: String, parent: Quark) -> Self {
        AttributeNode {
            name,
            parent,
            child_order: Vec::new(),
            children: FxHashMap::default(),
        }
    }
}

/// Hierarchical namespace mapping path strings to dense quarks.
///
/// The mapping is bijective: each quark has exactly one path and each
/// path one quark, and quarks form `0..N` with no gaps.
#[derive(Debug)]
pub struct AttributeTree {
    root: AttributeNode,
    nodes: Vec<AttributeNode>,
}

impl Default for AttributeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl AttributeTree {
    /// Empty tree: just the unnamed root.
    pub fn new() -> Self {
        AttributeTree {
            root: AttributeNode::new(String::new(), ROOT_QUARK),
            nodes: Vec::new(),
        }
    }

    /// Number of attributes created so far.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no attribute has been created yet.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn node(&self, quark: Quark) -> Result<&AttributeNode> {
        if quark == ROOT_QUARK {
            return Ok(&self.root);
        }
        usize::try_from(quark)
            .ok()
            .and_then(|i| self.nodes.get(i))
            .ok_or_else(|| StateError::not_found(format!("<quark {quark}>")))
    }

    fn node_mut(&mut self, quark: Quark) -> &mut AttributeNode {
        if quark == ROOT_QUARK {
            &mut self.root
        } else {
            &mut self.nodes[quark as usize]
        }
    }

    /// Check that `quark` designates an existing attribute (the root does
    /// not count: it carries no value).
    pub fn validate(&self, quark: Quark) -> Result<()> {
        if quark == ROOT_QUARK {
            return Err(StateError::not_found("<root>"));
        }
        self.node(quark).map(|_| ())
    }

    /// Resolve `path` relative to `base` without creating anything.
    pub fn get_quark(&self, base: Quark, path: &[&str]) -> Result<Quark> {
        let mut current = base;
        for segment in path {
            let node = self.node(current)?;
            current = *node
                .children
                .get(*segment)
                .ok_or_else(|| StateError::not_found(self.describe(base, path)))?;
        }
        if current == ROOT_QUARK {
            // Empty path from the root resolves to the root, which is not
            // an attribute.
            return Err(StateError::not_found(self.describe(base, path)));
        }
        Ok(current)
    }

    /// Resolve `path` relative to `base`, creating every missing segment.
    ///
    /// Segments must be non-empty and must not contain the path
    /// separator; that is a caller contract, checked in debug builds.
    pub fn get_or_add_quark(&mut self, base: Quark, path: &[&str]) -> Result<Quark> {
        self.node(base)?; // validate the base before touching anything
        let mut current = base;
        for segment in path {
            debug_assert!(
                !segment.is_empty() && !segment.contains(PATH_SEPARATOR),
                "invalid attribute name {segment:?}"
            );
            let existing = self.node(current)?.children.get(*segment).copied();
            current = match existing {
                Some(q) => q,
                None => {
                    let quark = self.nodes.len() as Quark;
                    self.nodes
                        .push(AttributeNode::new((*segment).to_string(), current));
                    let parent = self.node_mut(current);
                    parent.children.insert((*segment).to_string(), quark);
                    parent.child_order.push(quark);
                    quark
                }
            };
        }
        if current == ROOT_QUARK {
            return Err(StateError::not_found(self.describe(base, path)));
        }
        Ok(current)
    }

    /// Direct or recursive sub-attributes of `quark`, in insertion order
    /// (pre-order for the recursive case), excluding `quark` itself.
    pub fn sub_attributes(&self, quark: Quark, recursive: bool) -> Result<Vec<Quark>> {
        let node = self.node(quark)?;
        let mut out = Vec::new();
        for &child in &node.child_order {
            out.push(child);
            if recursive {
                // Children are always valid quarks; the recursion cannot
                // fail past this point.
                let nested = self.sub_attributes(child, true)?;
                out.extend(nested);
            }
        }
        Ok(out)
    }

    /// Last path component of `quark`.
    pub fn attribute_name(&self, quark: Quark) -> Result<&str> {
        self.validate(quark)?;
        Ok(&self.node(quark)?.name)
    }

    /// Slash-joined full path of `quark`.
    pub fn full_path(&self, quark: Quark) -> Result<String> {
        self.validate(quark)?;
        let mut segments = Vec::new();
        let mut current = quark;
        while current != ROOT_QUARK {
            let node = self.node(current)?;
            segments.push(node.name.as_str());
            current = node.parent;
        }
        segments.reverse();
        Ok(segments.join(&PATH_SEPARATOR.to_string()))
    }

    fn describe(&self, base: Quark, path: &[&str]) -> String {
        let suffix = path.join(&PATH_SEPARATOR.to_string());
        if base == ROOT_QUARK {
            suffix
        } else {
            match self.full_path(base) {
                Ok(prefix) => format!("{prefix}{PATH_SEPARATOR}{suffix}"),
                Err(_) => format!("<quark {base}>{PATH_SEPARATOR}{suffix}"),
            }
        }
    }
}
