//! In-memory tree materialization from flattened taxonomy rows.
//!
//! Nodes live in an arena keyed by tax_id; children are held as id lists,
//! so the parent-pointer structure never forms ownership cycles. The arena
//! doubles as the descendants index: every reachable id resolves in O(1).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::taxonomy::rank::Rank;
use crate::{Result, TaxdbError};

/// Flattened input row for tree construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeRow {
    pub tax_id: String,
    pub parent_id: String,
    pub rank: String,
    pub tax_name: String,
    pub is_valid: bool,
}

impl TreeRow {
    pub fn new(
        tax_id: impl Into<String>,
        parent_id: impl Into<String>,
        rank: impl Into<String>,
        tax_name: impl Into<String>,
        is_valid: bool,
    ) -> Self {
        Self {
            tax_id: tax_id.into(),
            parent_id: parent_id.into(),
            rank: rank.into(),
            tax_name: tax_name.into(),
            is_valid,
        }
    }
}

/// A materialized node. Children are ids into the owning tree's arena.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxNode {
    pub tax_id: String,
    pub parent_id: String,
    pub rank: Rank,
    pub tax_name: String,
    pub is_valid: bool,
    pub children: Vec<String>,
}

impl TaxNode {
    pub fn is_root(&self) -> bool {
        self.tax_id == self.parent_id
    }
}

/// Rooted taxonomy tree with an O(1) descendants index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxTree {
    root_id: String,
    nodes: HashMap<String, TaxNode>,
}

impl TaxTree {
    /// Materialize a tree from root-first rows.
    ///
    /// Construction is idempotent over repeated references to the same
    /// tax_id: an identical repeat is ignored, while a repeat naming a
    /// different parent is a single-parent violation and fails. A child
    /// row arriving before its parent is an ordering error, and input
    /// without a self-parented root (or with two) is rejected.
    pub fn construct(rows: impl IntoIterator<Item = TreeRow>) -> Result<Self> {
        let mut nodes: HashMap<String, TaxNode> = HashMap::new();
        let mut root_id: Option<String> = None;

        for row in rows {
            if let Some(existing) = nodes.get(&row.tax_id) {
                if existing.parent_id != row.parent_id {
                    return Err(TaxdbError::Integrity(format!(
                        "tax_id {} is a child of both {} and {}",
                        row.tax_id, existing.parent_id, row.parent_id
                    )));
                }
                continue;
            }

            if row.tax_id == row.parent_id {
                if let Some(existing_root) = &root_id {
                    return Err(TaxdbError::Integrity(format!(
                        "two self-parented roots: {} and {}",
                        existing_root, row.tax_id
                    )));
                }
                root_id = Some(row.tax_id.clone());
            } else {
                let parent = nodes.get_mut(&row.parent_id).ok_or_else(|| {
                    TaxdbError::Integrity(format!(
                        "row for tax_id {} references parent {} before it was materialized",
                        row.tax_id, row.parent_id
                    ))
                })?;
                parent.children.push(row.tax_id.clone());
            }

            nodes.insert(
                row.tax_id.clone(),
                TaxNode {
                    tax_id: row.tax_id,
                    parent_id: row.parent_id,
                    rank: Rank::parse(&row.rank),
                    tax_name: row.tax_name,
                    is_valid: row.is_valid,
                    children: Vec::new(),
                },
            );
        }

        let root_id = root_id.ok_or_else(|| {
            TaxdbError::Integrity("input contains no self-parented root row".to_string())
        })?;

        Ok(Self { root_id, nodes })
    }

    /// Materialize the whole stored taxonomy.
    pub fn from_store(store: &crate::storage::Store) -> Result<Self> {
        Self::construct(store.tree_rows()?)
    }

    pub fn root(&self) -> &TaxNode {
        // The constructor guarantees the root is in the arena.
        &self.nodes[&self.root_id]
    }

    /// Descendants-index lookup.
    pub fn get(&self, tax_id: &str) -> Option<&TaxNode> {
        self.nodes.get(tax_id)
    }

    pub fn contains(&self, tax_id: &str) -> bool {
        self.nodes.contains_key(tax_id)
    }

    /// Number of distinct materialized nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Validity flag of a node, if the id is known.
    pub fn is_valid(&self, tax_id: &str) -> Option<bool> {
        self.nodes.get(tax_id).map(|node| node.is_valid)
    }

    pub fn children<'a>(&'a self, tax_id: &str) -> impl Iterator<Item = &'a TaxNode> + 'a {
        self.nodes
            .get(tax_id)
            .into_iter()
            .flat_map(|node| node.children.iter())
            .filter_map(move |child_id| self.nodes.get(child_id))
    }

    /// Nodes from `tax_id` up to the root, nearest first.
    pub fn ancestors<'a>(&'a self, tax_id: &str) -> Option<Vec<&'a TaxNode>> {
        let mut node = self.nodes.get(tax_id)?;
        let mut out = Vec::new();
        loop {
            out.push(node);
            if node.is_root() {
                break;
            }
            node = self.nodes.get(&node.parent_id)?;
        }
        Some(out)
    }

    /// (rank, tax_id) pairs from the root down to `tax_id`.
    pub fn rank_path<'a>(&'a self, tax_id: &str) -> Option<Vec<(Rank, &'a str)>> {
        let mut path: Vec<(Rank, &str)> = self
            .ancestors(tax_id)?
            .into_iter()
            .map(|node| (node.rank, node.tax_id.as_str()))
            .collect();
        path.reverse();
        Some(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaxNode> {
        self.nodes.values()
    }
}
