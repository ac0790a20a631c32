//! Lineage resolution, name lookup, and merged-id handling over a `Store`.

use indexmap::IndexMap;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use tracing::{debug, trace};

use crate::storage::Store;
use crate::taxonomy::rank::Rank;
use crate::{Result, TaxdbError};

/// Hop ceiling for transitive merged-id resolution. Source data only ever
/// contains single hops; anything deeper than this is corrupt.
const MERGED_HOP_LIMIT: usize = 8;

/// A resolved name row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameMatch {
    pub tax_id: String,
    pub tax_name: String,
    pub is_primary: bool,
}

/// A lineage projected onto the rank axis.
///
/// `ranks` maps rank name to the tax_id of the chain entry at that rank, in
/// root-first order. When two chain entries share a rank (successive
/// no_rank taxa, for instance) the deeper entry wins; the raw chain from
/// [`Taxonomy::lineage_chain`] is lossless when that matters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    pub tax_id: String,
    pub parent_id: String,
    pub rank: Rank,
    pub tax_name: String,
    pub ranks: IndexMap<String, String>,
}

impl Lineage {
    /// tax_id of the chain entry at `rank`, if the lineage has one.
    pub fn at(&self, rank: Rank) -> Option<&str> {
        self.ranks.get(rank.name()).map(String::as_str)
    }
}

struct NodeInfo {
    parent_id: String,
    rank: Rank,
}

/// Read-side resolver with an instance-scoped lineage cache.
///
/// The cache is unbounded and lives as long as the resolver; taxonomies
/// top out at a few hundred thousand nodes, and the workload is
/// read-mostly, so entries are never evicted.
pub struct Taxonomy<'a> {
    store: &'a Store,
    cache: HashMap<String, Vec<(Rank, String)>>,
}

impl<'a> Taxonomy<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self {
            store,
            cache: HashMap::new(),
        }
    }

    /// True if a full chain for `tax_id` is already memoized.
    pub fn is_cached(&self, tax_id: &str) -> bool {
        self.cache.contains_key(tax_id)
    }

    fn node(&self, tax_id: &str) -> Result<NodeInfo> {
        let row = self
            .store
            .conn()
            .query_row(
                "SELECT parent_id, rank FROM nodes WHERE tax_id = ?1",
                params![tax_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        match row {
            Some((parent_id, rank)) => Ok(NodeInfo {
                parent_id,
                rank: Rank::parse(&rank),
            }),
            None => Err(TaxdbError::NotFound(format!("tax_id {}", tax_id))),
        }
    }

    /// Root-first chain of (rank, tax_id) ending at `tax_id`.
    ///
    /// Walks parent pointers upward until the self-referential root, then
    /// reverses. A cached chain for any ancestor met on the way up is
    /// reused instead of walking the rest of the chain again.
    pub fn lineage_chain(&mut self, tax_id: &str) -> Result<Vec<(Rank, String)>> {
        if let Some(chain) = self.cache.get(tax_id) {
            trace!(tax_id, "lineage cache hit");
            return Ok(chain.clone());
        }

        let mut below: Vec<(Rank, String)> = Vec::new();
        let mut current = tax_id.to_string();
        let mut chain = loop {
            if let Some(cached) = self.cache.get(&current) {
                trace!(tax_id = %current, "reusing cached ancestor chain");
                break cached.clone();
            }
            let node = self.node(&current)?;
            let reached_root = node.parent_id == current;
            below.push((node.rank, current));
            if reached_root {
                break Vec::new();
            }
            current = node.parent_id;
        };

        below.reverse();
        chain.extend(below);
        self.cache.insert(tax_id.to_string(), chain.clone());
        Ok(chain)
    }

    fn merged_target(&self, tax_id: &str) -> Result<Option<String>> {
        Ok(self
            .store
            .conn()
            .query_row(
                "SELECT new_tax_id FROM merged WHERE old_tax_id = ?1",
                params![tax_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Resolve a possibly deprecated tax_id by at most one merged hop.
    ///
    /// A live id resolves to itself; a deprecated id resolves to its
    /// replacement (which is not checked further); anything else is
    /// NotFound.
    pub fn resolve_merged(&self, tax_id: &str) -> Result<String> {
        if self.node(tax_id).is_ok() {
            return Ok(tax_id.to_string());
        }
        match self.merged_target(tax_id)? {
            Some(new_tax_id) => {
                debug!(old = tax_id, new = %new_tax_id, "resolved merged tax_id");
                Ok(new_tax_id)
            }
            None => Err(TaxdbError::NotFound(format!("tax_id {}", tax_id))),
        }
    }

    /// Follow merged hops until a live id is reached.
    ///
    /// Source taxonomies only ever ship single-hop merges, so a revisited
    /// id or a chain longer than the hop ceiling marks corrupt `merged`
    /// rows and fails as an integrity error.
    pub fn resolve_merged_transitive(&self, tax_id: &str) -> Result<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut current = tax_id.to_string();
        for _ in 0..MERGED_HOP_LIMIT {
            if self.node(&current).is_ok() {
                return Ok(current);
            }
            if !seen.insert(current.clone()) {
                return Err(TaxdbError::Integrity(format!(
                    "cycle in merged tax_ids at {}",
                    current
                )));
            }
            match self.merged_target(&current)? {
                Some(next) => current = next,
                None => return Err(TaxdbError::NotFound(format!("tax_id {}", tax_id))),
            }
        }
        Err(TaxdbError::Integrity(format!(
            "merged chain from {} exceeds {} hops",
            tax_id, MERGED_HOP_LIMIT
        )))
    }

    /// Resolve a taxon by name to exactly one owning tax_id.
    ///
    /// Rows with `is_primary = 1` win. A name owned by several tax_ids
    /// with no unique primary row is ambiguous, which is distinct from the
    /// name being unknown.
    pub fn primary_from_name(&self, tax_name: &str) -> Result<NameMatch> {
        let mut rows: Vec<NameMatch> = {
            let mut stmt = self.store.conn().prepare(
                "SELECT tax_id, tax_name, is_primary
                 FROM names
                 WHERE tax_name = ?1
                 ORDER BY is_primary DESC, tax_id",
            )?;
            let mapped = stmt.query_map(params![tax_name], |row| {
                Ok(NameMatch {
                    tax_id: row.get(0)?,
                    tax_name: row.get(1)?,
                    is_primary: row.get::<_, i64>(2)? != 0,
                })
            })?;
            let mut out = Vec::new();
            for row in mapped {
                out.push(row?);
            }
            out
        };

        if rows.is_empty() {
            return Err(TaxdbError::NotFound(format!("tax_name {:?}", tax_name)));
        }

        let owner_count = rows
            .iter()
            .map(|m| m.tax_id.as_str())
            .collect::<HashSet<_>>()
            .len();
        if owner_count == 1 {
            // Single owner; the ORDER BY put a primary row first if any.
            return Ok(rows.remove(0));
        }

        let primaries: Vec<&NameMatch> = rows.iter().filter(|m| m.is_primary).collect();
        if primaries.len() == 1 {
            return Ok(primaries[0].clone());
        }
        Err(TaxdbError::Ambiguous(format!(
            "tax_name {:?} is owned by {} tax_ids",
            tax_name, owner_count
        )))
    }

    /// Primary display name of a taxon.
    pub fn primary_from_id(&self, tax_id: &str) -> Result<String> {
        self.node(tax_id)?;
        let name: Option<String> = self
            .store
            .conn()
            .query_row(
                "SELECT tax_name FROM names WHERE tax_id = ?1 AND is_primary = 1",
                params![tax_id],
                |row| row.get(0),
            )
            .optional()?;
        name.ok_or_else(|| {
            TaxdbError::Integrity(format!("tax_id {} has no primary name", tax_id))
        })
    }

    /// Non-primary names of a taxon, addressed by either identifier.
    pub fn synonyms(&self, tax_id: Option<&str>, tax_name: Option<&str>) -> Result<Vec<String>> {
        let owner = match (tax_id, tax_name) {
            (Some(id), None) => id.to_string(),
            (None, Some(name)) => self.primary_from_name(name)?.tax_id,
            _ => {
                return Err(TaxdbError::InvalidArgument(
                    "exactly one of tax_id or tax_name is required".to_string(),
                ))
            }
        };
        self.node(&owner)?;

        let mut stmt = self.store.conn().prepare(
            "SELECT tax_name FROM names
             WHERE tax_id = ?1 AND is_primary = 0
             ORDER BY tax_name",
        )?;
        let rows = stmt.query_map(params![owner], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Project the lineage of a taxon addressed by exactly one identifier.
    ///
    /// The argument check runs before any store access. A tax_id found
    /// only in `merged` reports Deprecated with the replacement id rather
    /// than NotFound; the caller decides whether to retry with it.
    pub fn lineage(&mut self, tax_id: Option<&str>, tax_name: Option<&str>) -> Result<Lineage> {
        let tax_id = match (tax_id, tax_name) {
            (Some(id), None) => id.to_string(),
            (None, Some(name)) => self.primary_from_name(name)?.tax_id,
            _ => {
                return Err(TaxdbError::InvalidArgument(
                    "exactly one of tax_id or tax_name is required".to_string(),
                ))
            }
        };

        let chain = match self.lineage_chain(&tax_id) {
            Err(TaxdbError::NotFound(_)) => match self.merged_target(&tax_id)? {
                Some(new_tax_id) => {
                    return Err(TaxdbError::Deprecated {
                        old: tax_id,
                        new: new_tax_id,
                    })
                }
                None => return Err(TaxdbError::NotFound(format!("tax_id {}", tax_id))),
            },
            other => other?,
        };

        let node = self.node(&tax_id)?;
        let tax_name = self.primary_from_id(&tax_id)?;

        let mut ranks: IndexMap<String, String> = IndexMap::with_capacity(chain.len());
        for (rank, id) in &chain {
            // Deeper entries overwrite shallower ones sharing a rank.
            ranks.insert(rank.name().to_string(), id.clone());
        }

        Ok(Lineage {
            tax_id,
            parent_id: node.parent_id,
            rank: node.rank,
            tax_name,
            ranks,
        })
    }

    /// Write a rank-columnar table of lineages.
    ///
    /// One row per taxon: tax_id, parent_id, rank, tax_name, then one
    /// column per canonical rank holding the tax_id of the lineage entry
    /// at that rank, empty where the lineage has none. With `taxa = None`,
    /// every lineage currently in the cache is written in sorted-id order.
    pub fn write_table(&mut self, taxa: Option<&[&str]>, sink: &mut dyn Write) -> Result<()> {
        let targets: Vec<String> = match taxa {
            Some(ids) => ids.iter().map(|id| id.to_string()).collect(),
            None => {
                let mut cached: Vec<String> = self.cache.keys().cloned().collect();
                cached.sort();
                cached
            }
        };

        write_row(
            sink,
            ["tax_id", "parent_id", "rank", "tax_name"]
                .into_iter()
                .chain(Rank::CANONICAL.iter().map(|rank| rank.name())),
        )?;

        for tax_id in &targets {
            let lineage = self.lineage(Some(tax_id), None)?;
            let fields: Vec<&str> = [
                lineage.tax_id.as_str(),
                lineage.parent_id.as_str(),
                lineage.rank.name(),
                lineage.tax_name.as_str(),
            ]
            .into_iter()
            .chain(
                Rank::CANONICAL
                    .iter()
                    .map(|rank| lineage.at(*rank).unwrap_or("")),
            )
            .collect();
            write_row(sink, fields)?;
        }
        Ok(())
    }
}

fn write_row<'f>(
    sink: &mut dyn Write,
    fields: impl IntoIterator<Item = &'f str>,
) -> Result<()> {
    let mut first = true;
    for field in fields {
        if !first {
            write!(sink, ",")?;
        }
        write!(sink, "\"{}\"", escape_csv(field))?;
        first = false;
    }
    writeln!(sink)?;
    Ok(())
}

/// Escape CSV special characters.
fn escape_csv(s: &str) -> String {
    s.replace('"', "\"\"")
}
