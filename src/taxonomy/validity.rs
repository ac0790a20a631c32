//! Validity seeding and batched subtree propagation.
//!
//! A node is "valid" when its primary name looks like a properly classified
//! organism rather than an environmental or placeholder entry. Seeding sets
//! the flag per node from the name alone; propagation then forces every
//! subtree hanging below a boundary rank to agree with its boundary
//! ancestor.

use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::storage::{in_placeholders, Store};
use crate::taxonomy::rank::Rank;
use crate::Result;

/// Criteria for treating a primary name as unclassified. Matched against
/// the leading words of the name only.
const UNCLASSIFIED_PATTERNS: &[&str] = &[
    "-like",
    "-containing",
    r"[Tt]axon",
    "acidophile",
    "actinobacterium",
    "aerobic",
    r"\b[Al]g(um|a)\b",
    r"\b[Bb]acteri(um|a)",
    "Barophile",
    "cyanobacterium",
    "Chloroplast",
    "Cloning",
    "cluster",
    "epibiont",
    "eubacterium",
    r"\b[Gg]roup\b",
    "halophilic",
    r"hydrothermal\b",
    "isolate",
    "marine",
    "methanotroph",
    "microorganism",
    "mollicute",
    "pathogen",
    "[Pp]hytoplasma",
    "proteobacterium",
    "putative",
    r"\bsp\.",
    "species",
    "spirochete",
    r"str\.",
    "strain",
    "symbiont",
    "unicellular",
    "uncultured",
    "unclassified",
    "unidentified",
    "unknown",
    r"vector\b",
    r"vent\b",
];

static UNCLASSIFIED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&UNCLASSIFIED_PATTERNS.join("|")).expect("unclassified pattern set must compile")
});

/// True when `tax_name` looks like a properly classified organism name.
/// Only the first two whitespace-delimited words are examined.
pub fn is_classified(tax_name: &str) -> bool {
    let mut words = tax_name.split_whitespace();
    let leading = match (words.next(), words.next()) {
        (Some(first), Some(second)) => format!("{} {}", first, second),
        (Some(first), None) => first.to_string(),
        (None, _) => return true,
    };
    !UNCLASSIFIED_RE.is_match(&leading)
}

/// Outcome of one seeding pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedReport {
    /// Nodes whose flag was written (every node, seeding is a full pass).
    pub seeded: usize,
    /// Nodes left invalid by their own primary name.
    pub invalid: usize,
}

/// Set every node's `is_valid` from the classification of its primary name.
///
/// Runs as a single transaction. Nodes without a primary name row keep
/// `is_valid = 1`; healing is expected to run first so that case does not
/// occur in practice.
pub fn seed_validity(store: &mut Store) -> Result<SeedReport> {
    let tx = store.conn_mut().transaction()?;

    let seeded = tx.execute(
        "UPDATE nodes SET is_valid = COALESCE(
            (SELECT names.is_classified
             FROM names
             WHERE names.tax_id = nodes.tax_id AND names.is_primary = 1
             LIMIT 1),
            1)",
        [],
    )?;
    let invalid: i64 = tx.query_row("SELECT COUNT(*) FROM nodes WHERE is_valid = 0", [], |row| {
        row.get(0)
    })?;

    tx.commit()?;

    info!(seeded, invalid, "seeded node validity from primary names");
    Ok(SeedReport {
        seeded,
        invalid: invalid as usize,
    })
}

/// Outcome of one propagation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationReport {
    /// Nodes directly below the boundary rank that rooted a subtree rewrite.
    pub subtree_roots: usize,
    /// Total `is_valid` writes, subtree roots included.
    pub marked: usize,
    /// Batched child-lookup queries issued.
    pub child_queries: usize,
}

/// Force every subtree below `boundary` rank to the validity of its
/// boundary-rank ancestor.
///
/// Boundary-adjacent nodes (nodes whose parent has rank `boundary`) are
/// grouped by the parent's flag; each group's subtrees are then overwritten
/// frontier by frontier. Child lookups are batched membership queries no
/// larger than the store's parameter ceiling, so round trips scale with
/// tree depth rather than descendant count. The whole pass is one
/// transaction.
pub fn propagate_validity(store: &mut Store, boundary: Rank) -> Result<PropagationReport> {
    let batch = store.config().max_batch_params;
    let tx = store.conn_mut().transaction()?;

    let mut report = PropagationReport::default();

    // Boundary-adjacent nodes, grouped by the parent's validity. The root
    // is self-parented, so it is excluded explicitly.
    let mut invalid_roots: Vec<String> = Vec::new();
    let mut valid_roots: Vec<String> = Vec::new();
    {
        let mut stmt = tx.prepare(
            "SELECT nodes.tax_id, pnodes.is_valid
             FROM nodes
                 JOIN nodes pnodes ON pnodes.tax_id = nodes.parent_id
             WHERE pnodes.rank = ?1 AND nodes.tax_id <> nodes.parent_id
             ORDER BY pnodes.is_valid",
        )?;
        let rows = stmt.query_map(params![boundary.name()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (tax_id, is_valid) = row?;
            if is_valid == 0 {
                invalid_roots.push(tax_id);
            } else {
                valid_roots.push(tax_id);
            }
        }
    }
    report.subtree_roots = invalid_roots.len() + valid_roots.len();

    for (is_valid, seeds) in [(false, invalid_roots), (true, valid_roots)] {
        if seeds.is_empty() {
            continue;
        }
        info!(
            subtrees = seeds.len(),
            is_valid, "marking subtrees below boundary rank"
        );

        let mut frontier = seeds;
        let mut levels = 0usize;
        while !frontier.is_empty() {
            {
                let mut mark =
                    tx.prepare_cached("UPDATE nodes SET is_valid = ?1 WHERE tax_id = ?2")?;
                for tax_id in &frontier {
                    mark.execute(params![is_valid as i64, tax_id])?;
                    report.marked += 1;
                }
            }

            // Children of the whole frontier, chunked to the parameter
            // ceiling. The self-parent guard keeps the root from ever
            // re-entering a frontier.
            let mut next = Vec::new();
            for chunk in frontier.chunks(batch) {
                let sql = format!(
                    "SELECT tax_id FROM nodes
                     WHERE parent_id IN ({}) AND tax_id <> parent_id",
                    in_placeholders(chunk.len())
                );
                let mut stmt = tx.prepare(&sql)?;
                let rows =
                    stmt.query_map(rusqlite::params_from_iter(chunk.iter()), |row| {
                        row.get::<_, String>(0)
                    })?;
                for row in rows {
                    next.push(row?);
                }
                report.child_queries += 1;
            }
            frontier = next;
            levels += 1;
        }
        debug!(levels, is_valid, "subtree group complete");
    }

    tx.commit()?;

    info!(
        subtree_roots = report.subtree_roots,
        marked = report.marked,
        child_queries = report.child_queries,
        "validity propagation complete"
    );
    Ok(report)
}
