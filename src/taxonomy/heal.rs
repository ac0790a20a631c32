//! Primary-name healing.
//!
//! Bulk loads can leave taxa without any `is_primary = 1` name row (the
//! scientific name carried a diverging unique_name, or the source only
//! supplied synonyms). Healing promotes exactly one row per affected
//! taxon so every downstream display and classification lookup has a
//! canonical name to work with.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::Store;
use crate::{Result, TaxdbError};

/// Outcome of one healing pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealReport {
    /// Taxa that received a primary name.
    pub healed: usize,
    /// Subset that had no unique scientific name and used the fallback.
    pub fallback: usize,
}

/// Give every taxon lacking a primary name exactly one `is_primary = 1` row.
///
/// The unique scientific-name row is promoted when there is one; otherwise
/// the first candidate in (name_class, tax_name, unique_name) order is
/// promoted and the choice is logged. A node with no name rows at all
/// cannot be healed and aborts the pass with an integrity error. Runs as a
/// single transaction and is idempotent: a second pass finds nothing to do.
pub fn heal_missing_primaries(store: &mut Store) -> Result<HealReport> {
    let tx = store.conn_mut().transaction()?;

    // A node with zero name rows is an upstream integrity gap, not
    // something healing can repair.
    let orphan: Option<String> = tx
        .query_row(
            "SELECT nodes.tax_id
             FROM nodes
                 LEFT JOIN names ON names.tax_id = nodes.tax_id
             WHERE names.tax_id IS NULL
             LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(tax_id) = orphan {
        return Err(TaxdbError::Integrity(format!(
            "tax_id {} has no name rows to heal",
            tax_id
        )));
    }

    let missing: Vec<String> = {
        let mut stmt = tx.prepare(
            "SELECT tax_id
             FROM names
             GROUP BY tax_id
             HAVING SUM(is_primary) = 0",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        out
    };

    if !missing.is_empty() {
        warn!(count = missing.len(), "taxa lack primary names");
    }

    let mut report = HealReport::default();
    for tax_id in &missing {
        let candidates: Vec<(String, String, String)> = {
            let mut stmt = tx.prepare_cached(
                "SELECT tax_name, unique_name, name_class
                 FROM names
                 WHERE tax_id = ?1
                 ORDER BY name_class, tax_name, unique_name",
            )?;
            let rows = stmt.query_map(params![tax_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            out
        };

        let scientific: Vec<&(String, String, String)> = candidates
            .iter()
            .filter(|(_, _, name_class)| name_class.as_str() == "scientific name")
            .collect();

        if scientific.len() == 1 {
            tx.execute(
                "UPDATE names SET is_primary = 1
                 WHERE tax_id = ?1 AND name_class = 'scientific name'",
                params![tax_id],
            )?;
        } else {
            // No unique scientific name; the candidate list is sorted, so
            // the first row is a stable choice across runs.
            let (tax_name, unique_name, name_class) =
                candidates.first().ok_or_else(|| {
                    TaxdbError::Integrity(format!("tax_id {} has no name rows to heal", tax_id))
                })?;
            warn!(
                %tax_id,
                %tax_name,
                %name_class,
                "no unique scientific name; promoting first candidate"
            );
            tx.execute(
                "UPDATE names SET is_primary = 1
                 WHERE tax_id = ?1 AND tax_name = ?2
                     AND unique_name = ?3 AND name_class = ?4",
                params![tax_id, tax_name, unique_name, name_class],
            )?;
            report.fallback += 1;
        }
        report.healed += 1;
    }

    tx.commit()?;
    Ok(report)
}
