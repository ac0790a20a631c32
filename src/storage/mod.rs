//! SQLite store adapter: schema bootstrap, typed ingestion records, and the
//! bulk load pass.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::taxonomy::rank::Rank;
use crate::taxonomy::tree::TreeRow;
use crate::taxonomy::validity;
use crate::{Result, TaxdbError};

/// Fixed schema for the taxonomy tables. Applied idempotently on open;
/// schema migration is out of scope.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS nodes(
    tax_id        TEXT UNIQUE PRIMARY KEY NOT NULL,
    parent_id     TEXT,
    rank          TEXT,
    is_valid      INTEGER DEFAULT 1
);

CREATE TABLE IF NOT EXISTS names(
    tax_id        TEXT REFERENCES nodes(tax_id),
    tax_name      TEXT,
    unique_name   TEXT,
    name_class    TEXT,
    is_primary    INTEGER,
    is_classified INTEGER
);

CREATE TABLE IF NOT EXISTS merged(
    old_tax_id    TEXT,
    new_tax_id    TEXT
);

CREATE INDEX IF NOT EXISTS nodes_parent_id ON nodes(parent_id);
CREATE INDEX IF NOT EXISTS nodes_rank ON nodes(rank);
CREATE INDEX IF NOT EXISTS nodes_is_valid ON nodes(is_valid);
CREATE INDEX IF NOT EXISTS names_tax_id ON names(tax_id);
CREATE INDEX IF NOT EXISTS names_tax_name ON names(tax_name);
CREATE INDEX IF NOT EXISTS names_taxid_is_primary ON names(tax_id, is_primary);
CREATE INDEX IF NOT EXISTS names_name_is_primary ON names(tax_name, is_primary);
CREATE INDEX IF NOT EXISTS merged_old_tax_id ON merged(old_tax_id);
"#;

/// Store tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum number of ids bound into a single batched membership query.
    /// SQLite caps bound parameters per statement, so subtree expansion
    /// chunks its child lookups to this size.
    pub max_batch_params: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_batch_params: 250,
        }
    }
}

/// A parsed `nodes` row at the ingestion boundary. Upstream formats are
/// dynamically shaped; everything past this point is typed fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub tax_id: String,
    pub parent_id: String,
    pub rank: String,
}

impl NodeRecord {
    pub fn new(
        tax_id: impl Into<String>,
        parent_id: impl Into<String>,
        rank: impl Into<String>,
    ) -> Self {
        Self {
            tax_id: tax_id.into(),
            parent_id: parent_id.into(),
            rank: rank.into(),
        }
    }

    /// The root row is self-parented.
    pub fn is_root(&self) -> bool {
        self.tax_id == self.parent_id
    }
}

/// A parsed `names` row at the ingestion boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRecord {
    pub tax_id: String,
    pub tax_name: String,
    pub unique_name: String,
    pub name_class: String,
}

impl NameRecord {
    pub fn new(
        tax_id: impl Into<String>,
        tax_name: impl Into<String>,
        unique_name: impl Into<String>,
        name_class: impl Into<String>,
    ) -> Self {
        Self {
            tax_id: tax_id.into(),
            tax_name: tax_name.into(),
            unique_name: unique_name.into(),
            name_class: name_class.into(),
        }
    }

    /// A name is primary when it is the scientific name and either no
    /// disambiguated unique_name exists, or the unique_name is just the
    /// tax_name plus a trailing `<...>` qualifier.
    pub fn is_primary(&self) -> bool {
        if self.name_class != "scientific name" {
            return false;
        }
        if self.unique_name.is_empty() {
            return true;
        }
        let stripped = self
            .unique_name
            .split('<')
            .next()
            .unwrap_or(&self.unique_name)
            .trim();
        self.tax_name == stripped
    }
}

/// A parsed `merged` row: one deprecated id superseded by a current one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub old_tax_id: String,
    pub new_tax_id: String,
}

impl MergedRecord {
    pub fn new(old_tax_id: impl Into<String>, new_tax_id: impl Into<String>) -> Self {
        Self {
            old_tax_id: old_tax_id.into(),
            new_tax_id: new_tax_id.into(),
        }
    }
}

/// Source of parsed taxonomy rows. Archive parsing and network fetch live
/// behind this seam; the crate only ever sees typed records.
pub trait RowSource {
    fn nodes(&mut self) -> Result<Vec<NodeRecord>>;
    fn names(&mut self) -> Result<Vec<NameRecord>>;
    fn merged(&mut self) -> Result<Vec<MergedRecord>>;
}

/// In-memory row source for already-parsed data.
#[derive(Debug, Default, Clone)]
pub struct ParsedRows {
    pub nodes: Vec<NodeRecord>,
    pub names: Vec<NameRecord>,
    pub merged: Vec<MergedRecord>,
}

impl RowSource for ParsedRows {
    fn nodes(&mut self) -> Result<Vec<NodeRecord>> {
        Ok(std::mem::take(&mut self.nodes))
    }

    fn names(&mut self) -> Result<Vec<NameRecord>> {
        Ok(std::mem::take(&mut self.names))
    }

    fn merged(&mut self) -> Result<Vec<MergedRecord>> {
        Ok(std::mem::take(&mut self.merged))
    }
}

/// Outcome of one bulk load pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub nodes_inserted: usize,
    pub names_inserted: usize,
    pub merged_inserted: usize,
    /// Tables skipped because they already contained data.
    pub skipped: Vec<String>,
}

/// Transactional SQLite connection over the fixed taxonomy tables.
pub struct Store {
    conn: Connection,
    config: StoreConfig,
}

impl Store {
    /// Open (or create) an on-disk store and bootstrap the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    pub fn open_with_config(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, config)
    }

    /// In-memory store, used by tests and one-shot pipelines.
    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with_config(StoreConfig::default())
    }

    pub fn open_in_memory_with_config(config: StoreConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, config)
    }

    fn from_connection(conn: Connection, config: StoreConfig) -> Result<Self> {
        if config.max_batch_params == 0 {
            return Err(TaxdbError::InvalidArgument(
                "max_batch_params must be at least 1".to_string(),
            ));
        }
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, config })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// True if `table` already contains at least one row.
    fn has_rows(&self, table: &str) -> Result<bool> {
        let sql = format!("SELECT EXISTS(SELECT 1 FROM \"{}\" LIMIT 1)", table);
        let exists: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(exists != 0)
    }

    /// Bulk load parsed rows into the store in a single transaction.
    ///
    /// Tables that already contain data are left untouched and reported in
    /// `LoadReport::skipped`, so a re-run against a populated store is a
    /// no-op. The `is_primary` and `is_classified` derived columns are
    /// computed here, at the ingestion boundary; a self-parented node row
    /// is stored with rank "root" regardless of its incoming rank string.
    pub fn load(&mut self, source: &mut dyn RowSource) -> Result<LoadReport> {
        let mut report = LoadReport::default();

        let load_nodes = !self.has_rows("nodes")?;
        let load_names = !self.has_rows("names")?;
        let load_merged = !self.has_rows("merged")?;

        let nodes = if load_nodes { source.nodes()? } else { Vec::new() };
        let names = if load_names { source.names()? } else { Vec::new() };
        let merged = if load_merged { source.merged()? } else { Vec::new() };

        let tx = self.conn.transaction()?;
        {
            if load_nodes {
                let mut stmt = tx.prepare(
                    "INSERT INTO nodes (tax_id, parent_id, rank, is_valid)
                     VALUES (?1, ?2, ?3, 1)",
                )?;
                for node in &nodes {
                    let rank: &str = if node.is_root() {
                        Rank::Root.name()
                    } else {
                        node.rank.as_str()
                    };
                    stmt.execute(params![node.tax_id, node.parent_id, rank])
                        .map_err(integrity_or_db)?;
                    report.nodes_inserted += 1;
                }
            } else {
                report.skipped.push("nodes".to_string());
            }

            if load_names {
                let mut stmt = tx.prepare(
                    "INSERT INTO names
                     (tax_id, tax_name, unique_name, name_class, is_primary, is_classified)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for name in &names {
                    stmt.execute(params![
                        name.tax_id,
                        name.tax_name,
                        name.unique_name,
                        name.name_class,
                        name.is_primary() as i64,
                        validity::is_classified(&name.tax_name) as i64,
                    ])
                    .map_err(integrity_or_db)?;
                    report.names_inserted += 1;
                }
            } else {
                report.skipped.push("names".to_string());
            }

            if load_merged {
                let mut stmt =
                    tx.prepare("INSERT INTO merged (old_tax_id, new_tax_id) VALUES (?1, ?2)")?;
                for row in &merged {
                    stmt.execute(params![row.old_tax_id, row.new_tax_id])
                        .map_err(integrity_or_db)?;
                    report.merged_inserted += 1;
                }
            } else {
                report.skipped.push("merged".to_string());
            }
        }
        tx.commit()?;

        info!(
            nodes = report.nodes_inserted,
            names = report.names_inserted,
            merged = report.merged_inserted,
            "bulk load complete"
        );
        for table in &report.skipped {
            debug!(table, "table already contains data; load not performed");
        }

        Ok(report)
    }

    /// Flattened tree rows in root-first (level) order, each carrying the
    /// node's primary name and validity flag.
    ///
    /// Walks the tree breadth-first from the root; each level's children
    /// are fetched with membership queries chunked to the parameter
    /// ceiling. Exactly one self-parented root must exist. Nodes without a
    /// primary name render with an empty tax_name, which only happens
    /// before healing has run.
    pub fn tree_rows(&self) -> Result<Vec<TreeRow>> {
        let roots: Vec<TreeRow> = {
            let mut stmt = self.conn.prepare(
                "SELECT nodes.tax_id, nodes.parent_id, nodes.rank, nodes.is_valid,
                        COALESCE(names.tax_name, '')
                 FROM nodes
                     LEFT JOIN names
                         ON names.tax_id = nodes.tax_id AND names.is_primary = 1
                 WHERE nodes.tax_id = nodes.parent_id",
            )?;
            let rows = stmt.query_map([], tree_row_from_sql)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            out
        };
        if roots.len() != 1 {
            return Err(TaxdbError::Integrity(format!(
                "expected exactly one self-parented root, found {}",
                roots.len()
            )));
        }

        let mut out = roots;
        let mut frontier: Vec<String> = vec![out[0].tax_id.clone()];
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for chunk in frontier.chunks(self.config.max_batch_params) {
                let sql = format!(
                    "SELECT nodes.tax_id, nodes.parent_id, nodes.rank, nodes.is_valid,
                            COALESCE(names.tax_name, '')
                     FROM nodes
                         LEFT JOIN names
                             ON names.tax_id = nodes.tax_id AND names.is_primary = 1
                     WHERE nodes.parent_id IN ({}) AND nodes.tax_id <> nodes.parent_id
                     ORDER BY nodes.tax_id",
                    in_placeholders(chunk.len())
                );
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(chunk.iter()), tree_row_from_sql)?;
                for row in rows {
                    let row = row?;
                    next.push(row.tax_id.clone());
                    out.push(row);
                }
            }
            frontier = next;
        }

        Ok(out)
    }
}

fn tree_row_from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<TreeRow> {
    Ok(TreeRow {
        tax_id: row.get(0)?,
        parent_id: row.get(1)?,
        rank: row.get(2)?,
        tax_name: row.get(4)?,
        is_valid: row.get::<_, i64>(3)? != 0,
    })
}

/// `?N` placeholder list for a batched membership query.
pub(crate) fn in_placeholders(count: usize) -> String {
    let mut out = String::with_capacity(count * 2);
    for i in 0..count {
        if i > 0 {
            out.push(',');
        }
        out.push('?');
    }
    out
}

/// Constraint violations are integrity errors, fatal to the current pass;
/// anything else stays a database error.
pub(crate) fn integrity_or_db(err: rusqlite::Error) -> TaxdbError {
    match err.sqlite_error_code() {
        Some(rusqlite::ErrorCode::ConstraintViolation) => {
            TaxdbError::Integrity(err.to_string())
        }
        _ => TaxdbError::Database(err),
    }
}
