pub mod storage;
pub mod taxonomy;

pub use crate::storage::{
    LoadReport, MergedRecord, NameRecord, NodeRecord, ParsedRows, RowSource, Store, StoreConfig,
};
pub use crate::taxonomy::{
    heal_missing_primaries, is_classified, propagate_validity, seed_validity, HealReport, Lineage,
    NameMatch, PropagationReport, Rank, SeedReport, TaxNode, TaxTree, Taxonomy, TreeRow,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaxdbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("tax_id {old} is deprecated; merged into {new}")]
    Deprecated { old: String, new: String },

    #[error("ambiguous name: {0}")]
    Ambiguous(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, TaxdbError>;
