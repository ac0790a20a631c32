//! Taxonomy domain logic: ranks, lineage resolution, tree materialization,
//! name healing, and validity propagation.

pub mod heal;
pub mod rank;
pub mod resolver;
pub mod tree;
pub mod validity;

pub use heal::{heal_missing_primaries, HealReport};
pub use rank::Rank;
pub use resolver::{Lineage, NameMatch, Taxonomy};
pub use tree::{TaxNode, TaxTree, TreeRow};
pub use validity::{
    is_classified, propagate_validity, seed_validity, PropagationReport, SeedReport,
};
