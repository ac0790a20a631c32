//! Shared fixture taxonomy for integration tests.
//!
//! Shape (ids loosely follow NCBI):
//!
//! ```text
//! 1 root
//! └── 131567 cellular organisms (no_rank)
//!     └── 2 Bacteria (superkingdom)
//!         └── 1239 Firmicutes (phylum)
//!             └── 91061 Bacilli (class)
//!                 ├── 1385 Bacillales (order)
//!                 │   └── 90964 Staphylococcaceae (family)
//!                 │       └── 1279 Staphylococcus (genus)
//!                 │           ├── 1280 Staphylococcus aureus (species)
//!                 │           └── 50 uncultured bacterium XYZ (species)
//!                 │               └── 51 (subspecies) └── 52 └── 53
//!                 └── 400 (no_rank) └── 401 (no_rank)
//!                     └── 1378 Gemella (genus)
//!                         ├── 1379 Gemella haemolysans (species)
//!                         │   └── 60 uncultured epsilon (no_rank)
//!                         └── 7 Gemella weirdname (species, lacks primary)
//! ```

#![allow(dead_code)] // not every suite uses every fixture helper

use taxdb::{
    heal_missing_primaries, seed_validity, MergedRecord, NameRecord, NodeRecord, ParsedRows, Store,
};

pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn fixture_rows() -> ParsedRows {
    let nodes = vec![
        NodeRecord::new("1", "1", "no rank"),
        NodeRecord::new("131567", "1", "no rank"),
        NodeRecord::new("2", "131567", "superkingdom"),
        NodeRecord::new("1239", "2", "phylum"),
        NodeRecord::new("91061", "1239", "class"),
        NodeRecord::new("1385", "91061", "order"),
        NodeRecord::new("90964", "1385", "family"),
        NodeRecord::new("1279", "90964", "genus"),
        NodeRecord::new("1280", "1279", "species"),
        NodeRecord::new("50", "1279", "species"),
        NodeRecord::new("51", "50", "subspecies"),
        NodeRecord::new("52", "51", "no rank"),
        NodeRecord::new("53", "52", "no rank"),
        NodeRecord::new("400", "91061", "no rank"),
        NodeRecord::new("401", "400", "no rank"),
        NodeRecord::new("1378", "401", "genus"),
        NodeRecord::new("1379", "1378", "species"),
        NodeRecord::new("60", "1379", "no rank"),
        NodeRecord::new("7", "1378", "species"),
    ];

    let names = vec![
        NameRecord::new("1", "root", "", "scientific name"),
        NameRecord::new("131567", "cellular organisms", "", "scientific name"),
        NameRecord::new("2", "Bacteria", "Bacteria <bacteria>", "scientific name"),
        NameRecord::new("2", "eubacteria", "", "genbank common name"),
        NameRecord::new("1239", "Firmicutes", "", "scientific name"),
        NameRecord::new("91061", "Bacilli", "", "scientific name"),
        NameRecord::new("1385", "Bacillales", "", "scientific name"),
        NameRecord::new("90964", "Staphylococcaceae", "", "scientific name"),
        NameRecord::new("1279", "Staphylococcus", "", "scientific name"),
        NameRecord::new("1280", "Staphylococcus aureus", "", "scientific name"),
        NameRecord::new("1280", "Staph aureus", "", "synonym"),
        NameRecord::new("50", "uncultured bacterium XYZ", "", "scientific name"),
        NameRecord::new("51", "Staphylococcus nicename", "", "scientific name"),
        NameRecord::new("52", "Staphylococcus nicename variant", "", "scientific name"),
        NameRecord::new("53", "Staphylococcus nicename subvariant", "", "scientific name"),
        NameRecord::new("400", "Bacillales Family XI", "", "scientific name"),
        NameRecord::new("401", "Gemella incertae sedis", "", "scientific name"),
        NameRecord::new("1378", "Gemella", "Gemella <firmicutes>", "scientific name"),
        NameRecord::new("1378", "Gemella Berger 1960", "", "authority"),
        // "Gemella" also appears as a non-primary name of another taxon;
        // the unique primary row must win.
        NameRecord::new("401", "Gemella", "", "equivalent name"),
        NameRecord::new("1379", "Gemella haemolysans", "", "scientific name"),
        NameRecord::new("60", "uncultured epsilon", "", "scientific name"),
        // Owned by two tax_ids, neither primary: ambiguous by name.
        NameRecord::new("1280", "Duplicatus", "", "synonym"),
        NameRecord::new("1379", "Duplicatus", "", "synonym"),
        // tax_id 7: scientific name with a diverging unique_name, so the
        // load pass leaves it without any primary row.
        NameRecord::new("7", "Gemella weirdname", "Gemella othername <bad>", "scientific name"),
        NameRecord::new("7", "Weird synonym", "", "synonym"),
    ];

    let merged = vec![
        MergedRecord::new("99", "2"),
        MergedRecord::new("30630", "1280"),
        MergedRecord::new("55555", "30630"),
        MergedRecord::new("77777", "77778"),
        MergedRecord::new("77778", "77777"),
    ];

    ParsedRows {
        nodes,
        names,
        merged,
    }
}

/// Store with the fixture loaded, but neither healed nor seeded.
pub fn loaded_store() -> Store {
    let mut store = Store::open_in_memory().expect("in-memory store");
    store.load(&mut fixture_rows()).expect("fixture load");
    store
}

/// Store with the fixture loaded, healed, and validity-seeded.
pub fn fixture_store() -> Store {
    let mut store = loaded_store();
    heal_missing_primaries(&mut store).expect("healing pass");
    seed_validity(&mut store).expect("seeding pass");
    store
}

/// Every tax_id in the fixture.
pub fn fixture_tax_ids() -> Vec<String> {
    fixture_rows()
        .nodes
        .into_iter()
        .map(|node| node.tax_id)
        .collect()
}
