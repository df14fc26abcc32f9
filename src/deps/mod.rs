//! Post-processing of compiler dependency output.
//!
//! A successful compile leaves behind a dependency artifact in one of two
//! formats: Make-style rule files listing prerequisite paths, or structured
//! unit manifests listing imported units by basename. Both are parsed here
//! and the extracted dependencies are run through the import-legality
//! checker.

pub mod legality;
pub mod makefile;
pub mod manifest;

pub use legality::{ImportVerdict, LegalityChecker};
pub use makefile::MakefileDeps;
pub use manifest::UnitManifest;

/// The compiled unit a manifest describes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitRecord {
    pub name: String,
    pub source_file: String,
}

/// One imported (`with`ed) unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WithRecord {
    pub unit: String,
    pub source_file: String,
    pub dep_file: String,
}

/// One subunit dependency, present when units are not split across compiles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubunitRecord {
    pub name: String,
    pub parent: String,
    pub source_file: String,
}

/// One contributing source with the stamp it had when the unit was compiled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DepRecord {
    pub source_file: String,
    pub stamp: String,
}
