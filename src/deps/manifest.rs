//! Parser for unit-manifest dependency files.
//!
//! Languages with unit semantics produce a manifest per compiled unit: a `U`
//! record naming the unit, a `W` record per imported unit, `S` records for
//! subunit dependencies and `D` records carrying the stamp every
//! contributing source had at compile time. Record letters the parser does
//! not know are skipped, so the format can grow without breaking older
//! drivers.

use crate::{
    deps::{DepRecord, SubunitRecord, UnitRecord, WithRecord},
    error::{DriverError, Result},
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

static RE_UNIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^U\s+(?P<unit>\S+)\s+(?P<src>\S+)\s*$").unwrap());

static RE_WITH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^W\s+(?P<unit>\S+)(?:\s+(?P<src>\S+)\s+(?P<dep>\S+))?\s*$").unwrap()
});

static RE_SUBUNIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^S\s+(?P<sub>\S+)\s+(?P<parent>\S+)\s+(?P<src>\S+)\s*$").unwrap()
});

static RE_DEP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^D\s+(?P<src>\S+)\s+(?P<stamp>\S+)\s*$").unwrap());

/// Everything extracted from one manifest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnitManifest {
    pub unit: Option<UnitRecord>,
    pub withed: Vec<WithRecord>,
    pub subunits: Vec<SubunitRecord>,
    pub deps: Vec<DepRecord>,
}

impl UnitManifest {
    /// Reads and parses the manifest at `path`.
    pub fn read(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|err| DriverError::io(err, path))?;
        Ok(Self::parse(&content))
    }

    /// Parses manifest text. Unknown records are ignored; `W` records
    /// without source information carry nothing actionable and are dropped.
    pub fn parse(content: &str) -> Self {
        let mut manifest = Self::default();
        for line in content.lines() {
            if let Some(caps) = RE_UNIT.captures(line) {
                if manifest.unit.is_none() {
                    manifest.unit = Some(UnitRecord {
                        name: caps["unit"].to_string(),
                        source_file: caps["src"].to_string(),
                    });
                }
            } else if let Some(caps) = RE_WITH.captures(line) {
                let (Some(src), Some(dep)) = (caps.name("src"), caps.name("dep")) else {
                    continue;
                };
                manifest.withed.push(WithRecord {
                    unit: caps["unit"].to_string(),
                    source_file: src.as_str().to_string(),
                    dep_file: dep.as_str().to_string(),
                });
            } else if let Some(caps) = RE_SUBUNIT.captures(line) {
                manifest.subunits.push(SubunitRecord {
                    name: caps["sub"].to_string(),
                    parent: caps["parent"].to_string(),
                    source_file: caps["src"].to_string(),
                });
            } else if let Some(caps) = RE_DEP.captures(line) {
                manifest.deps.push(DepRecord {
                    source_file: caps["src"].to_string(),
                    stamp: caps["stamp"].to_string(),
                });
            }
        }
        manifest
    }

    /// Basenames of every source a legality check must vet: withed units
    /// plus subunit carriers.
    pub fn dependency_sources(&self) -> impl Iterator<Item = &str> {
        self.withed
            .iter()
            .map(|record| record.source_file.as_str())
            .chain(self.subunits.iter().map(|record| record.source_file.as_str()))
    }
}
