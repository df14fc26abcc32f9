//! Cross-project import legality.
//!
//! After a compile, every source the dependency artifact mentions must be
//! reachable from the compiling project under the import policy: same
//! extension chain, directly imported, or (when enabled) indirectly imported
//! through a directly imported project. Sources hidden from a library
//! interface are rejected regardless of reachability.
//!
//! The checker is per-compile state. Projects validated once are remembered
//! in `imports_visited`, and dependencies that cannot be settled during the
//! scan are parked and rechecked once the whole artifact has been read,
//! against the transitive closure of everything recorded as directly
//! imported by then.

use crate::project::{ProjectId, ProjectTree, SourceId};
use std::collections::HashSet;

/// Outcome of vetting one discovered dependency.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImportVerdict {
    /// Same project or same extension chain.
    SameProject,
    /// The compiling project directly imports the dependency's project.
    DirectImport,
    /// Reachable through a recorded direct import; requires the
    /// indirect-imports policy.
    IndirectImport,
    /// The dependency's project is not imported at all.
    NotImported,
    /// The source is not part of its project's visible interface.
    HiddenInterface,
}

impl ImportVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::SameProject | Self::DirectImport | Self::IndirectImport)
    }
}

/// Vets the dependencies of one compile, see the module docs.
pub struct LegalityChecker<'t> {
    tree: &'t ProjectTree,
    /// The project owning the compiled source.
    importing: ProjectId,
    indirect_allowed: bool,
    /// Extension-chain bases already vetted, to skip repeat lookups.
    imports_visited: HashSet<ProjectId>,
    /// Projects recorded as directly imported during this compile.
    directly_imported: Vec<ProjectId>,
    /// Dependencies parked for the post-scan recheck.
    pending: Vec<SourceId>,
}

impl<'t> LegalityChecker<'t> {
    pub fn new(tree: &'t ProjectTree, importing: ProjectId, indirect_allowed: bool) -> Self {
        Self {
            tree,
            importing,
            indirect_allowed,
            imports_visited: HashSet::new(),
            directly_imported: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Vets one dependency as it is extracted. `NotImported` here is not
    /// final: the dependency is parked and settled by [`Self::finish`].
    pub fn check(&mut self, dep: SourceId) -> ImportVerdict {
        let source = self.tree.source(dep);
        let dep_project = source.project;

        if self.tree.same_extension_chain(self.importing, dep_project) {
            return ImportVerdict::SameProject;
        }
        if !source.in_interfaces {
            return ImportVerdict::HiddenInterface;
        }

        let base = self.tree.extension_base(dep_project);
        if self.imports_visited.contains(&base) {
            return ImportVerdict::DirectImport;
        }
        if self.tree.imports_directly(self.importing, dep_project) {
            self.imports_visited.insert(base);
            self.directly_imported.push(self.tree.ultimate_extending(dep_project));
            return ImportVerdict::DirectImport;
        }
        if self.indirect_allowed && self.reachable_from_recorded(dep_project) {
            return ImportVerdict::IndirectImport;
        }

        self.pending.push(dep);
        ImportVerdict::NotImported
    }

    /// Settles parked dependencies against the transitive closure of the
    /// directly-imported set recorded over the whole artifact. Returns the
    /// final verdict for each; callers treat any disallowed one as an
    /// invalidated compile.
    pub fn finish(mut self) -> Vec<(SourceId, ImportVerdict)> {
        let pending = std::mem::take(&mut self.pending);
        pending
            .into_iter()
            .map(|dep| {
                let dep_project = self.tree.source(dep).project;
                let verdict = if self.indirect_allowed && self.reachable_from_recorded(dep_project)
                {
                    ImportVerdict::IndirectImport
                } else if self.tree.imports_directly(self.importing, dep_project) {
                    ImportVerdict::DirectImport
                } else {
                    ImportVerdict::NotImported
                };
                (dep, verdict)
            })
            .collect()
    }

    /// Projects recorded as directly imported while scanning.
    pub fn recorded_imports(&self) -> &[ProjectId] {
        &self.directly_imported
    }

    fn reachable_from_recorded(&self, dep_project: ProjectId) -> bool {
        self.directly_imported
            .iter()
            .any(|&direct| self.tree.imports_transitively(direct, dep_project))
    }
}
