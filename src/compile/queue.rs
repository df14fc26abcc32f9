//! The queue of pending source compilations.
//!
//! Entries are served in insertion order, except that a source whose object
//! directory currently hosts an in-flight compile is skipped until
//! [`SourceQueue::mark_free`] releases the directory. This serializes all
//! writes into one object directory while letting compiles into distinct
//! directories overlap.

use crate::{
    deps::UnitManifest,
    project::{ProjectId, ProjectTree, SourceId},
};
use std::{
    collections::{HashSet, VecDeque},
    path::PathBuf,
};

/// A pending compilation: the source and the root of the tree it was queued
/// for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueEntry {
    pub source: SourceId,
    pub tree_root: ProjectId,
}

/// FIFO of pending compilations plus the set of busy object directories.
#[derive(Debug, Default)]
pub struct SourceQueue {
    entries: VecDeque<QueueEntry>,
    /// Everything ever inserted this phase; an entry is queued at most once.
    inserted: HashSet<(SourceId, ProjectId)>,
    busy_dirs: HashSet<PathBuf>,
    extracted: usize,
}

impl SourceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a source unless it was already queued this phase. Returns
    /// whether the entry was added.
    pub fn insert(&mut self, source: SourceId, tree_root: ProjectId) -> bool {
        if !self.inserted.insert((source, tree_root)) {
            return false;
        }
        self.entries.push_back(QueueEntry { source, tree_root });
        true
    }

    /// Returns the first entry whose object directory is free and marks that
    /// directory busy. `None` when nothing is extractable right now.
    pub fn extract(&mut self, tree: &ProjectTree) -> Option<QueueEntry> {
        let position = self.entries.iter().position(|entry| {
            let dir = object_dir(tree, entry.source);
            !self.busy_dirs.contains(&dir)
        })?;
        let entry = self.entries.remove(position).expect("position just found");
        self.busy_dirs.insert(object_dir(tree, entry.source));
        self.extracted += 1;
        Some(entry)
    }

    /// Releases an object directory after its compile finished.
    pub fn mark_free(&mut self, tree: &ProjectTree, source: SourceId) {
        self.busy_dirs.remove(&object_dir(tree, source));
    }

    /// True when no entry can be extracted right now: the queue is empty or
    /// every remaining entry blocks on a busy object directory.
    pub fn is_virtually_empty(&self, tree: &ProjectTree) -> bool {
        self.entries
            .iter()
            .all(|entry| self.busy_dirs.contains(&object_dir(tree, entry.source)))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sources inserted so far, extracted or not. Used for progress totals.
    pub fn inserted_count(&self) -> usize {
        self.inserted.len()
    }

    pub fn extracted_count(&self) -> usize {
        self.extracted
    }

    pub fn busy_dirs(&self) -> &HashSet<PathBuf> {
        &self.busy_dirs
    }

    /// Enqueues the sources a unit manifest proves reachable: every withed
    /// unit and, when subunits travel with their parent, every subunit that
    /// maps to a tracked, compilable source.
    pub fn insert_transitive_dependencies(
        &mut self,
        tree: &ProjectTree,
        manifest: &UnitManifest,
        tree_root: ProjectId,
        include_subunits: bool,
    ) -> usize {
        let mut added = 0;
        let withed = manifest.withed.iter().map(|record| record.source_file.as_str());
        let subunits = manifest
            .subunits
            .iter()
            .filter(|_| include_subunits)
            .map(|record| record.source_file.as_str());
        for basename in withed.chain(subunits) {
            let Some(source) = tree.source_by_basename(basename) else {
                // predefined-library unit, nothing of ours to build
                continue;
            };
            if tree.source(source).compilable != crate::project::Compilable::Yes {
                continue;
            }
            if self.insert(source, tree_root) {
                trace!("queued transitive dependency {basename}");
                added += 1;
            }
        }
        added
    }
}

fn object_dir(tree: &ProjectTree, source: SourceId) -> PathBuf {
    tree.source(source)
        .object_path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| tree.project(tree.source(source).object_project).object_dir.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{Language, LanguageConfig, Project, ProjectQualifier, Source};

    fn two_dir_tree() -> (ProjectTree, ProjectId, Vec<SourceId>) {
        let mut tree = ProjectTree::new();
        let p = tree.add_project(Project::new("p", ProjectQualifier::Standard, "/p", "/p/obj"));
        let q = tree.add_project(Project::new("q", ProjectQualifier::Standard, "/q", "/q/obj"));
        let pl = tree.add_language(Language::new("c", p, LanguageConfig::default()));
        let ql = tree.add_language(Language::new("c", q, LanguageConfig::default()));
        let a = tree.add_source(Source::new("/p/src/a.c"), pl);
        let b = tree.add_source(Source::new("/p/src/b.c"), pl);
        let c = tree.add_source(Source::new("/q/src/c.c"), ql);
        tree.prepare();
        (tree, p, vec![a, b, c])
    }

    #[test]
    fn serves_in_insertion_order() {
        let (tree, root, ids) = two_dir_tree();
        let mut queue = SourceQueue::new();
        for &id in &ids {
            assert!(queue.insert(id, root));
        }
        let first = queue.extract(&tree).unwrap();
        assert_eq!(first.source, ids[0]);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let (_, root, ids) = two_dir_tree();
        let mut queue = SourceQueue::new();
        assert!(queue.insert(ids[0], root));
        assert!(!queue.insert(ids[0], root));
    }

    #[test]
    fn busy_dir_blocks_siblings_not_strangers() {
        let (tree, root, ids) = two_dir_tree();
        let mut queue = SourceQueue::new();
        for &id in &ids {
            queue.insert(id, root);
        }
        let a = queue.extract(&tree).unwrap();
        assert_eq!(a.source, ids[0]);
        // b shares a's object dir and is skipped; c is served instead
        let c = queue.extract(&tree).unwrap();
        assert_eq!(c.source, ids[2]);
        assert!(queue.extract(&tree).is_none());
        assert!(queue.is_virtually_empty(&tree));
        assert!(!queue.is_empty());

        queue.mark_free(&tree, a.source);
        let b = queue.extract(&tree).unwrap();
        assert_eq!(b.source, ids[1]);
        assert!(queue.is_empty());
    }
}
