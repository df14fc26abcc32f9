//! Traversal of the project import graph.
//!
//! [`ProjectIter`] is a lazy pull iterator over every project reachable from
//! a root through import, extension and (optionally) aggregation edges. The
//! traversal state is an explicit stack of visit frames plus a per-context
//! set of visited project names, so the iterator can be dropped, resumed or
//! nested without any callback plumbing.
//!
//! Each aggregated project opens a fresh traversal context: a project shared
//! by two aggregated trees is visited once in each, while a diamond inside a
//! single context is visited once.

use crate::project::{ProjectId, ProjectQualifier, ProjectTree};
use std::collections::HashSet;

/// Whether a project is yielded before or after the projects it imports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum VisitOrder {
    #[default]
    Pre,
    Post,
}

/// One step of the traversal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Visit {
    pub project: ProjectId,
    /// Traversal context the visit belongs to; `0` is the root context and
    /// each aggregated project opens a new one.
    pub context: usize,
    /// Whether the project is reached through the imports of a standalone
    /// encapsulated library.
    pub in_encapsulated_lib: bool,
}

struct Frame {
    project: ProjectId,
    context: usize,
    in_encapsulated_lib: bool,
    emitted: bool,
    /// Import and extension edges still to follow, in declaration order.
    children: Vec<ProjectId>,
    /// Aggregated projects still to open as new contexts.
    aggregated: Vec<ProjectId>,
}

/// Lazy depth-first iterator over reachable projects, see the module docs.
pub struct ProjectIter<'a> {
    tree: &'a ProjectTree,
    order: VisitOrder,
    include_aggregated: bool,
    stack: Vec<Frame>,
    /// Visited project names, one set per traversal context.
    seen: Vec<HashSet<String>>,
}

impl<'a> ProjectIter<'a> {
    pub(crate) fn new(tree: &'a ProjectTree, root: ProjectId, order: VisitOrder) -> Self {
        let mut iter = Self {
            tree,
            order,
            include_aggregated: false,
            stack: Vec::new(),
            seen: vec![HashSet::new()],
        };
        iter.seen[0].insert(tree.project(root).name.clone());
        iter.push_frame(root, 0, false);
        iter
    }

    /// Also descend into aggregated projects, each in its own context.
    #[must_use]
    pub fn with_aggregated(mut self, include: bool) -> Self {
        self.include_aggregated = include;
        self
    }

    fn push_frame(&mut self, project: ProjectId, context: usize, inherited_flag: bool) {
        let data = self.tree.project(project);
        let in_encapsulated_lib = inherited_flag || data.standalone_encapsulated;
        // children are consumed back-to-front; reverse to keep declaration
        // order
        let mut children: Vec<ProjectId> = data.imports.clone();
        if let Some(parent) = data.extends {
            children.push(parent);
        }
        children.reverse();
        let mut aggregated = data.aggregated.clone();
        aggregated.reverse();
        self.stack.push(Frame {
            project,
            context,
            in_encapsulated_lib,
            emitted: false,
            children,
            aggregated,
        });
    }

    /// Applies the extender hop: a non-abstract imported project that is
    /// extended is represented by its ultimate extender.
    fn import_target(&self, imported: ProjectId) -> ProjectId {
        if self.tree.project(imported).qualifier == ProjectQualifier::Abstract {
            imported
        } else {
            self.tree.ultimate_extending(imported)
        }
    }

    fn visit_of(&self, frame: &Frame) -> Visit {
        Visit {
            project: frame.project,
            context: frame.context,
            in_encapsulated_lib: frame.in_encapsulated_lib,
        }
    }
}

impl Iterator for ProjectIter<'_> {
    type Item = Visit;

    fn next(&mut self) -> Option<Visit> {
        loop {
            let top = self.stack.last_mut()?;

            if self.order == VisitOrder::Pre && !top.emitted {
                top.emitted = true;
                let visit = self.visit_of(self.stack.last().expect("frame just inspected"));
                return Some(visit);
            }

            if let Some(child) = top.children.pop() {
                let context = top.context;
                let flag = top.in_encapsulated_lib;
                let target = self.import_target(child);
                let name = self.tree.project(target).name.clone();
                if self.seen[context].insert(name) {
                    self.push_frame(target, context, flag);
                }
                continue;
            }

            if let Some(member) = top.aggregated.pop() {
                if !self.include_aggregated {
                    continue;
                }
                let flag = top.in_encapsulated_lib;
                self.seen.push(HashSet::new());
                let context = self.seen.len() - 1;
                self.seen[context].insert(self.tree.project(member).name.clone());
                self.push_frame(member, context, flag);
                continue;
            }

            let frame = self.stack.pop().expect("frame just inspected");
            if self.order == VisitOrder::Post {
                return Some(self.visit_of(&frame));
            }
        }
    }
}

impl ProjectTree {
    /// Iterates the projects reachable from `root` across import and
    /// extension edges; see [`ProjectIter`].
    pub fn iter_projects(&self, root: ProjectId, order: VisitOrder) -> ProjectIter<'_> {
        ProjectIter::new(self, root, order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Project;

    fn project(name: &str) -> Project {
        Project::new(name, ProjectQualifier::Standard, format!("/{name}"), format!("/{name}/obj"))
    }

    fn names(tree: &ProjectTree, visits: Vec<Visit>) -> Vec<String> {
        visits.into_iter().map(|v| tree.project(v.project).name.clone()).collect()
    }

    #[test]
    fn diamond_is_visited_once() {
        let mut tree = ProjectTree::new();
        let root = tree.add_project(project("root"));
        let a = tree.add_project(project("a"));
        let b = tree.add_project(project("b"));
        let shared = tree.add_project(project("shared"));
        tree.project_mut(root).imports = vec![a, b];
        tree.project_mut(a).imports = vec![shared];
        tree.project_mut(b).imports = vec![shared];

        let visits: Vec<_> = tree.iter_projects(root, VisitOrder::Pre).collect();
        assert_eq!(names(&tree, visits), ["root", "a", "shared", "b"]);
    }

    #[test]
    fn post_order_yields_leaves_first() {
        let mut tree = ProjectTree::new();
        let root = tree.add_project(project("root"));
        let a = tree.add_project(project("a"));
        let b = tree.add_project(project("b"));
        tree.project_mut(root).imports = vec![a];
        tree.project_mut(a).imports = vec![b];

        let visits: Vec<_> = tree.iter_projects(root, VisitOrder::Post).collect();
        assert_eq!(names(&tree, visits), ["b", "a", "root"]);
    }

    #[test]
    fn extended_import_hops_to_ultimate_extender() {
        let mut tree = ProjectTree::new();
        let root = tree.add_project(project("root"));
        let base = tree.add_project(project("base"));
        let ext = tree.add_project(project("ext"));
        tree.set_extends(ext, base);
        tree.project_mut(root).imports = vec![base];

        let visits: Vec<_> = tree.iter_projects(root, VisitOrder::Pre).collect();
        // base itself is reached through ext's extension edge
        assert_eq!(names(&tree, visits), ["root", "ext", "base"]);
    }

    #[test]
    fn abstract_imports_are_visited_directly() {
        let mut tree = ProjectTree::new();
        let root = tree.add_project(project("root"));
        let mut shared = project("shared");
        shared.qualifier = ProjectQualifier::Abstract;
        let shared = tree.add_project(shared);
        tree.project_mut(root).imports = vec![shared];

        let visits: Vec<_> = tree.iter_projects(root, VisitOrder::Pre).collect();
        assert_eq!(names(&tree, visits), ["root", "shared"]);
    }

    #[test]
    fn aggregates_open_fresh_contexts() {
        let mut tree = ProjectTree::new();
        let mut agg = project("agg");
        agg.qualifier = ProjectQualifier::Aggregate;
        let agg = tree.add_project(agg);
        let a = tree.add_project(project("a"));
        let b = tree.add_project(project("b"));
        let shared = tree.add_project(project("shared"));
        tree.project_mut(agg).aggregated = vec![a, b];
        tree.project_mut(a).imports = vec![shared];
        tree.project_mut(b).imports = vec![shared];

        let visits: Vec<_> =
            tree.iter_projects(agg, VisitOrder::Pre).with_aggregated(true).collect();
        let shared_visits: Vec<_> =
            visits.iter().filter(|v| v.project == shared).collect();
        // shared appears once per aggregated context
        assert_eq!(shared_visits.len(), 2);
        assert_ne!(shared_visits[0].context, shared_visits[1].context);

        let without: Vec<_> = tree.iter_projects(agg, VisitOrder::Pre).collect();
        assert_eq!(names(&tree, without), ["agg"]);
    }

    #[test]
    fn encapsulated_flag_propagates_through_imports() {
        let mut tree = ProjectTree::new();
        let root = tree.add_project(project("root"));
        let mut lib = project("lib");
        lib.standalone_encapsulated = true;
        let lib = tree.add_project(lib);
        let inner = tree.add_project(project("inner"));
        tree.project_mut(root).imports = vec![lib];
        tree.project_mut(lib).imports = vec![inner];

        let visits: Vec<_> = tree.iter_projects(root, VisitOrder::Pre).collect();
        let flag_of = |id: ProjectId| visits.iter().find(|v| v.project == id).unwrap();
        assert!(!flag_of(root).in_encapsulated_lib);
        assert!(flag_of(lib).in_encapsulated_lib);
        assert!(flag_of(inner).in_encapsulated_lib);
    }
}
