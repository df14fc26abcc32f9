//! In-memory model of a resolved project tree.
//!
//! The loader (external to this crate) produces a [`ProjectTree`]: an arena of
//! projects, languages and sources linked by ids. Projects own languages,
//! languages own sources, and import/extension/aggregation edges connect
//! projects. Keeping entities in arenas keyed by stable ids keeps the model
//! free of reference cycles even though a source points back at its unit and
//! a unit at its spec and body sources.

use crate::utils;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::SystemTime,
};

/// Identifies a [`Project`] within its [`ProjectTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectId(pub(crate) usize);

/// Identifies a [`Language`] within its [`ProjectTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LanguageId(pub(crate) usize);

/// Identifies a [`Source`] within its [`ProjectTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub(crate) usize);

/// What kind of project a [`Project`] is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ProjectQualifier {
    #[default]
    Standard,
    Library,
    Abstract,
    Aggregate,
    AggregateLibrary,
}

impl ProjectQualifier {
    /// Whether the project's content is a set of other projects.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Self::Aggregate | Self::AggregateLibrary)
    }
}

/// The linkage of a library project.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LibraryKind {
    Static,
    Dynamic,
    Relocatable,
    StaticPic,
}

impl LibraryKind {
    /// Non-static libraries need their objects compiled position independent.
    pub fn needs_pic(&self) -> bool {
        !matches!(self, Self::Static)
    }
}

/// Which dependency artifact the compiler of a language produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DependencyKind {
    /// The compiler produces no dependency information.
    #[default]
    None,
    /// Make-style `.d` files: `target: prereq prereq ...`.
    Makefile,
    /// Structured unit manifests with imported-unit records.
    UnitManifest,
}

/// How paths are rendered on the compiler command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PathSyntax {
    /// Forward-slash form, identical on every platform.
    #[default]
    Canonical,
    /// Whatever the host OS uses natively.
    Host,
}

/// The role of a source file within its unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SourceKind {
    Spec,
    #[default]
    Impl,
    Separate,
}

/// Cached result of the "does this source produce an object" question.
///
/// Only ever moves away from `Unknown` after the source's timestamp has been
/// observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Compilable {
    #[default]
    Unknown,
    Yes,
    No,
}

/// File-name casing of a naming scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Casing {
    #[default]
    Lowercase,
    Uppercase,
    Mixedcase,
}

impl Casing {
    /// The image used when expanding `%c` in config-file patterns.
    pub fn image(&self) -> &'static str {
        match self {
            Self::Lowercase => "lowercase",
            Self::Uppercase => "UPPERCASE",
            Self::Mixedcase => "MixedCase",
        }
    }
}

/// Where a substituted value lands when a switch template is expanded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PathSlot {
    /// The value becomes its own trailing argument: `-MF <path>`.
    #[default]
    Separate,
    /// The value is glued onto the last switch: `-gnatem<path>`.
    Joined,
}

/// A switch list with a slot for one substituted value (a path or an index).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SwitchTemplate {
    pub switches: Vec<String>,
    pub slot: PathSlot,
}

impl SwitchTemplate {
    pub fn new(switches: impl IntoIterator<Item = impl Into<String>>, slot: PathSlot) -> Self {
        Self { switches: switches.into_iter().map(Into::into).collect(), slot }
    }

    /// A single switch the value is glued onto, e.g. `-gnatem` + path.
    pub fn joined(switch: impl Into<String>) -> Self {
        Self::new([switch.into()], PathSlot::Joined)
    }

    /// Switches followed by the value as its own argument, e.g. `-MF` + path.
    pub fn separate(switches: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new(switches, PathSlot::Separate)
    }

    /// Expands the template with `value` substituted into its slot.
    pub fn expand(&self, value: &str) -> Vec<String> {
        match self.slot {
            PathSlot::Separate => {
                let mut args = self.switches.clone();
                args.push(value.to_string());
                args
            }
            PathSlot::Joined => {
                let mut args = self.switches.clone();
                match args.last_mut() {
                    Some(last) => last.push_str(value),
                    None => args.push(value.to_string()),
                }
                args
            }
        }
    }
}

/// File-naming data of a language, used for config-file pattern expansion.
#[derive(Clone, Debug, Default)]
pub struct NamingData {
    pub spec_suffix: String,
    pub body_suffix: String,
    pub dot_replacement: String,
    pub casing: Casing,
}

/// Compiler configuration of one language, as resolved by the loader.
#[derive(Clone, Debug)]
pub struct LanguageConfig {
    /// Path or bare name of the compiler executable.
    pub compiler_driver: PathBuf,
    /// Switches always passed first.
    pub leading_switches: Vec<String>,
    /// Switches always passed last (before the source/object switches).
    pub trailing_switches: Vec<String>,
    pub dependency_kind: DependencyKind,
    /// Switches that make the compiler emit its dependency artifact.
    pub dependency_switches: Option<SwitchTemplate>,
    /// File suffix of the dependency artifact.
    pub dependency_suffix: String,
    /// Post-compile dependency builder argv; empty when the compiler emits
    /// dependencies itself.
    pub compute_dependency: Vec<String>,
    /// How the source path is passed; `None` appends the bare path.
    pub source_file_switches: Option<SwitchTemplate>,
    /// How the object path is passed; `None` falls back to `-o` for
    /// multi-unit members and omits the switch otherwise.
    pub object_file_switches: Option<SwitchTemplate>,
    /// Switch selecting a unit inside a multi-unit source, index substituted.
    pub multi_unit_switches: Option<SwitchTemplate>,
    /// Prefix producing one `-I<dir>`-style argument per include directory.
    pub include_option: Option<String>,
    /// Env var receiving the path of a file listing include directories.
    pub include_path_file_var: Option<String>,
    /// Env var receiving the joined include directory list.
    pub include_path_var: Option<String>,
    pub mapping_file_switches: Option<SwitchTemplate>,
    pub config_file_switches: Option<SwitchTemplate>,
    /// Naming-scheme config pattern for bodies (`%b %s %d %c %%`).
    pub naming_body_pattern: Option<String>,
    /// Naming-scheme config pattern for specs (`%b %s %d %c %%`).
    pub naming_spec_pattern: Option<String>,
    /// Per-source config pattern for bodies (`%u %f %i %%`).
    pub config_body_pattern: Option<String>,
    /// Per-source config pattern for specs (`%u %f %i %%`).
    pub config_spec_pattern: Option<String>,
    /// Project-local config file copied into the generated one.
    pub local_config_file: Option<PathBuf>,
    pub pic_options: Vec<String>,
    /// Languages whose object directories belong on this language's include
    /// path; includes the language itself.
    pub compatible_languages: Vec<String>,
    pub path_syntax: PathSyntax,
    pub object_suffix: String,
    pub naming: NamingData,
    /// Prefix of binder-generated symbols; must be unique across languages.
    pub binding_prefix: Option<String>,
    /// `Switches(<lang>)` defaults applied when no per-file override exists.
    pub default_switches: Vec<String>,
    /// `Switches(<file>)` overrides keyed by source basename.
    pub switches_by_file: HashMap<String, Vec<String>>,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            compiler_driver: PathBuf::new(),
            leading_switches: Vec::new(),
            trailing_switches: Vec::new(),
            dependency_kind: DependencyKind::None,
            dependency_switches: None,
            dependency_suffix: ".d".to_string(),
            compute_dependency: Vec::new(),
            source_file_switches: None,
            object_file_switches: None,
            multi_unit_switches: None,
            include_option: None,
            include_path_file_var: None,
            include_path_var: None,
            mapping_file_switches: None,
            config_file_switches: None,
            naming_body_pattern: None,
            naming_spec_pattern: None,
            config_body_pattern: None,
            config_spec_pattern: None,
            local_config_file: None,
            pic_options: Vec::new(),
            compatible_languages: Vec::new(),
            path_syntax: PathSyntax::default(),
            object_suffix: ".o".to_string(),
            naming: NamingData::default(),
            binding_prefix: None,
            default_switches: Vec::new(),
            switches_by_file: HashMap::new(),
        }
    }
}

/// One language declared by a project, with its ordered sources.
#[derive(Clone, Debug)]
pub struct Language {
    pub name: String,
    pub project: ProjectId,
    pub config: LanguageConfig,
    /// Sources in declaration order.
    pub sources: Vec<SourceId>,
    /// Recycled mapping-file paths, popped at spawn and returned at reap.
    pub(crate) mapping_pool: Vec<PathBuf>,
    /// Located compiler driver, resolved once per phase.
    pub(crate) resolved_compiler: Option<PathBuf>,
    /// Located dependency extractor, resolved once per phase.
    pub(crate) extractor: Option<PathBuf>,
}

impl Language {
    pub fn new(name: impl Into<String>, project: ProjectId, config: LanguageConfig) -> Self {
        Self {
            name: name.into().to_lowercase(),
            project,
            config,
            sources: Vec::new(),
            mapping_pool: Vec::new(),
            resolved_compiler: None,
            extractor: None,
        }
    }
}

/// Unit data of a source: logical name plus spec/body file pointers.
#[derive(Clone, Debug, Default)]
pub struct UnitInfo {
    pub name: String,
    pub spec: Option<SourceId>,
    pub body: Option<SourceId>,
}

/// A single input file tracked by the driver.
#[derive(Clone, Debug)]
pub struct Source {
    /// On-disk basename.
    pub file: String,
    /// Basename shown in progress and diagnostics.
    pub display_name: String,
    /// Absolute path.
    pub path: PathBuf,
    pub kind: SourceKind,
    pub unit: Option<UnitInfo>,
    /// Unit index inside a multi-unit file; `0` for ordinary sources.
    pub index: u32,
    pub project: ProjectId,
    pub language: LanguageId,
    /// The project whose object directory receives this source's outputs;
    /// differs from `project` when that project is extended.
    pub object_project: ProjectId,
    pub object_path: PathBuf,
    pub dep_path: PathBuf,
    pub switches_path: PathBuf,
    pub source_mtime: Option<SystemTime>,
    pub object_mtime: Option<SystemTime>,
    pub dep_mtime: Option<SystemTime>,
    /// Removed in an extending project; never compiled.
    pub locally_removed: bool,
    /// Part of the visible interface of a library project.
    pub in_interfaces: bool,
    /// The overriding source in an extending project, if any.
    pub replaced_by: Option<SourceId>,
    pub compilable: Compilable,
}

impl Source {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            display_name: file.clone(),
            file,
            path,
            kind: SourceKind::default(),
            unit: None,
            index: 0,
            project: ProjectId(0),
            language: LanguageId(0),
            object_project: ProjectId(0),
            object_path: PathBuf::new(),
            dep_path: PathBuf::new(),
            switches_path: PathBuf::new(),
            source_mtime: None,
            object_mtime: None,
            dep_mtime: None,
            locally_removed: false,
            in_interfaces: true,
            replaced_by: None,
            compilable: Compilable::Unknown,
        }
    }
}

/// A unit of the build graph owning sources, an object directory and import
/// edges.
#[derive(Clone, Debug)]
pub struct Project {
    pub name: String,
    pub qualifier: ProjectQualifier,
    /// Directory of the project description; config-file paths resolve
    /// against it.
    pub dir: PathBuf,
    pub object_dir: PathBuf,
    pub library_kind: Option<LibraryKind>,
    /// Pre-built projects are never recompiled unless forced.
    pub externally_built: bool,
    /// Standalone encapsulated library; propagates a flag down its imports.
    pub standalone_encapsulated: bool,
    pub languages: Vec<LanguageId>,
    /// Directly imported projects.
    pub imports: Vec<ProjectId>,
    /// The project this one extends, if any.
    pub extends: Option<ProjectId>,
    /// The project extending this one, if any.
    pub extended_by: Option<ProjectId>,
    /// Aggregated projects; only populated for aggregate qualifiers.
    pub aggregated: Vec<ProjectId>,
    /// Transitive import closure, filled by [`ProjectTree::prepare`].
    pub(crate) closure: Vec<ProjectId>,
    /// Guards one-shot config-file generation.
    pub(crate) config_checked: bool,
    /// The generated config file, once materialized.
    pub(crate) generated_config: Option<PathBuf>,
}

impl Project {
    pub fn new(
        name: impl Into<String>,
        qualifier: ProjectQualifier,
        dir: impl Into<PathBuf>,
        object_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            qualifier,
            dir: dir.into(),
            object_dir: object_dir.into(),
            library_kind: None,
            externally_built: false,
            standalone_encapsulated: false,
            languages: Vec::new(),
            imports: Vec::new(),
            extends: None,
            extended_by: None,
            aggregated: Vec::new(),
            closure: Vec::new(),
            config_checked: false,
            generated_config: None,
        }
    }

    /// Whether objects of this project must be compiled position independent.
    pub fn needs_pic(&self) -> bool {
        self.library_kind.map_or(false, |kind| kind.needs_pic())
    }
}

/// Arena of projects, languages and sources plus the lookup indexes the
/// dependency post-processors rely on.
#[derive(Clone, Debug, Default)]
pub struct ProjectTree {
    pub(crate) projects: Vec<Project>,
    pub(crate) languages: Vec<Language>,
    pub(crate) sources: Vec<Source>,
    /// Basename -> candidate sources, for unit-manifest lookups.
    by_basename: HashMap<String, Vec<SourceId>>,
    /// Canonicalized path -> source, for Makefile-dep lookups.
    by_path: HashMap<PathBuf, SourceId>,
}

impl ProjectTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_project(&mut self, project: Project) -> ProjectId {
        let id = ProjectId(self.projects.len());
        self.projects.push(project);
        id
    }

    pub fn add_language(&mut self, language: Language) -> LanguageId {
        let id = LanguageId(self.languages.len());
        self.projects[language.project.0].languages.push(id);
        self.languages.push(language);
        id
    }

    pub fn add_source(&mut self, mut source: Source, language: LanguageId) -> SourceId {
        let id = SourceId(self.sources.len());
        source.language = language;
        source.project = self.languages[language.0].project;
        source.object_project = source.project;
        self.languages[language.0].sources.push(id);
        self.sources.push(source);
        id
    }

    /// Declares that `extender` extends `base`.
    pub fn set_extends(&mut self, extender: ProjectId, base: ProjectId) {
        self.projects[extender.0].extends = Some(base);
        self.projects[base.0].extended_by = Some(extender);
    }

    pub fn project(&self, id: ProjectId) -> &Project {
        &self.projects[id.0]
    }

    pub fn project_mut(&mut self, id: ProjectId) -> &mut Project {
        &mut self.projects[id.0]
    }

    pub fn language(&self, id: LanguageId) -> &Language {
        &self.languages[id.0]
    }

    pub fn language_mut(&mut self, id: LanguageId) -> &mut Language {
        &mut self.languages[id.0]
    }

    pub fn source(&self, id: SourceId) -> &Source {
        &self.sources[id.0]
    }

    pub fn source_mut(&mut self, id: SourceId) -> &mut Source {
        &mut self.sources[id.0]
    }

    pub fn projects(&self) -> impl Iterator<Item = ProjectId> {
        (0..self.projects.len()).map(ProjectId)
    }

    pub fn sources(&self) -> impl Iterator<Item = SourceId> {
        (0..self.sources.len()).map(SourceId)
    }

    /// The last project in `id`'s extension chain.
    pub fn ultimate_extending(&self, id: ProjectId) -> ProjectId {
        let mut current = id;
        while let Some(next) = self.projects[current.0].extended_by {
            current = next;
        }
        current
    }

    /// The first project in `id`'s extension chain.
    pub fn extension_base(&self, id: ProjectId) -> ProjectId {
        let mut current = id;
        while let Some(next) = self.projects[current.0].extends {
            current = next;
        }
        current
    }

    /// Whether `a` and `b` belong to the same extension chain (covers "same
    /// project" and "either extends the other").
    pub fn same_extension_chain(&self, a: ProjectId, b: ProjectId) -> bool {
        self.extension_base(a) == self.extension_base(b)
    }

    /// Direct imports of `id`, including those inherited from projects it
    /// extends.
    pub fn direct_imports(&self, id: ProjectId) -> Vec<ProjectId> {
        let mut imports = Vec::new();
        let mut current = Some(id);
        while let Some(project) = current {
            for &import in &self.projects[project.0].imports {
                if !imports.contains(&import) {
                    imports.push(import);
                }
            }
            current = self.projects[project.0].extends;
        }
        imports
    }

    /// Whether `importer` directly imports `imported`, through any withed
    /// project or a member of its extension chain.
    pub fn imports_directly(&self, importer: ProjectId, imported: ProjectId) -> bool {
        self.direct_imports(importer)
            .iter()
            .any(|&import| self.same_extension_chain(import, imported))
    }

    /// The cached transitive import closure of `id`; valid after
    /// [`Self::prepare`].
    pub fn transitive_imports(&self, id: ProjectId) -> &[ProjectId] {
        &self.projects[id.0].closure
    }

    /// Whether `imported` is reachable from `importer` via import edges.
    pub fn imports_transitively(&self, importer: ProjectId, imported: ProjectId) -> bool {
        self.same_extension_chain(importer, imported)
            || self
                .transitive_imports(importer)
                .iter()
                .any(|&reached| self.same_extension_chain(reached, imported))
    }

    /// Looks a source up by basename, skipping removed and replaced ones.
    pub fn source_by_basename(&self, name: &str) -> Option<SourceId> {
        let candidates = self.by_basename.get(name)?;
        candidates
            .iter()
            .copied()
            .find(|&id| {
                let source = self.source(id);
                !source.locally_removed && source.replaced_by.is_none()
            })
            .or_else(|| candidates.first().copied())
    }

    /// Looks a source up by path, applying the same lexical canonicalization
    /// used when the index was built.
    pub fn source_by_path(&self, path: &Path) -> Option<SourceId> {
        self.by_path.get(&utils::canonical_key(path)).copied()
    }

    /// Finalizes the tree for a compile phase: resolves object paths,
    /// computes import closures, observes timestamps and builds the lookup
    /// indexes.
    pub fn prepare(&mut self) {
        self.compute_closures();
        self.resolve_object_paths();
        self.observe_timestamps();
        self.compute_compilability();
        self.build_indexes();
    }

    fn compute_closures(&mut self) {
        for id in 0..self.projects.len() {
            let mut seen: Vec<ProjectId> = Vec::new();
            let mut stack: Vec<ProjectId> = self.direct_imports(ProjectId(id));
            while let Some(next) = stack.pop() {
                let next = self.ultimate_extending(next);
                if seen.contains(&next) {
                    continue;
                }
                seen.push(next);
                stack.extend(self.direct_imports(next));
            }
            self.projects[id].closure = seen;
        }
    }

    fn resolve_object_paths(&mut self) {
        for id in 0..self.sources.len() {
            let source = &self.sources[id];
            let object_project = self.ultimate_extending(source.project);
            let language = &self.languages[source.language.0];
            let object_dir = self.projects[object_project.0].object_dir.clone();
            let stem = Path::new(&source.file)
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| source.file.clone());
            let object_base = if source.index > 0 {
                format!("{stem}~{}", source.index)
            } else {
                stem
            };
            let config = &language.config;
            let object_path = object_dir.join(format!("{object_base}{}", config.object_suffix));
            let dep_path = object_dir.join(format!("{object_base}{}", config.dependency_suffix));
            let switches_path = object_dir.join(format!("{object_base}.switches"));

            let source = &mut self.sources[id];
            source.object_project = object_project;
            source.object_path = object_path;
            source.dep_path = dep_path;
            source.switches_path = switches_path;
        }
    }

    fn observe_timestamps(&mut self) {
        use rayon::prelude::*;
        self.sources.par_iter_mut().for_each(|source| {
            source.source_mtime = utils::mtime(&source.path);
            source.object_mtime = utils::mtime(&source.object_path);
            source.dep_mtime = utils::mtime(&source.dep_path);
        });
    }

    fn compute_compilability(&mut self) {
        for id in 0..self.sources.len() {
            let source = &self.sources[id];
            let compilable = if source.locally_removed || source.replaced_by.is_some() {
                Compilable::No
            } else if source.kind == SourceKind::Spec
                && source.unit.as_ref().is_some_and(|unit| unit.body.is_some())
            {
                // the body compiles for the whole unit
                Compilable::No
            } else if source.source_mtime.is_none() {
                Compilable::No
            } else {
                Compilable::Yes
            };
            self.sources[id].compilable = compilable;
        }
    }

    fn build_indexes(&mut self) {
        self.by_basename.clear();
        self.by_path.clear();
        for id in 0..self.sources.len() {
            let source = &self.sources[id];
            self.by_basename.entry(source.file.clone()).or_default().push(SourceId(id));
            self.by_path.insert(utils::canonical_key(&source.path), SourceId(id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with_chain() -> (ProjectTree, ProjectId, ProjectId, ProjectId) {
        let mut tree = ProjectTree::new();
        let base = tree.add_project(Project::new("base", ProjectQualifier::Standard, "/b", "/b/obj"));
        let ext = tree.add_project(Project::new("ext", ProjectQualifier::Standard, "/e", "/e/obj"));
        let other =
            tree.add_project(Project::new("other", ProjectQualifier::Standard, "/o", "/o/obj"));
        tree.set_extends(ext, base);
        (tree, base, ext, other)
    }

    #[test]
    fn extension_chain_resolution() {
        let (tree, base, ext, other) = tree_with_chain();
        assert_eq!(tree.ultimate_extending(base), ext);
        assert_eq!(tree.ultimate_extending(ext), ext);
        assert_eq!(tree.extension_base(ext), base);
        assert!(tree.same_extension_chain(base, ext));
        assert!(!tree.same_extension_chain(base, other));
    }

    #[test]
    fn extending_projects_inherit_imports() {
        let (mut tree, base, ext, other) = tree_with_chain();
        tree.project_mut(base).imports.push(other);
        assert!(tree.imports_directly(ext, other));
        assert!(!tree.imports_directly(other, ext));
    }

    #[test]
    fn object_paths_land_in_ultimate_extender() {
        let (mut tree, base, ext, _) = tree_with_chain();
        let lang = tree.add_language(Language::new("c", base, LanguageConfig::default()));
        let sid = tree.add_source(Source::new("/b/src/a.c"), lang);
        tree.prepare();
        let source = tree.source(sid);
        assert_eq!(source.object_project, ext);
        assert_eq!(source.object_path, PathBuf::from("/e/obj/a.o"));
        assert_eq!(source.dep_path, PathBuf::from("/e/obj/a.d"));
        assert_eq!(source.switches_path, PathBuf::from("/e/obj/a.switches"));
    }

    #[test]
    fn multi_unit_objects_carry_the_index() {
        let mut tree = ProjectTree::new();
        let p = tree.add_project(Project::new("p", ProjectQualifier::Standard, "/p", "/p/obj"));
        let lang = tree.add_language(Language::new("ada", p, LanguageConfig::default()));
        let mut source = Source::new("/p/src/units.ada");
        source.index = 2;
        let sid = tree.add_source(source, lang);
        tree.prepare();
        assert_eq!(tree.source(sid).object_path, PathBuf::from("/p/obj/units~2.o"));
    }

    #[test]
    fn spec_with_body_is_not_compilable() {
        let mut tree = ProjectTree::new();
        let p = tree.add_project(Project::new("p", ProjectQualifier::Standard, "/p", "/p/obj"));
        let lang = tree.add_language(Language::new("ada", p, LanguageConfig::default()));
        let spec = tree.add_source(Source::new("/p/src/pkg.ads"), lang);
        let body = tree.add_source(Source::new("/p/src/pkg.adb"), lang);
        tree.source_mut(spec).kind = SourceKind::Spec;
        tree.source_mut(spec).unit =
            Some(UnitInfo { name: "pkg".into(), spec: Some(spec), body: Some(body) });
        tree.source_mut(body).unit =
            Some(UnitInfo { name: "pkg".into(), spec: Some(spec), body: Some(body) });
        tree.prepare();
        assert_eq!(tree.source(spec).compilable, Compilable::No);
    }

    #[test]
    fn switch_template_expansion() {
        let joined = SwitchTemplate::joined("-gnatem");
        assert_eq!(joined.expand("map.txt"), vec!["-gnatemmap.txt"]);
        let separate = SwitchTemplate::separate(["-MMD", "-MF"]);
        assert_eq!(separate.expand("x.d"), vec!["-MMD", "-MF", "x.d"]);
    }
}
