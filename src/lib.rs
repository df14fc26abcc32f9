#![doc = include_str!("../README.md")]
#![warn(rustdoc::all)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

#[macro_use]
pub mod error;

pub mod buildinfo;

pub mod cache;

pub mod cmdline;

mod compile;
pub use compile::{CompileOutcome, FailedCompile, QueueEntry, SourceQueue};

pub mod deps;

pub mod project;
pub use project::{
    Casing, Compilable, DependencyKind, Language, LanguageConfig, LanguageId, LibraryKind,
    NamingData, PathSlot, PathSyntax, Project, ProjectId, ProjectQualifier, ProjectTree, Source,
    SourceId, SourceKind, SwitchTemplate, UnitInfo,
};

pub mod report;

pub mod resolver;
pub use resolver::{ProjectIter, Visit, VisitOrder};

pub mod rewriter;

pub mod tempfiles;
pub use tempfiles::{ResponseFileFormat, TempRegistry};

pub mod utils;

use crate::{
    error::{DriverError, Result},
    project::Compilable as SourceCompilable,
};
use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
};

/// How chatty the driver is on stdout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Default,
    Verbose,
}

/// Everything the invocation decides about a compile phase: the parallelism
/// cap, the continuation policies and the switch sets handed down by the
/// builder.
#[derive(Clone, Debug)]
pub struct BuildOptions {
    /// Maximum number of compiler processes running simultaneously.
    pub jobs: usize,
    /// Record failures and keep compiling siblings instead of draining and
    /// aborting on the first one.
    pub keep_going: bool,
    /// Also recompile when the recorded switches differ from the current
    /// command line.
    pub check_switches: bool,
    /// Recompile everything, timestamps notwithstanding.
    pub always_compile: bool,
    /// Accept dependencies on projects only reachable through other imports.
    pub indirect_imports: bool,
    /// Subunit dependencies travel with their parent unit.
    pub no_split_units: bool,
    /// Enqueue sources discovered through unit manifests.
    pub closure_needed: bool,
    /// Print `completed n out of m` counters.
    pub display_progress: bool,
    pub keep_temporary_files: bool,
    /// Prefer the listing-file include discipline where available.
    pub use_include_path_file: bool,
    pub verbosity: Verbosity,
    /// Compile only these languages when set.
    pub restricted_languages: Option<HashSet<String>>,
    /// Builder-package switches applying to every language.
    pub builder_switches_all: Vec<String>,
    /// Builder-package switches keyed by language.
    pub builder_switches: HashMap<String, Vec<String>>,
    /// Invocation compile switches applying to every language.
    pub compile_switches_all: Vec<String>,
    /// Invocation compile switches keyed by language.
    pub compile_switches: HashMap<String, Vec<String>>,
    /// User-specified global config files keyed by language.
    pub global_config_files: HashMap<String, PathBuf>,
    /// Where to write the JSON phase record, if anywhere.
    pub phase_record: Option<PathBuf>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            jobs: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            keep_going: false,
            check_switches: false,
            always_compile: false,
            indirect_imports: false,
            no_split_units: false,
            closure_needed: false,
            display_progress: false,
            keep_temporary_files: false,
            use_include_path_file: false,
            verbosity: Verbosity::default(),
            restricted_languages: None,
            builder_switches_all: Vec::new(),
            builder_switches: HashMap::new(),
            compile_switches_all: Vec::new(),
            compile_switches: HashMap::new(),
            global_config_files: HashMap::new(),
            phase_record: None,
        }
    }
}

/// Process-wide driver state threaded explicitly through every component:
/// the temp-file registry, the include-path cache and the one-shot output
/// flags.
#[derive(Debug)]
pub struct DriverContext {
    pub temp: TempRegistry,
    pub(crate) include_cache: cmdline::IncludeCache,
    /// Whether the `Compile` section header has been printed.
    pub(crate) section_displayed: bool,
}

impl DriverContext {
    pub fn new(keep_temporary_files: bool) -> Self {
        Self {
            temp: TempRegistry::new(keep_temporary_files),
            include_cache: Default::default(),
            section_displayed: false,
        }
    }
}

/// Drives the compilation phase of a resolved project tree.
///
/// The tree arrives fully resolved from the loader; the driver decides which
/// sources are stale, spawns compilers under the parallelism cap, verifies
/// the dependencies each compile reveals and reports the aggregate outcome.
///
/// # Examples
///
/// ```no_run
/// use polybuild::{BuildDriver, Project, ProjectQualifier, ProjectTree};
///
/// let mut tree = ProjectTree::new();
/// let root = tree.add_project(Project::new(
///     "demo",
///     ProjectQualifier::Standard,
///     "/work/demo",
///     "/work/demo/obj",
/// ));
/// // languages and sources are added by the project loader
///
/// let outcome = BuildDriver::new(tree, root).jobs(4).keep_going(true).compile()?;
/// std::process::exit(outcome.exit_code());
/// # Ok::<(), polybuild::error::DriverError>(())
/// ```
#[derive(Debug)]
pub struct BuildDriver {
    pub tree: ProjectTree,
    root: ProjectId,
    pub opts: BuildOptions,
}

impl BuildDriver {
    pub fn new(tree: ProjectTree, root: ProjectId) -> Self {
        Self { tree, root, opts: BuildOptions::default() }
    }

    /// Sets the maximum number of parallel compiler processes.
    ///
    /// # Panics
    ///
    /// if `jobs == 0`
    #[must_use]
    pub fn jobs(mut self, jobs: usize) -> Self {
        assert!(jobs > 0);
        self.opts.jobs = jobs;
        self
    }

    #[must_use]
    pub fn keep_going(mut self, keep_going: bool) -> Self {
        self.opts.keep_going = keep_going;
        self
    }

    #[must_use]
    pub fn check_switches(mut self, check: bool) -> Self {
        self.opts.check_switches = check;
        self
    }

    #[must_use]
    pub fn always_compile(mut self, force: bool) -> Self {
        self.opts.always_compile = force;
        self
    }

    #[must_use]
    pub fn indirect_imports(mut self, allow: bool) -> Self {
        self.opts.indirect_imports = allow;
        self
    }

    #[must_use]
    pub fn with_options(mut self, opts: BuildOptions) -> Self {
        self.opts = opts;
        self
    }

    /// Runs the compile phase: pre-phase checks, queue population, then the
    /// scheduler. Temporary files and environment variables are reclaimed
    /// before this returns, success or not.
    pub fn compile(&mut self) -> Result<CompileOutcome> {
        self.tree.prepare();
        self.check_binding_prefixes()?;
        self.resolve_compilers()?;
        self.create_object_dirs()?;
        // pooled mapping files belong to the previous phase's temp registry
        for language in &mut self.tree.languages {
            language.mapping_pool.clear();
        }

        let queue = self.populate_queue();
        trace!("queued {} sources", queue.inserted_count());

        let mut ctx = DriverContext::new(self.opts.keep_temporary_files);
        let result =
            compile::Scheduler::new(&mut self.tree, &self.opts, &mut ctx, queue).run();
        ctx.temp.cleanup();
        let outcome = result?;

        report::failure_summary(&outcome);
        if let Some(path) = &self.opts.phase_record {
            buildinfo::PhaseRecord::new(&outcome).write(path)?;
        }
        Ok(outcome)
    }

    /// Two languages declaring the same binding prefix would produce
    /// colliding binder symbols; refuse up front.
    fn check_binding_prefixes(&self) -> Result<()> {
        let mut seen: HashMap<&str, &str> = HashMap::new();
        for language in &self.tree.languages {
            let Some(prefix) = &language.config.binding_prefix else { continue };
            match seen.get(prefix.as_str()) {
                Some(&first) if first != language.name => {
                    return Err(DriverError::DuplicateBindingPrefix {
                        prefix: prefix.clone(),
                        first: first.to_string(),
                        second: language.name.clone(),
                    });
                }
                _ => {
                    seen.insert(prefix, &language.name);
                }
            }
        }
        Ok(())
    }

    /// Locates every compiler driver that will be needed; a missing one
    /// aborts the phase before any work starts.
    fn resolve_compilers(&mut self) -> Result<()> {
        for id in 0..self.tree.languages.len() {
            let language = &self.tree.languages[id];
            if language.resolved_compiler.is_some() || !self.language_selected(&language.name) {
                continue;
            }
            let has_work = language
                .sources
                .iter()
                .any(|&sid| self.tree.source(sid).compilable == SourceCompilable::Yes);
            if !has_work {
                continue;
            }
            let configured = language.config.compiler_driver.clone();
            let name = language.name.clone();
            let located = utils::locate_executable(&configured)
                .ok_or_else(|| DriverError::CompilerNotFound(configured, name))?;
            trace!("{}: compiler is \"{}\"", self.tree.languages[id].name, located.display());
            self.tree.languages[id].resolved_compiler = Some(located);
        }
        Ok(())
    }

    fn create_object_dirs(&self) -> Result<()> {
        for visit in self.tree.iter_projects(self.root, VisitOrder::Pre).with_aggregated(true) {
            let project = self.tree.project(visit.project);
            if project.externally_built || project.qualifier.is_aggregate() {
                continue;
            }
            if !project.languages.is_empty() && !project.object_dir.exists() {
                std::fs::create_dir_all(&project.object_dir)
                    .map_err(|err| DriverError::io(err, &project.object_dir))?;
            }
        }
        Ok(())
    }

    /// Queues every compilable source of every project reachable from the
    /// root, in traversal order. Each aggregated project contributes its
    /// sources under its own tree root.
    fn populate_queue(&self) -> SourceQueue {
        let mut queue = SourceQueue::new();
        let mut context_roots: HashMap<usize, ProjectId> = HashMap::new();
        for visit in self.tree.iter_projects(self.root, VisitOrder::Pre).with_aggregated(true) {
            let tree_root = *context_roots.entry(visit.context).or_insert(visit.project);
            for &lid in &self.tree.project(visit.project).languages {
                let language = self.tree.language(lid);
                if !self.language_selected(&language.name) {
                    continue;
                }
                for &sid in &language.sources {
                    if self.tree.source(sid).compilable == SourceCompilable::Yes {
                        queue.insert(sid, tree_root);
                    }
                }
            }
        }
        queue
    }

    fn language_selected(&self, name: &str) -> bool {
        self.opts
            .restricted_languages
            .as_ref()
            .map_or(true, |restricted| restricted.contains(name))
    }
}
