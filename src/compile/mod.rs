//! The compilation scheduler.
//!
//! A single supervisor loop owns every data structure and drives an OS-level
//! pool of up to `jobs` child compilers:
//!
//! ```text
//! while queue non-empty or compiles outstanding:
//!     stop if a failure demands it (fail-fast drains first)
//!     start one compile if a slot and an extractable source exist
//!     wait for a slot when the pool is full or nothing else is extractable
//!     report progress
//! ```
//!
//! Parallelism exists only across child processes; the loop suspends solely
//! in the process-wait. Post-processing of a finished compile (dependency
//! parsing, import legality, switches-file write) happens before its object
//! directory is released, so writes into one directory never interleave.

use crate::{
    cache::{self, Freshness, StaleReason},
    cmdline::{self, CommandLine},
    deps::{makefile, ImportVerdict, LegalityChecker, UnitManifest},
    error::{DriverError, Result},
    project::{DependencyKind, ProjectId, ProjectTree, SourceId},
    report,
    rewriter::PatternRewriter,
    utils, BuildOptions, DriverContext,
};
use std::{
    fs,
    path::PathBuf,
    process::{Child, Command, ExitStatus, Stdio},
    time::{Duration, Instant},
};

mod queue;
pub use queue::{QueueEntry, SourceQueue};

/// What a child process in the pool is doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Purpose {
    Compilation,
    DependencyExtraction,
}

/// One in-flight child process and everything needed to post-process it.
#[derive(Debug)]
struct ProcessRecord {
    child: Child,
    pid: u32,
    source: SourceId,
    tree_root: ProjectId,
    purpose: Purpose,
    /// The compiler argv, persisted to the switches file on success.
    args: Vec<String>,
    last_switches_for_file: usize,
    mapping_file: Option<PathBuf>,
    /// Raw stdout capture of a dependency extraction run.
    extraction_output: Option<PathBuf>,
}

/// A recorded compile failure.
#[derive(Clone, Debug)]
pub struct FailedCompile {
    pub source: SourceId,
    pub file: String,
    pub project: String,
    pub reason: String,
}

/// Aggregate result of a compile phase.
#[derive(Clone, Debug, Default)]
pub struct CompileOutcome {
    pub compiled: usize,
    pub up_to_date: usize,
    /// The single source of truth for failure accounting.
    pub bad_compilations: Vec<FailedCompile>,
    pub duration: Duration,
}

impl CompileOutcome {
    pub fn has_failures(&self) -> bool {
        !self.bad_compilations.is_empty()
    }

    /// `0` iff no compilation failed.
    pub fn exit_code(&self) -> i32 {
        if self.has_failures() {
            1
        } else {
            0
        }
    }

    /// Panics with the failure list; test helper.
    #[track_caller]
    pub fn assert_success(&self) {
        assert!(!self.has_failures(), "compilation failed: {:?}", self.bad_compilations);
    }
}

/// Single-threaded supervisor over the process pool; see the module docs.
pub(crate) struct Scheduler<'a> {
    tree: &'a mut ProjectTree,
    opts: &'a BuildOptions,
    ctx: &'a mut DriverContext,
    queue: SourceQueue,
    running: Vec<ProcessRecord>,
    bad_compilations: Vec<FailedCompile>,
    compiled: usize,
    up_to_date: usize,
}

impl<'a> Scheduler<'a> {
    pub(crate) fn new(
        tree: &'a mut ProjectTree,
        opts: &'a BuildOptions,
        ctx: &'a mut DriverContext,
        queue: SourceQueue,
    ) -> Self {
        Self {
            tree,
            opts,
            ctx,
            queue,
            running: Vec::new(),
            bad_compilations: Vec::new(),
            compiled: 0,
            up_to_date: 0,
        }
    }

    pub(crate) fn run(mut self) -> Result<CompileOutcome> {
        let start = Instant::now();
        debug_assert!(self.opts.jobs > 0);

        while !self.queue.is_empty() || !self.running.is_empty() {
            if self.must_exit_because_of_error()? {
                break;
            }
            self.start_compile_if_possible()?;
            self.wait_for_available_slot()?;
            if self.opts.display_progress {
                report::progress(self.processed(), self.queue.inserted_count());
            }
        }

        Ok(CompileOutcome {
            compiled: self.compiled,
            up_to_date: self.up_to_date,
            bad_compilations: self.bad_compilations,
            duration: start.elapsed(),
        })
    }

    fn processed(&self) -> usize {
        self.compiled + self.up_to_date + self.bad_compilations.len()
    }

    /// True iff a compile failed and keep-going is off. Outstanding work is
    /// drained (waited for and recorded, without legality rechecks) before
    /// the phase aborts.
    fn must_exit_because_of_error(&mut self) -> Result<bool> {
        if self.bad_compilations.is_empty() || self.opts.keep_going {
            return Ok(false);
        }
        trace!("draining {} outstanding compiles after failure", self.running.len());
        for mut record in std::mem::take(&mut self.running) {
            let status = record
                .child
                .wait()
                .map_err(|err| DriverError::io(err, format!("pid {}", record.pid)))?;
            if !status.success() {
                self.record_failure(record.source, exit_reason(status));
            }
            self.release(&record);
        }
        Ok(true)
    }

    /// Pulls queue entries until one actually spawns a compiler or nothing
    /// is extractable. Up-to-date sources are skipped on the way.
    fn start_compile_if_possible(&mut self) -> Result<()> {
        if self.running.len() >= self.opts.jobs {
            return Ok(());
        }
        while let Some(entry) = self.queue.extract(self.tree) {
            if self.try_start(entry)? {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Returns whether a compiler was spawned for `entry`.
    fn try_start(&mut self, entry: QueueEntry) -> Result<bool> {
        let source = entry.source;
        let freshness = cache::needs_compile(self.tree, self.opts, source);

        // dependency checks alone may settle it
        if let Freshness::UpToDate { manifest } = &freshness {
            if !self.opts.check_switches {
                let manifest = manifest.clone();
                self.finish_up_to_date(source, entry.tree_root, manifest.as_deref());
                return Ok(false);
            }
            // fall through: the command line decides
        }

        let cmd = cmdline::assemble(self.tree, self.opts, self.ctx, source)?;
        let trailing =
            self.tree.language(self.tree.source(source).language).config.trailing_switches.clone();

        let reason = match freshness {
            Freshness::MustCompile(reason) => reason,
            Freshness::UpToDate { manifest } => {
                let src = self.tree.source(source);
                if cache::check_switches_file(src, &cmd.args, cmd.last_switches_for_file, &trailing)
                {
                    StaleReason::SwitchesChanged
                } else {
                    let language = src.language;
                    if let Some(mapping) = cmd.mapping_file {
                        cmdline::return_mapping_file(self.tree, language, mapping);
                    }
                    self.finish_up_to_date(source, entry.tree_root, manifest.as_deref());
                    return Ok(false);
                }
            }
        };

        debug!("compiling \"{}\": {}", self.tree.source(source).display_name, reason);
        self.spawn_compiler(entry, cmd)?;
        Ok(true)
    }

    fn spawn_compiler(&mut self, entry: QueueEntry, cmd: CommandLine) -> Result<()> {
        let source = entry.source;
        let src = self.tree.source(source);
        let object_dir = src
            .object_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.tree.project(src.object_project).object_dir.clone());

        report::compiling(self.ctx, self.opts, &self.tree.language(src.language).name, src);
        trace!("spawning \"{}\" {:?}", cmd.program.display(), cmd.args);

        let child = Command::new(&cmd.program)
            .args(&cmd.args)
            .current_dir(&object_dir)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|err| DriverError::Spawn(cmd.program.clone(), err))?;

        self.running.push(ProcessRecord {
            pid: child.id(),
            child,
            source,
            tree_root: entry.tree_root,
            purpose: Purpose::Compilation,
            args: cmd.args,
            last_switches_for_file: cmd.last_switches_for_file,
            mapping_file: cmd.mapping_file,
            extraction_output: None,
        });
        Ok(())
    }

    /// Blocks when the pool is full, or when pending compiles are the only
    /// way forward. Reaps exactly one process and post-processes it.
    fn wait_for_available_slot(&mut self) -> Result<()> {
        let must_wait = self.running.len() >= self.opts.jobs
            || (!self.running.is_empty() && self.queue.is_virtually_empty(self.tree));
        if !must_wait {
            return Ok(());
        }
        let (record, status) = self.reap_one()?;
        self.post_process(record, status)
    }

    /// Waits until any child exits and removes its record.
    fn reap_one(&mut self) -> Result<(ProcessRecord, ExitStatus)> {
        loop {
            for i in 0..self.running.len() {
                let polled = self.running[i]
                    .child
                    .try_wait()
                    .map_err(|err| DriverError::io(err, format!("pid {}", self.running[i].pid)))?;
                if let Some(status) = polled {
                    let record = self.running.swap_remove(i);
                    trace!("reaped pid {} ({})", record.pid, status);
                    return Ok((record, status));
                }
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn post_process(&mut self, record: ProcessRecord, status: ExitStatus) -> Result<()> {
        if !status.success() {
            self.record_failure(record.source, exit_reason(status));
            self.release(&record);
            return Ok(());
        }
        match record.purpose {
            Purpose::Compilation => self.on_compile_success(record),
            Purpose::DependencyExtraction => self.on_extraction_success(record),
        }
    }

    /// A compiler exited cleanly: either hand the slot to the configured
    /// dependency extractor, or post-process the dependency artifact now.
    fn on_compile_success(&mut self, record: ProcessRecord) -> Result<()> {
        let language = self.tree.source(record.source).language;
        if !self.tree.language(language).config.compute_dependency.is_empty() {
            return self.spawn_extractor(record);
        }
        self.finish_compiled(record)
    }

    /// Spawns the post-compile dependency builder for the same source,
    /// capturing its stdout for the dependency file.
    fn spawn_extractor(&mut self, record: ProcessRecord) -> Result<()> {
        let language = self.tree.source(record.source).language;
        let argv = self.tree.language(language).config.compute_dependency.clone();
        let program = self.extractor_for(language)?;

        let src = self.tree.source(record.source);
        let object_dir = src.object_path.parent().map(PathBuf::from).unwrap_or_default();
        let source_arg = src.path.to_string_lossy().into_owned();
        let display_name = src.display_name.clone();
        let capture = self.ctx.temp.create_temp(Some(&object_dir), "deps", ".raw")?;
        let stdout = fs::File::create(&capture).map_err(|err| DriverError::io(err, &capture))?;

        trace!("extracting dependencies of \"{display_name}\"");
        let child = Command::new(&program)
            .args(argv.iter().skip(1))
            .arg(source_arg)
            .current_dir(&object_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .spawn()
            .map_err(|err| DriverError::Spawn(program.clone(), err))?;

        self.running.push(ProcessRecord {
            pid: child.id(),
            child,
            source: record.source,
            tree_root: record.tree_root,
            purpose: Purpose::DependencyExtraction,
            args: record.args,
            last_switches_for_file: record.last_switches_for_file,
            mapping_file: record.mapping_file,
            extraction_output: Some(capture),
        });
        Ok(())
    }

    /// Locates the dependency extractor once per language; a missing
    /// extractor aborts the phase.
    fn extractor_for(&mut self, language: crate::project::LanguageId) -> Result<PathBuf> {
        if let Some(path) = &self.tree.language(language).extractor {
            return Ok(path.clone());
        }
        let lang = self.tree.language(language);
        let configured = PathBuf::from(&lang.config.compute_dependency[0]);
        let located = utils::locate_executable(&configured)
            .ok_or_else(|| DriverError::ExtractorNotFound(configured, lang.name.clone()))?;
        self.tree.language_mut(language).extractor = Some(located.clone());
        Ok(located)
    }

    /// The extractor exited cleanly: rewrite its captured stdout into the
    /// dependency file, stripping the absolute source path down to the
    /// display basename so the artifact is location independent.
    fn on_extraction_success(&mut self, mut record: ProcessRecord) -> Result<()> {
        let capture = record.extraction_output.take().expect("extraction captured stdout");
        let src = self.tree.source(record.source);
        let raw = fs::read(&capture).map_err(|err| DriverError::io(err, &capture))?;
        let dep_file =
            fs::File::create(&src.dep_path).map_err(|err| DriverError::io(err, &src.dep_path))?;
        let mut rewriter = PatternRewriter::new(
            std::io::BufWriter::new(dep_file),
            src.path.to_string_lossy().as_bytes().to_vec(),
            src.display_name.as_bytes().to_vec(),
        );
        rewriter
            .write_chunk(&raw)
            .and_then(|()| rewriter.finish())
            .map_err(|err| DriverError::io(err, &src.dep_path))?;
        self.finish_compiled(record)
    }

    /// Common success path: vet the dependency artifact, write the switches
    /// file, release the slot.
    fn finish_compiled(&mut self, record: ProcessRecord) -> Result<()> {
        let source = record.source;
        // the object was just (re)written; observe its stamp before it is
        // persisted into the switches file
        let object_path = self.tree.source(source).object_path.clone();
        self.tree.source_mut(source).object_mtime = utils::mtime(&object_path);

        let kind = self.tree.language(self.tree.source(source).language).config.dependency_kind;
        let verdict = match kind {
            DependencyKind::None => Ok(()),
            DependencyKind::Makefile => self.check_makefile_imports(source),
            DependencyKind::UnitManifest => self.check_manifest_imports(source, record.tree_root),
        };

        match verdict {
            Ok(()) => {
                let src = self.tree.source(source);
                let trailing = &self.tree.language(src.language).config.trailing_switches;
                cache::write_switches_file(
                    src,
                    &record.args,
                    record.last_switches_for_file,
                    trailing,
                )?;
                self.compiled += 1;
            }
            Err(reason) => {
                // force a recompile next time around
                cache::invalidate_artifacts(self.tree.source(source));
                self.record_failure(source, reason);
            }
        }
        self.release(&record);
        Ok(())
    }

    /// Post-processing of a Make-style dependency file: every prerequisite
    /// that maps to a tracked source in another project must be legally
    /// imported.
    fn check_makefile_imports(&mut self, source: SourceId) -> std::result::Result<(), String> {
        let src = self.tree.source(source);
        let dep_path = src.dep_path.clone();
        let object_dir = src.object_path.parent().map(PathBuf::from).unwrap_or_default();
        let content = fs::read_to_string(&dep_path)
            .map_err(|err| format!("dependency file \"{}\": {}", dep_path.display(), err))?;
        let deps = makefile::parse(&content)
            .map_err(|err| format!("dependency file \"{}\": {}", dep_path.display(), err))?;

        let importing = self.tree.source(source).project;
        let mut checker = LegalityChecker::new(self.tree, importing, self.opts.indirect_imports);
        let mut violations = Vec::new();
        for prereq in &deps.prereqs {
            let path = std::path::Path::new(prereq);
            let resolved =
                if path.is_absolute() { path.to_path_buf() } else { object_dir.join(path) };
            let Some(dep) = self.tree.source_by_path(&resolved) else {
                // outside the tree (runtime headers and the like)
                continue;
            };
            let verdict = checker.check(dep);
            if verdict != ImportVerdict::NotImported && !verdict.is_allowed() {
                violations.push((dep, verdict));
            }
        }
        violations
            .extend(checker.finish().into_iter().filter(|(_, verdict)| !verdict.is_allowed()));
        self.report_violations(source, violations)
    }

    /// Post-processing of a unit manifest: vet every withed unit (and, when
    /// subunits travel with their parent, every subunit) and enqueue the
    /// closure when requested.
    fn check_manifest_imports(
        &mut self,
        source: SourceId,
        tree_root: ProjectId,
    ) -> std::result::Result<(), String> {
        let dep_path = self.tree.source(source).dep_path.clone();
        let manifest = UnitManifest::read(&dep_path)
            .map_err(|err| format!("dependency file \"{}\": {}", dep_path.display(), err))?;

        let importing = self.tree.source(source).project;
        let mut checker = LegalityChecker::new(self.tree, importing, self.opts.indirect_imports);
        let mut violations = Vec::new();
        let withed = manifest.withed.iter().map(|r| r.source_file.as_str());
        let subunits = manifest
            .subunits
            .iter()
            .filter(|_| self.opts.no_split_units)
            .map(|r| r.source_file.as_str());
        for basename in withed.chain(subunits) {
            let Some(dep) = self.tree.source_by_basename(basename) else {
                // predefined library unit
                continue;
            };
            let verdict = checker.check(dep);
            if verdict != ImportVerdict::NotImported && !verdict.is_allowed() {
                violations.push((dep, verdict));
            }
        }
        violations
            .extend(checker.finish().into_iter().filter(|(_, verdict)| !verdict.is_allowed()));
        self.report_violations(source, violations)?;

        if self.opts.closure_needed {
            self.queue.insert_transitive_dependencies(
                self.tree,
                &manifest,
                tree_root,
                self.opts.no_split_units,
            );
        }
        Ok(())
    }

    fn report_violations(
        &self,
        source: SourceId,
        violations: Vec<(SourceId, ImportVerdict)>,
    ) -> std::result::Result<(), String> {
        let Some(&(first, verdict)) = violations.first() else {
            return Ok(());
        };
        for &(dep, verdict) in &violations {
            report::import_violation(self.tree, source, dep, verdict);
        }
        let dep = self.tree.source(first);
        let project = &self.tree.project(dep.project).name;
        Err(match verdict {
            ImportVerdict::HiddenInterface => format!(
                "\"{}\" is not part of the interface of project \"{}\"",
                dep.display_name, project
            ),
            _ => format!(
                "\"{}\" belongs to project \"{}\", which is not imported",
                dep.display_name, project
            ),
        })
    }

    fn record_failure(&mut self, source: SourceId, reason: String) {
        let src = self.tree.source(source);
        warn!("compilation of \"{}\" failed: {}", src.display_name, reason);
        self.bad_compilations.push(FailedCompile {
            source,
            file: src.display_name.clone(),
            project: self.tree.project(src.project).name.clone(),
            reason,
        });
    }

    /// Returns the mapping file to its pool and frees the object directory.
    fn release(&mut self, record: &ProcessRecord) {
        if let Some(mapping) = record.mapping_file.clone() {
            let language = self.tree.source(record.source).language;
            cmdline::return_mapping_file(self.tree, language, mapping);
        }
        self.queue.mark_free(self.tree, record.source);
    }

    fn finish_up_to_date(
        &mut self,
        source: SourceId,
        tree_root: ProjectId,
        manifest: Option<&UnitManifest>,
    ) {
        trace!("\"{}\" is up to date", self.tree.source(source).display_name);
        self.up_to_date += 1;
        if self.opts.closure_needed {
            if let Some(manifest) = manifest {
                self.queue.insert_transitive_dependencies(
                    self.tree,
                    manifest,
                    tree_root,
                    self.opts.no_split_units,
                );
            }
        }
        self.queue.mark_free(self.tree, source);
    }
}

fn exit_reason(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("compiler exited with code {code}"),
        None => "compiler terminated by signal".to_string(),
    }
}
