//! Deciding whether a source needs recompiling.
//!
//! The verdict is derived from on-disk state only: the object file's
//! timestamp against the source, the dependency artifact of the previous
//! compile against the current timestamps of everything it lists, and the
//! switches file against the command line the assembler would produce today.
//! Any I/O problem along the way degrades to "must compile"; the oracle
//! never fails a build on its own.

use crate::{
    deps::UnitManifest,
    error::{DriverError, Result},
    project::{DependencyKind, ProjectTree, Source, SourceId},
    utils, BuildOptions,
};
use std::{
    fs,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

/// Why a source is considered stale. Surfaces in verbose output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StaleReason {
    /// The user asked for everything to be compiled.
    Forced,
    ObjectMissing,
    ObjectOlderThanSource,
    DepFileMissing,
    DepFileUnreadable,
    /// The named dependency is newer than the recorded state.
    DepOutOfDate(String),
    /// The switches file is absent, unreadable or disagrees with the
    /// command line that would be used now.
    SwitchesChanged,
}

impl std::fmt::Display for StaleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forced => f.write_str("compilation forced"),
            Self::ObjectMissing => f.write_str("object file does not exist"),
            Self::ObjectOlderThanSource => f.write_str("object file is older than the source"),
            Self::DepFileMissing => f.write_str("dependency file does not exist"),
            Self::DepFileUnreadable => f.write_str("dependency file cannot be read"),
            Self::DepOutOfDate(dep) => write!(f, "\"{dep}\" has changed"),
            Self::SwitchesChanged => f.write_str("compilation switches have changed"),
        }
    }
}

/// Verdict of the staleness oracle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Freshness {
    MustCompile(StaleReason),
    /// Up to date; for unit-manifest languages the parsed manifest is handed
    /// back so closure computation does not read the file twice.
    UpToDate { manifest: Option<Box<UnitManifest>> },
}

impl Freshness {
    pub fn must_compile(&self) -> bool {
        matches!(self, Self::MustCompile(_))
    }
}

/// Decides whether `source` must be recompiled, judged by timestamps and the
/// dependency artifact. Switches verification is a separate step
/// ([`check_switches_file`]) because it needs the freshly assembled command
/// line.
pub fn needs_compile(tree: &ProjectTree, opts: &BuildOptions, source: SourceId) -> Freshness {
    let src = tree.source(source);
    let project = tree.project(src.object_project);

    if project.externally_built && !opts.always_compile {
        trace!("\"{}\" belongs to an externally built project", src.display_name);
        return Freshness::UpToDate { manifest: None };
    }
    if opts.always_compile {
        return Freshness::MustCompile(StaleReason::Forced);
    }

    let Some(object_mtime) = src.object_mtime else {
        return Freshness::MustCompile(StaleReason::ObjectMissing);
    };
    if src.source_mtime.is_none() || src.source_mtime > Some(object_mtime) {
        return Freshness::MustCompile(StaleReason::ObjectOlderThanSource);
    }

    match tree.language(src.language).config.dependency_kind {
        DependencyKind::None => Freshness::UpToDate { manifest: None },
        DependencyKind::Makefile => check_makefile_deps(tree, src),
        DependencyKind::UnitManifest => check_manifest_deps(tree, src),
    }
}

fn check_makefile_deps(tree: &ProjectTree, src: &Source) -> Freshness {
    let Some(dep_mtime) = src.dep_mtime else {
        return Freshness::MustCompile(StaleReason::DepFileMissing);
    };
    let content = match fs::read_to_string(&src.dep_path) {
        Ok(content) => content,
        Err(err) => {
            debug!("could not read \"{}\": {}", src.dep_path.display(), err);
            return Freshness::MustCompile(StaleReason::DepFileUnreadable);
        }
    };
    let deps = match crate::deps::makefile::parse(&content) {
        Ok(deps) => deps,
        Err(_) => return Freshness::MustCompile(StaleReason::DepFileUnreadable),
    };
    let object_dir = src.object_path.parent();
    for prereq in &deps.prereqs {
        let path = Path::new(prereq);
        let resolved = if path.is_absolute() {
            path.to_path_buf()
        } else {
            object_dir.map(|dir| dir.join(path)).unwrap_or_else(|| path.to_path_buf())
        };
        // a tracked source carries its timestamp already, spare the stat
        let current = tree
            .source_by_path(&resolved)
            .and_then(|id| tree.source(id).source_mtime)
            .or_else(|| utils::mtime(&resolved));
        match current {
            None => return Freshness::MustCompile(StaleReason::DepOutOfDate(prereq.clone())),
            Some(mtime) if mtime > dep_mtime => {
                return Freshness::MustCompile(StaleReason::DepOutOfDate(prereq.clone()));
            }
            Some(_) => {}
        }
    }
    Freshness::UpToDate { manifest: None }
}

fn check_manifest_deps(tree: &ProjectTree, src: &Source) -> Freshness {
    if src.dep_mtime.is_none() {
        return Freshness::MustCompile(StaleReason::DepFileMissing);
    }
    let manifest = match UnitManifest::read(&src.dep_path) {
        Ok(manifest) => manifest,
        Err(err) => {
            debug!("could not read \"{}\": {}", src.dep_path.display(), err);
            return Freshness::MustCompile(StaleReason::DepFileUnreadable);
        }
    };
    for dep in &manifest.deps {
        let Some(id) = tree.source_by_basename(&dep.source_file) else {
            // not ours to track (runtime-library source)
            continue;
        };
        // a source newer than its recorded stamp invalidates the unit; an
        // unreadable source or stamp degrades to must-compile
        match (tree.source(id).source_mtime, utils::parse_stamp(&dep.stamp)) {
            (Some(current), Some(recorded)) if current <= recorded => {}
            _ => {
                return Freshness::MustCompile(StaleReason::DepOutOfDate(
                    dep.source_file.clone(),
                ));
            }
        }
    }
    Freshness::UpToDate { manifest: Some(Box::new(manifest)) }
}

/// Verifies the switches file against the command line that would be used
/// now. Returns `true` when the source must be recompiled: stamp mismatch,
/// any differing, missing or extra line, or any I/O error.
pub fn check_switches_file(
    src: &Source,
    args: &[String],
    last_switches_for_file: usize,
    trailing: &[String],
) -> bool {
    let file = match fs::File::open(&src.switches_path) {
        Ok(file) => file,
        Err(_) => {
            trace!("switches file \"{}\" not readable", src.switches_path.display());
            return true;
        }
    };
    let mut lines = BufReader::new(file).lines();
    let mut next = || -> Option<String> { lines.next().and_then(|line| line.ok()) };

    let recorded_stamp = match next() {
        Some(stamp) => stamp,
        None => return true,
    };
    let current_stamp = src.object_mtime.map(utils::file_stamp);
    if current_stamp.as_deref() != Some(recorded_stamp.as_str()) {
        trace!("object stamp changed for \"{}\"", src.display_name);
        return true;
    }

    for expected in args[..last_switches_for_file.min(args.len())].iter().chain(trailing) {
        match next() {
            Some(line) if line == *expected => {}
            _ => {
                trace!("switches changed for \"{}\"", src.display_name);
                return true;
            }
        }
    }
    // an extra trailing line means the previous compile used more switches
    next().is_some()
}

/// Writes the switches file for a just-compiled source: the object stamp,
/// the replayable argv prefix, then the trailing required switches.
///
/// A write failure here is fatal for the phase; the likeliest cause is a
/// full disk and a half-written switches file would poison later staleness
/// checks.
pub fn write_switches_file(
    src: &Source,
    args: &[String],
    last_switches_for_file: usize,
    trailing: &[String],
) -> Result<()> {
    let stamp = utils::stamp_of(&src.object_path)
        .ok_or_else(|| DriverError::DiskFull(src.switches_path.clone()))?;
    let write = || -> std::io::Result<()> {
        let file = fs::File::create(&src.switches_path)?;
        let mut out = BufWriter::new(file);
        writeln!(out, "{stamp}")?;
        for arg in &args[..last_switches_for_file.min(args.len())] {
            writeln!(out, "{arg}")?;
        }
        for switch in trailing {
            writeln!(out, "{switch}")?;
        }
        out.flush()
    };
    write().map_err(|err| {
        error!("could not write \"{}\": {}", src.switches_path.display(), err);
        DriverError::DiskFull(src.switches_path.clone())
    })
}

/// Removes the artifacts of an invalidated compile so the next run redoes
/// it: object, dependency file and switches file.
pub fn invalidate_artifacts(src: &Source) {
    for path in [&src.object_path, &src.dep_path, &src.switches_path] {
        if let Err(err) = fs::remove_file(path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                debug!("could not remove \"{}\": {}", path.display(), err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{Language, LanguageConfig, Project, ProjectQualifier, ProjectTree};
    use std::{fs, path::PathBuf, thread, time::Duration};

    struct Fixture {
        _tmp: tempfile::TempDir,
        tree: ProjectTree,
        source: SourceId,
        src_path: PathBuf,
        obj_path: PathBuf,
        dep_path: PathBuf,
    }

    fn fixture(kind: DependencyKind) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("obj")).unwrap();
        let src_path = root.join("a.c");
        fs::write(&src_path, "int a;\n").unwrap();

        let mut tree = ProjectTree::new();
        let p = tree.add_project(Project::new(
            "p",
            ProjectQualifier::Standard,
            root,
            root.join("obj"),
        ));
        let config = LanguageConfig { dependency_kind: kind, ..Default::default() };
        let lang = tree.add_language(Language::new("c", p, config));
        let source = tree.add_source(crate::project::Source::new(&src_path), lang);
        tree.prepare();
        let obj_path = tree.source(source).object_path.clone();
        let dep_path = tree.source(source).dep_path.clone();
        Fixture { _tmp: tmp, tree, source, src_path, obj_path, dep_path }
    }

    fn opts() -> BuildOptions {
        BuildOptions::default()
    }

    #[test]
    fn missing_object_is_stale() {
        let f = fixture(DependencyKind::None);
        assert_eq!(
            needs_compile(&f.tree, &opts(), f.source),
            Freshness::MustCompile(StaleReason::ObjectMissing)
        );
    }

    #[test]
    fn fresh_object_without_deps_is_up_to_date() {
        let mut f = fixture(DependencyKind::None);
        fs::write(&f.obj_path, "o").unwrap();
        f.tree.prepare();
        assert!(!needs_compile(&f.tree, &opts(), f.source).must_compile());
    }

    #[test]
    fn source_newer_than_object_is_stale() {
        let mut f = fixture(DependencyKind::None);
        fs::write(&f.obj_path, "o").unwrap();
        thread::sleep(Duration::from_millis(20));
        fs::write(&f.src_path, "int a; int b;\n").unwrap();
        f.tree.prepare();
        assert_eq!(
            needs_compile(&f.tree, &opts(), f.source),
            Freshness::MustCompile(StaleReason::ObjectOlderThanSource)
        );
    }

    #[test]
    fn externally_built_projects_are_skipped() {
        let mut f = fixture(DependencyKind::None);
        let project = f.tree.source(f.source).object_project;
        f.tree.project_mut(project).externally_built = true;
        assert!(!needs_compile(&f.tree, &opts(), f.source).must_compile());

        let forced = BuildOptions { always_compile: true, ..Default::default() };
        assert!(needs_compile(&f.tree, &forced, f.source).must_compile());
    }

    #[test]
    fn missing_dep_file_is_stale() {
        let mut f = fixture(DependencyKind::Makefile);
        fs::write(&f.obj_path, "o").unwrap();
        f.tree.prepare();
        assert_eq!(
            needs_compile(&f.tree, &opts(), f.source),
            Freshness::MustCompile(StaleReason::DepFileMissing)
        );
    }

    #[test]
    fn touched_prerequisite_is_stale() {
        let mut f = fixture(DependencyKind::Makefile);
        fs::write(&f.obj_path, "o").unwrap();
        fs::write(&f.dep_path, format!("a.o: {}\n", f.src_path.display())).unwrap();
        f.tree.prepare();
        assert!(!needs_compile(&f.tree, &opts(), f.source).must_compile());

        thread::sleep(Duration::from_millis(20));
        fs::write(&f.src_path, "int a; int b;\n").unwrap();
        f.tree.prepare();
        assert!(needs_compile(&f.tree, &opts(), f.source).must_compile());
    }

    #[test]
    fn manifest_stamps_compare_directionally() {
        let mut f = fixture(DependencyKind::UnitManifest);
        fs::write(&f.obj_path, "o").unwrap();
        let good_stamp = utils::stamp_of(&f.src_path).unwrap();
        fs::write(&f.dep_path, format!("U a a.c\nD a.c {good_stamp}\n")).unwrap();
        f.tree.prepare();
        let fresh = needs_compile(&f.tree, &opts(), f.source);
        assert!(!fresh.must_compile());
        let Freshness::UpToDate { manifest: Some(manifest) } = fresh else {
            panic!("expected a pre-parsed manifest");
        };
        assert_eq!(manifest.unit.as_ref().unwrap().name, "a");

        // recorded stamp newer than the source: still up to date
        fs::write(&f.dep_path, "U a a.c\nD a.c 9999999999.000000000\n").unwrap();
        f.tree.prepare();
        assert!(!needs_compile(&f.tree, &opts(), f.source).must_compile());

        // source newer than the recorded stamp: recompile
        fs::write(&f.dep_path, "U a a.c\nD a.c 0.000000000\n").unwrap();
        f.tree.prepare();
        assert_eq!(
            needs_compile(&f.tree, &opts(), f.source),
            Freshness::MustCompile(StaleReason::DepOutOfDate("a.c".into()))
        );

        // unparsable stamp degrades to recompile
        fs::write(&f.dep_path, "U a a.c\nD a.c not-a-stamp\n").unwrap();
        f.tree.prepare();
        assert!(needs_compile(&f.tree, &opts(), f.source).must_compile());
    }

    #[test]
    fn oracle_is_idempotent() {
        let mut f = fixture(DependencyKind::Makefile);
        fs::write(&f.obj_path, "o").unwrap();
        fs::write(&f.dep_path, format!("a.o: {}\n", f.src_path.display())).unwrap();
        f.tree.prepare();
        let first = needs_compile(&f.tree, &opts(), f.source);
        let second = needs_compile(&f.tree, &opts(), f.source);
        assert_eq!(first.must_compile(), second.must_compile());
    }

    #[test]
    fn switches_roundtrip_and_drift() {
        let mut f = fixture(DependencyKind::None);
        fs::write(&f.obj_path, "o").unwrap();
        f.tree.prepare();
        let args: Vec<String> =
            ["-O2", "-g", "-c", "a.c"].iter().map(|s| s.to_string()).collect();
        let trailing = vec!["-fPIC".to_string()];
        let src = f.tree.source(f.source).clone();
        write_switches_file(&src, &args, 2, &trailing).unwrap();

        // identical command line: nothing to redo
        assert!(!check_switches_file(&src, &args, 2, &trailing));

        // one argv line differs
        let drifted: Vec<String> =
            ["-O0", "-g", "-c", "a.c"].iter().map(|s| s.to_string()).collect();
        assert!(check_switches_file(&src, &drifted, 2, &trailing));

        // extra trailing switch recorded but no longer configured
        assert!(check_switches_file(&src, &args, 2, &[]));

        // missing file
        fs::remove_file(&src.switches_path).unwrap();
        assert!(check_switches_file(&src, &args, 2, &trailing));
    }

    #[test]
    fn invalidation_removes_all_artifacts() {
        let mut f = fixture(DependencyKind::Makefile);
        fs::write(&f.obj_path, "o").unwrap();
        fs::write(&f.dep_path, "a.o: a.c\n").unwrap();
        f.tree.prepare();
        let src = f.tree.source(f.source).clone();
        fs::write(&src.switches_path, "stamp\n").unwrap();
        invalidate_artifacts(&src);
        assert!(!f.obj_path.exists());
        assert!(!f.dep_path.exists());
        assert!(!src.switches_path.exists());
    }
}
