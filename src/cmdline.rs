//! Assembly of the compiler command line for one source.
//!
//! The argument order is fixed and deterministic:
//!
//!  1. leading required switches of the language config
//!  2. builder switches for all languages
//!  3. builder switches for this language
//!  4. the PIC options when the object lands in a non-static library
//!  5. per-source switch overrides, or the language defaults
//!  6. compile switches of the invocation for all languages
//!  7. compile switches of the invocation for this language
//!  8. the dependency-generation switches with the dep path substituted
//!  9. include-directory switches (discipline 1 of [`include paths`](#include-paths))
//! 10. the config-file switch for the materialized per-project config
//! 11. the mapping-file switch with a pooled mapping file
//! 12. trailing required switches
//! 13. the source path, rendered in the language's path syntax
//! 14. the object-path switch
//! 15. the multi-unit index switch for indexed sources
//!
//! The prefix up to and including step 11 is what the switches file records
//! and what staleness compares; the trailing, source, object and index
//! switches (12-15) are excluded, the trailing ones being verified
//! separately against the language config.
//!
//! # Include paths
//!
//! A language declares exactly one include-path discipline, checked in this
//! order: an `include_option` prefix puts one switch per directory into the
//! argv; an `include_path_file_var` receives the path of a file listing one
//! directory per line; an `include_path_var` receives all directories joined
//! with the platform separator. The directory set and the listing file are
//! cached and rebuilt only when the (project, language) of the current
//! compile changes.

use crate::{
    error::{DriverError, Result},
    project::{LanguageId, PathSyntax, ProjectId, ProjectTree, SourceId},
    utils, BuildOptions, DriverContext,
};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

/// The assembled command line of one compilation.
#[derive(Clone, Debug)]
pub struct CommandLine {
    /// Resolved compiler executable.
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Length of the argv prefix recorded in the switches file.
    pub last_switches_for_file: usize,
    /// Mapping file popped from the language pool, returned after the reap.
    pub mapping_file: Option<PathBuf>,
}

/// Include-path data prepared for the (project, language) of the current
/// compile.
#[derive(Debug, Default)]
pub(crate) struct IncludeCache {
    key: Option<(ProjectId, LanguageId)>,
    dirs: Vec<PathBuf>,
    /// Lazily written directory-listing file for discipline 2.
    path_file: Option<PathBuf>,
}

/// Builds the compiler argv for `source`; see the module docs for the exact
/// order.
pub fn assemble(
    tree: &mut ProjectTree,
    opts: &BuildOptions,
    ctx: &mut DriverContext,
    source: SourceId,
) -> Result<CommandLine> {
    let src = tree.source(source).clone();
    let language = src.language;
    let lang_name = tree.language(language).name.clone();
    let config = tree.language(language).config.clone();
    let program = tree
        .language(language)
        .resolved_compiler
        .clone()
        .unwrap_or_else(|| config.compiler_driver.clone());

    let mut args: Vec<String> = Vec::with_capacity(32);

    // 1-3: required and builder-level switches
    args.extend(config.leading_switches.iter().cloned());
    args.extend(opts.builder_switches_all.iter().cloned());
    if let Some(switches) = opts.builder_switches.get(&lang_name) {
        args.extend(switches.iter().cloned());
    }

    // 4: position independent code for non-static library objects
    if tree.project(src.object_project).needs_pic() {
        args.extend(config.pic_options.iter().cloned());
    }

    // 5: per-source overrides beat the language defaults
    match config.switches_by_file.get(&src.file) {
        Some(overrides) => args.extend(overrides.iter().cloned()),
        None => args.extend(config.default_switches.iter().cloned()),
    }

    // 6-7: invocation switches
    args.extend(opts.compile_switches_all.iter().cloned());
    if let Some(switches) = opts.compile_switches.get(&lang_name) {
        args.extend(switches.iter().cloned());
    }

    // 8: dependency generation
    if let Some(template) = &config.dependency_switches {
        args.extend(template.expand(&render_path(&src.dep_path, config.path_syntax)));
    }

    // 9: include directories
    setup_include_paths(tree, opts, ctx, src.project, language, &mut args)?;

    // 10: per-project config file
    if let Some(config_file) = config_file_for(tree, opts, ctx, src.project, language)? {
        if let Some(template) = &config.config_file_switches {
            args.extend(template.expand(&render_path(&config_file, config.path_syntax)));
        }
    }

    // 11: mapping file
    let mapping_file = take_mapping_file(tree, ctx, language)?;
    if let (Some(path), Some(template)) = (&mapping_file, &config.mapping_file_switches) {
        args.extend(template.expand(&render_path(path, config.path_syntax)));
    }
    let last_switches_for_file = args.len();

    // 12: trailing required switches
    args.extend(config.trailing_switches.iter().cloned());

    // 13: the source itself
    let source_arg = render_path(&src.path, config.path_syntax);
    match &config.source_file_switches {
        Some(template) => args.extend(template.expand(&source_arg)),
        None => args.push(source_arg),
    }

    // 14: the object
    let object_arg = render_path(&src.object_path, config.path_syntax);
    match &config.object_file_switches {
        Some(template) => args.extend(template.expand(&object_arg)),
        None if src.index > 0 => {
            args.push("-o".to_string());
            args.push(object_arg);
        }
        None => {}
    }

    // 15: unit selection inside a multi-unit source
    if src.index > 0 {
        if let Some(template) = &config.multi_unit_switches {
            args.extend(template.expand(&src.index.to_string()));
        }
    }

    Ok(CommandLine { program, args, last_switches_for_file, mapping_file })
}

/// Renders a path the way the language wants to see it.
pub fn render_path(path: &Path, syntax: PathSyntax) -> String {
    match syntax {
        PathSyntax::Canonical => {
            use path_slash::PathExt;
            path.to_slash_lossy().into_owned()
        }
        PathSyntax::Host => path.to_string_lossy().into_owned(),
    }
}

/// Prepares the include-path delivery for the current compile, contributing
/// argv switches for discipline 1 and environment variables for 2 and 3.
fn setup_include_paths(
    tree: &ProjectTree,
    opts: &BuildOptions,
    ctx: &mut DriverContext,
    project: ProjectId,
    language: LanguageId,
    args: &mut Vec<String>,
) -> Result<()> {
    let config = &tree.language(language).config;
    if config.include_option.is_none()
        && config.include_path_file_var.is_none()
        && config.include_path_var.is_none()
    {
        return Ok(());
    }

    let key = (project, language);
    if ctx.include_cache.key != Some(key) {
        ctx.include_cache =
            IncludeCache { key: Some(key), dirs: include_dirs(tree, project, language), path_file: None };
    }

    // the flag promotes the listing-file discipline over inline switches
    let prefer_file = opts.use_include_path_file && config.include_path_file_var.is_some();

    if let (Some(option), false) = (&config.include_option, prefer_file) {
        let syntax = config.path_syntax;
        for dir in &ctx.include_cache.dirs {
            args.push(format!("{option}{}", render_path(dir, syntax)));
        }
        return Ok(());
    }

    if let Some(var) = &config.include_path_file_var {
        if ctx.include_cache.path_file.is_none() {
            let path = ctx.temp.create_temp(None, "includes", ".txt")?;
            let mut out = fs::File::create(&path).map_err(|err| DriverError::io(err, &path))?;
            for dir in &ctx.include_cache.dirs {
                writeln!(out, "{}", dir.display()).map_err(|err| DriverError::io(err, &path))?;
            }
            ctx.include_cache.path_file = Some(path);
        }
        let path = ctx.include_cache.path_file.as_ref().expect("listing file just created");
        ctx.temp.set_env(var, path);
        return Ok(());
    }

    if let Some(var) = &config.include_path_var {
        let joined = itertools::Itertools::join(
            &mut ctx.include_cache.dirs.iter().map(|dir| dir.display().to_string()),
            &utils::PATH_LIST_SEPARATOR.to_string(),
        );
        ctx.temp.set_env(var, joined);
    }
    Ok(())
}

/// The include set of a compile: the object directory of the project's
/// ultimate extender, then the object directory of every transitively
/// imported project declaring a compatible language.
fn include_dirs(tree: &ProjectTree, project: ProjectId, language: LanguageId) -> Vec<PathBuf> {
    let lang = tree.language(language);
    let compatible = |candidate: ProjectId| {
        tree.project(candidate).languages.iter().any(|&id| {
            let name = &tree.language(id).name;
            name == &lang.name || lang.config.compatible_languages.contains(name)
        })
    };

    let mut dirs = Vec::new();
    let mut push = |dir: PathBuf| {
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
    };
    push(tree.project(tree.ultimate_extending(project)).object_dir.clone());
    for &imported in tree.transitive_imports(project) {
        if compatible(imported) {
            push(tree.project(imported).object_dir.clone());
        }
    }
    dirs
}

/// Materializes the per-project config file for languages configured with
/// config-file support. Generated at most once per project per run,
/// aggregating the user's global and local config files, the naming-scheme
/// patterns and the per-source declarations.
pub(crate) fn config_file_for(
    tree: &mut ProjectTree,
    opts: &BuildOptions,
    ctx: &mut DriverContext,
    project: ProjectId,
    language: LanguageId,
) -> Result<Option<PathBuf>> {
    if tree.language(language).config.config_file_switches.is_none() {
        return Ok(None);
    }
    if tree.project(project).config_checked {
        return Ok(tree.project(project).generated_config.clone());
    }
    tree.project_mut(project).config_checked = true;

    let lang = tree.language(language);
    let config = &lang.config;
    let mut content = String::new();

    if let Some(global) = opts.global_config_files.get(&lang.name) {
        append_config_copy(&mut content, global, &tree.project(project).dir)?;
    }
    if let Some(local) = &config.local_config_file {
        let local = local.clone();
        append_config_copy(&mut content, &local, &tree.project(project).dir)?;
    }

    if let Some(pattern) = &config.naming_body_pattern {
        content.push_str(&expand_naming_pattern(pattern, config));
        content.push('\n');
    }
    if let Some(pattern) = &config.naming_spec_pattern {
        content.push_str(&expand_naming_pattern(pattern, config));
        content.push('\n');
    }

    for &sid in &lang.sources {
        let source = tree.source(sid);
        let Some(unit) = &source.unit else { continue };
        let pattern = match source.kind {
            crate::project::SourceKind::Spec => config.config_spec_pattern.as_ref(),
            _ => config.config_body_pattern.as_ref(),
        };
        if let Some(pattern) = pattern {
            content.push_str(&expand_source_pattern(
                pattern,
                &unit.name,
                &source.file,
                source.index,
            ));
            content.push('\n');
        }
    }

    if content.is_empty() {
        return Ok(None);
    }

    let path = ctx.temp.create_temp(None, "config", ".cfg")?;
    fs::write(&path, content).map_err(|err| DriverError::io(err, &path))?;
    debug!(
        "generated config file \"{}\" for project \"{}\"",
        path.display(),
        tree.project(project).name
    );
    tree.project_mut(project).generated_config = Some(path.clone());
    Ok(Some(path))
}

/// Copies a user config file into the generated one. A missing or unreadable
/// file is fatal per the error policy.
fn append_config_copy(content: &mut String, file: &Path, project_dir: &Path) -> Result<()> {
    // relative paths resolve lexically against the project directory
    let resolved = if file.is_absolute() {
        file.to_path_buf()
    } else {
        utils::normalize_path(&project_dir.join(file))
    };
    let copied =
        fs::read_to_string(&resolved).map_err(|err| DriverError::io(err, &resolved))?;
    content.push_str(&copied);
    if !copied.ends_with('\n') {
        content.push('\n');
    }
    Ok(())
}

/// Expands a naming-scheme pattern: `%b` body suffix, `%s` spec suffix,
/// `%d` dot replacement, `%c` casing image, `%%` a literal percent.
fn expand_naming_pattern(pattern: &str, config: &crate::project::LanguageConfig) -> String {
    expand_pattern(pattern, |spec, out| match spec {
        'b' => out.push_str(&config.naming.body_suffix),
        's' => out.push_str(&config.naming.spec_suffix),
        'd' => out.push_str(&config.naming.dot_replacement),
        'c' => out.push_str(config.naming.casing.image()),
        other => {
            out.push('%');
            out.push(other);
        }
    })
}

/// Expands a per-source pattern: `%u` unit, `%f` file, `%i` index, `%%` a
/// literal percent.
fn expand_source_pattern(pattern: &str, unit: &str, file: &str, index: u32) -> String {
    expand_pattern(pattern, |spec, out| match spec {
        'u' => out.push_str(unit),
        'f' => out.push_str(file),
        'i' => out.push_str(&index.to_string()),
        other => {
            out.push('%');
            out.push(other);
        }
    })
}

fn expand_pattern(pattern: &str, mut substitute: impl FnMut(char, &mut String)) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some(spec) => substitute(spec, &mut out),
            None => out.push('%'),
        }
    }
    out
}

/// Pops a mapping file from the language pool, creating and filling a fresh
/// one when the pool is empty.
fn take_mapping_file(
    tree: &mut ProjectTree,
    ctx: &mut DriverContext,
    language: LanguageId,
) -> Result<Option<PathBuf>> {
    if tree.language(language).config.mapping_file_switches.is_none() {
        return Ok(None);
    }
    if let Some(path) = tree.language_mut(language).mapping_pool.pop() {
        trace!("reusing mapping file \"{}\"", path.display());
        return Ok(Some(path));
    }
    let path = ctx.temp.create_temp(None, "mapping", ".map")?;
    let mut out = fs::File::create(&path).map_err(|err| DriverError::io(err, &path))?;
    for &sid in &tree.language(language).sources {
        let source = tree.source(sid);
        if let Some(unit) = &source.unit {
            writeln!(out, "{} {}", unit.name, source.path.display())
                .map_err(|err| DriverError::io(err, &path))?;
        }
    }
    Ok(Some(path))
}

/// Returns a mapping file to its language pool for reuse by the next compile.
pub(crate) fn return_mapping_file(tree: &mut ProjectTree, language: LanguageId, path: PathBuf) {
    tree.language_mut(language).mapping_pool.push(path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        project::{
            Language, LanguageConfig, LibraryKind, Project, ProjectQualifier, Source,
            SwitchTemplate,
        },
        BuildOptions, DriverContext,
    };
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    struct Fixture {
        tree: ProjectTree,
        opts: BuildOptions,
        ctx: DriverContext,
        source: SourceId,
    }

    fn fixture(config: LanguageConfig, opts: BuildOptions) -> Fixture {
        let mut tree = ProjectTree::new();
        let p = tree.add_project(Project::new("p", ProjectQualifier::Standard, "/p", "/p/obj"));
        let lang = tree.add_language(Language::new("c", p, config));
        let source = tree.add_source(Source::new("/p/src/a.c"), lang);
        tree.prepare();
        Fixture { tree, opts, ctx: DriverContext::new(false), source }
    }

    fn full_config() -> LanguageConfig {
        LanguageConfig {
            compiler_driver: "cc".into(),
            leading_switches: vec!["-c".into()],
            trailing_switches: vec!["-pipe".into()],
            dependency_switches: Some(SwitchTemplate::separate(["-MMD", "-MF"])),
            include_option: Some("-I".into()),
            default_switches: vec!["-O2".into()],
            ..Default::default()
        }
    }

    #[test]
    fn argv_order_is_deterministic() {
        let mut opts = BuildOptions::default();
        opts.builder_switches_all = vec!["-b-all".into()];
        opts.builder_switches = HashMap::from([("c".to_string(), vec!["-b-c".to_string()])]);
        opts.compile_switches_all = vec!["-x-all".into()];
        opts.compile_switches = HashMap::from([("c".to_string(), vec!["-x-c".to_string()])]);
        let mut f = fixture(full_config(), opts);

        let cmd = assemble(&mut f.tree, &f.opts, &mut f.ctx, f.source).unwrap();
        assert_eq!(
            cmd.args,
            vec![
                "-c", "-b-all", "-b-c", "-O2", "-x-all", "-x-c", "-MMD", "-MF", "/p/obj/a.d",
                "-I/p/obj", "-pipe", "/p/src/a.c",
            ]
        );
        // no config or mapping switches here, so the recorded prefix ends
        // at the include switch
        assert_eq!(cmd.last_switches_for_file, 10);
        assert_eq!(cmd.program, PathBuf::from("cc"));
    }

    #[test]
    fn per_source_overrides_replace_defaults() {
        let mut config = full_config();
        config.switches_by_file =
            HashMap::from([("a.c".to_string(), vec!["-O0".to_string(), "-g".to_string()])]);
        let mut f = fixture(config, BuildOptions::default());
        let cmd = assemble(&mut f.tree, &f.opts, &mut f.ctx, f.source).unwrap();
        assert!(cmd.args.contains(&"-O0".to_string()));
        assert!(!cmd.args.contains(&"-O2".to_string()));
    }

    #[test]
    fn pic_options_only_for_non_static_libraries() {
        let mut config = full_config();
        config.pic_options = vec!["-fPIC".into()];
        let mut f = fixture(config.clone(), BuildOptions::default());
        let project = f.tree.source(f.source).object_project;
        let cmd = assemble(&mut f.tree, &f.opts, &mut f.ctx, f.source).unwrap();
        assert!(!cmd.args.contains(&"-fPIC".to_string()));

        f.tree.project_mut(project).qualifier = ProjectQualifier::Library;
        f.tree.project_mut(project).library_kind = Some(LibraryKind::Dynamic);
        let cmd = assemble(&mut f.tree, &f.opts, &mut f.ctx, f.source).unwrap();
        assert!(cmd.args.contains(&"-fPIC".to_string()));
    }

    #[test]
    fn multi_unit_sources_get_object_and_index_switches() {
        let mut config = full_config();
        config.multi_unit_switches = Some(SwitchTemplate::joined("-unit="));
        let mut f = fixture(config, BuildOptions::default());
        f.tree.source_mut(f.source).index = 3;
        f.tree.prepare();
        let cmd = assemble(&mut f.tree, &f.opts, &mut f.ctx, f.source).unwrap();
        let tail: Vec<_> = cmd.args.iter().rev().take(4).rev().cloned().collect();
        assert_eq!(tail, vec!["/p/src/a.c", "-o", "/p/obj/a~3.o", "-unit=3"]);
    }

    #[test]
    fn include_dirs_cover_compatible_imports_only() {
        let mut tree = ProjectTree::new();
        let p = tree.add_project(Project::new("p", ProjectQualifier::Standard, "/p", "/p/obj"));
        let q = tree.add_project(Project::new("q", ProjectQualifier::Standard, "/q", "/q/obj"));
        let r = tree.add_project(Project::new("r", ProjectQualifier::Standard, "/r", "/r/obj"));
        tree.project_mut(p).imports = vec![q, r];
        let mut config = full_config();
        config.compatible_languages = vec!["c++".into()];
        let lang = tree.add_language(Language::new("c", p, config));
        tree.add_language(Language::new("c++", q, LanguageConfig::default()));
        tree.add_language(Language::new("ada", r, LanguageConfig::default()));
        let source = tree.add_source(Source::new("/p/src/a.c"), lang);
        tree.prepare();

        let mut ctx = DriverContext::new(false);
        let cmd = assemble(&mut tree, &BuildOptions::default(), &mut ctx, source).unwrap();
        assert!(cmd.args.contains(&"-I/p/obj".to_string()));
        assert!(cmd.args.contains(&"-I/q/obj".to_string()));
        // r declares no compatible language
        assert!(!cmd.args.contains(&"-I/r/obj".to_string()));
    }

    #[test]
    fn include_path_env_var_discipline() {
        let mut config = full_config();
        config.include_option = None;
        config.include_path_var = Some("POLYBUILD_TEST_CPATH".into());
        let mut f = fixture(config, BuildOptions::default());
        let cmd = assemble(&mut f.tree, &f.opts, &mut f.ctx, f.source).unwrap();
        assert!(!cmd.args.iter().any(|arg| arg.starts_with("-I")));
        assert_eq!(std::env::var("POLYBUILD_TEST_CPATH").unwrap(), "/p/obj");
        f.ctx.temp.cleanup();
    }

    #[test]
    fn include_path_file_discipline() {
        let mut config = full_config();
        config.include_option = None;
        config.include_path_file_var = Some("POLYBUILD_TEST_CPATH_FILE".into());
        let mut f = fixture(config, BuildOptions::default());
        assemble(&mut f.tree, &f.opts, &mut f.ctx, f.source).unwrap();
        let listing = std::env::var("POLYBUILD_TEST_CPATH_FILE").unwrap();
        assert_eq!(std::fs::read_to_string(&listing).unwrap(), "/p/obj\n");
        f.ctx.temp.cleanup();
        assert_eq!(std::env::var("POLYBUILD_TEST_CPATH_FILE").unwrap(), "");
    }

    #[test]
    fn naming_and_source_patterns_expand() {
        let config = LanguageConfig {
            naming: crate::project::NamingData {
                spec_suffix: ".ads".into(),
                body_suffix: ".adb".into(),
                dot_replacement: "-".into(),
                casing: crate::project::Casing::Lowercase,
            },
            ..Default::default()
        };
        assert_eq!(
            expand_naming_pattern("body %b spec %s dot %d case %c pct %%", &config),
            "body .adb spec .ads dot - case lowercase pct %"
        );
        assert_eq!(
            expand_source_pattern("unit %u file %f index %i pct %%", "pkg", "pkg.adb", 2),
            "unit pkg file pkg.adb index 2 pct %"
        );
    }

    #[test]
    fn config_file_generated_once_per_project() {
        let tmp = tempfile::tempdir().unwrap();
        let local = tmp.path().join("local.cfg");
        std::fs::write(&local, "pragma X;\n").unwrap();

        let config = LanguageConfig {
            config_file_switches: Some(SwitchTemplate::joined("-gnatec=")),
            local_config_file: Some(local),
            naming_body_pattern: Some("body_suffix %b".into()),
            ..Default::default()
        };
        let mut f = fixture(config, BuildOptions::default());
        let project = f.tree.source(f.source).project;
        let language = f.tree.source(f.source).language;

        let first =
            config_file_for(&mut f.tree, &f.opts, &mut f.ctx, project, language).unwrap().unwrap();
        let content = std::fs::read_to_string(&first).unwrap();
        assert!(content.starts_with("pragma X;\n"));
        assert!(content.contains("body_suffix"));

        let second =
            config_file_for(&mut f.tree, &f.opts, &mut f.ctx, project, language).unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn mapping_files_are_pooled() {
        let config = LanguageConfig {
            mapping_file_switches: Some(SwitchTemplate::joined("-map=")),
            ..Default::default()
        };
        let mut f = fixture(config, BuildOptions::default());
        let language = f.tree.source(f.source).language;

        let first = take_mapping_file(&mut f.tree, &mut f.ctx, language).unwrap().unwrap();
        return_mapping_file(&mut f.tree, language, first.clone());
        let second = take_mapping_file(&mut f.tree, &mut f.ctx, language).unwrap().unwrap();
        assert_eq!(first, second);
        // pool drained, a distinct file is created for a concurrent compile
        let third = take_mapping_file(&mut f.tree, &mut f.ctx, language).unwrap().unwrap();
        assert_ne!(first, third);
    }
}
