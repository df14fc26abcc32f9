//! Human-facing output of the compile phase.
//!
//! Everything here writes plain lines to stdout/stderr; structured tracing
//! stays in the modules doing the work. Output is deliberately sparse: a
//! one-time section header, one line per spawned compile, optional progress
//! counters and a colored failure summary at the end.

use crate::{
    compile::CompileOutcome,
    deps::ImportVerdict,
    project::{ProjectTree, Source, SourceId},
    BuildOptions, DriverContext, Verbosity,
};
use yansi::Paint;

/// Announces one spawned compile, preceded by the section header on first
/// use.
pub(crate) fn compiling(
    ctx: &mut DriverContext,
    opts: &BuildOptions,
    language: &str,
    source: &Source,
) {
    if opts.verbosity == Verbosity::Quiet {
        return;
    }
    if !ctx.section_displayed {
        ctx.section_displayed = true;
        println!("Compile");
    }
    println!("   [{language}] {}", source.display_name);
}

/// Progress counter, printed after each completed compilation.
pub(crate) fn progress(completed: usize, total: usize) {
    if total == 0 {
        return;
    }
    let percent = completed * 100 / total;
    println!("completed {completed} out of {total} ({percent}%)...");
}

/// Diagnoses one import-legality violation.
pub(crate) fn import_violation(
    tree: &ProjectTree,
    source: SourceId,
    dep: SourceId,
    verdict: ImportVerdict,
) {
    let src = tree.source(source);
    let dep_src = tree.source(dep);
    let dep_project = &tree.project(dep_src.project).name;
    let complaint = match verdict {
        ImportVerdict::HiddenInterface => {
            format!("\"{}\" is not in the interface of project \"{dep_project}\"", dep_src.display_name)
        }
        _ => format!(
            "\"{}\" belongs to project \"{dep_project}\", which is not imported by project \"{}\"",
            dep_src.display_name,
            tree.project(src.project).name
        ),
    };
    eprintln!("{}: {}: {complaint}", Paint::red("error"), src.display_name);
}

/// Final failure summary, one line per failed source.
pub(crate) fn failure_summary(outcome: &CompileOutcome) {
    if !outcome.has_failures() {
        return;
    }
    eprintln!("{}", Paint::red("   compilation of the following sources failed").bold());
    for failed in &outcome.bad_compilations {
        eprintln!("      {} ({}): {}", failed.file, failed.project, failed.reason);
    }
}
