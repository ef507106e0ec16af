use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use crate::project::Project;
use anyhow::{Context as _, Result};
use clap::Args;
use relink_core::{EntityId, GroupId, SplitReport};
use std::io::{self, Write};

#[derive(Args, Debug)]
pub struct SplitArgs {
    /// Group to split.
    pub group: u64,

    /// Members to move into the new group. Every edge touching them must
    /// stay inside the moved set.
    #[arg(required = true, num_args = 1..)]
    pub members: Vec<String>,
}

/// Execute `rl split`.
///
/// # Errors
///
/// Fails with `E3005` when a named entity is not in the group and `E3003`
/// when an edge would end up spanning both groups.
pub fn run_split(args: &SplitArgs, output: OutputMode, project: &Project) -> Result<()> {
    let members = args
        .members
        .iter()
        .map(|m| EntityId::new(m))
        .collect::<Result<Vec<_>, _>>()
        .context("member ids must not be blank")?;

    let engine = project.load_engine()?;
    let report = engine.split_group(GroupId(args.group), &members)?;
    project.save(&engine)?;

    render_mode(output, &report, render_text, render_pretty)
}

fn render_text(report: &SplitReport, w: &mut dyn Write) -> io::Result<()> {
    for member in &report.moved_members {
        writeln!(w, "{}\t{}\t{}", member, report.source, report.target)?;
    }
    Ok(())
}

fn render_pretty(report: &SplitReport, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("Split group {}", report.source))?;
    pretty_kv(w, "New group", report.target.to_string())?;
    pretty_kv(
        w,
        "Moved",
        report
            .moved_members
            .iter()
            .map(EntityId::as_str)
            .collect::<Vec<_>>()
            .join(","),
    )?;
    pretty_kv(w, "Edges moved", report.deltas.len().to_string())
}
