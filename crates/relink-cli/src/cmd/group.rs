//! `rl group`: show one group's members, edges and rollup.

use crate::output::{OutputMode, pretty_kv, pretty_rule, pretty_section, render_mode};
use crate::project::Project;
use anyhow::Result;
use clap::Args;
use relink_core::planner::PlanError;
use relink_core::{EngineError, GroupId, GroupSnapshot};
use std::io::{self, Write};

#[derive(Args, Debug)]
pub struct GroupArgs {
    /// Numeric group id.
    pub id: u64,
}

pub fn run_group(args: &GroupArgs, output: OutputMode, project: &Project) -> Result<()> {
    let engine = project.load_engine()?;
    let id = GroupId(args.id);
    let Some(snapshot) = engine.group_snapshot(id)? else {
        return Err(EngineError::from(PlanError::UnknownGroup(id)).into());
    };
    render_mode(output, &snapshot, render_text, render_pretty)
}

fn join<T: ToString>(items: impl IntoIterator<Item = T>) -> String {
    items
        .into_iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn render_text(snapshot: &GroupSnapshot, w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "edge\toriginal\treplacement\tstage\tgo_live")?;
    for edge in &snapshot.edges {
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}",
            edge.id,
            edge.original,
            edge.replacement_label(),
            edge.stage.as_str(),
            edge.go_live_date.map_or_else(|| "-".to_string(), |d| d.to_string()),
        )?;
    }
    Ok(())
}

fn render_pretty(snapshot: &GroupSnapshot, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("Group {}", snapshot.group_id))?;
    pretty_kv(w, "Members", join(&snapshot.members))?;
    pretty_kv(
        w,
        "Rollup",
        snapshot.stage_rollup.map_or("-", |s| s.label()),
    )?;
    let flags = if snapshot.conflict_flags.is_empty() {
        "clean".to_string()
    } else {
        join(&snapshot.conflict_flags)
    };
    pretty_kv(w, "Conflicts", flags)?;
    if !snapshot.pending.is_empty() {
        pretty_kv(
            w,
            "Pending",
            join(snapshot.pending.iter().map(|p| format!("{} -> {}", p.original, p.placeholder))),
        )?;
    }
    pretty_kv(w, "Hash", &snapshot.content_hash)?;
    writeln!(w)?;

    for edge in &snapshot.edges {
        writeln!(
            w,
            "{:<6} {} -> {}  [{}]",
            edge.id,
            edge.original,
            edge.replacement_label(),
            edge.stage.label(),
        )?;
    }
    pretty_rule(w)
}
