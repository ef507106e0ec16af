use crate::output::{OutputMode, pretty_section, render_mode};
use anyhow::Result;
use clap::Args;
use relink_core::Stage;
use relink_core::transition::StageTransitionHelper;
use serde::Serialize;
use std::io::{self, Write};

#[derive(Args, Debug)]
pub struct StagesArgs {}

#[derive(Debug, Serialize)]
struct StageRow {
    stage: Stage,
    rank: u8,
    label: &'static str,
    terminal: bool,
    requires_go_live: bool,
    next: Vec<Stage>,
}

fn catalog() -> Vec<StageRow> {
    Stage::ALL
        .into_iter()
        .map(|stage| StageRow {
            stage,
            rank: stage.rank(),
            label: stage.label(),
            terminal: stage.is_terminal(),
            requires_go_live: stage.requires_go_live(),
            next: StageTransitionHelper::allowed_targets(stage),
        })
        .collect()
}

fn join(stages: &[Stage]) -> String {
    if stages.is_empty() {
        return "-".to_string();
    }
    stages.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(",")
}

/// Execute `rl stages`: print the lifecycle and its one-step moves.
pub fn run_stages(_args: &StagesArgs, output: OutputMode) -> Result<()> {
    render_mode(output, &catalog(), render_text, render_pretty)
}

fn render_text(rows: &Vec<StageRow>, w: &mut dyn Write) -> io::Result<()> {
    for row in rows {
        writeln!(
            w,
            "{}\t{}\t{}\t{}",
            row.rank,
            row.stage,
            row.terminal,
            join(&row.next)
        )?;
    }
    Ok(())
}

fn render_pretty(rows: &Vec<StageRow>, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Stage lifecycle")?;
    for row in rows {
        let mut notes = Vec::new();
        if row.terminal {
            notes.push("terminal");
        }
        if row.requires_go_live {
            notes.push("needs go-live date");
        }
        writeln!(w, "{} {:<28} -> {}", row.rank, row.label, join(&row.next))?;
        if !notes.is_empty() {
            writeln!(w, "  {:<28}    ({})", "", notes.join(", "))?;
        }
    }
    Ok(())
}
