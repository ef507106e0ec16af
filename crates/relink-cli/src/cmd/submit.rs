//! `rl submit`: apply a batch of candidate edges.
//!
//! Input is a JSON array of rows:
//!
//! ```json
//! [{"original_id": "A", "replacement_id": "B"},
//!  {"original_id": "A", "replacement_id": "B", "requested_stage": "tracking_item_transition",
//!   "go_live_date": "2026-05-01"}]
//! ```

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use crate::project::Project;
use anyhow::{Context, Result};
use clap::Args;
use relink_core::error::ErrorCode;
use relink_core::{BatchReport, CandidateEdge, RowOutcome, RowReport};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// JSON file holding an array of candidate rows, or `-` for stdin.
    pub input: PathBuf,

    /// Apply in memory and report, but do not save the state file.
    #[arg(long)]
    pub dry_run: bool,
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut raw = String::new();
        io::stdin()
            .read_to_string(&mut raw)
            .context("Failed to read candidates from stdin")?;
        return Ok(raw);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

pub fn run_submit(args: &SubmitArgs, output: OutputMode, project: &Project) -> Result<()> {
    let raw = read_input(&args.input)?;
    let candidates: Vec<CandidateEdge> =
        serde_json::from_str(&raw).context("Candidate file must be a JSON array of rows")?;

    let engine = project.load_engine()?;
    let report = engine.submit_batch(&candidates)?;
    if args.dry_run {
        info!("dry run; state not saved");
    } else {
        project.save(&engine)?;
    }

    render_mode(output, &report, render_text, render_pretty)
}

fn outcome_detail(row: &RowReport) -> String {
    match &row.outcome {
        RowOutcome::AcceptedWithConflict { kind } => kind.to_string(),
        RowOutcome::RejectedStage { reason } => reason.to_string(),
        RowOutcome::RejectedInvalid { reason } => reason.clone(),
        _ => String::new(),
    }
}

fn render_text(report: &BatchReport, w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "row\toutcome\tcode\toriginal\treplacement\tgroup\tstage\tdetail")?;
    for row in &report.rows {
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            row.index,
            row.outcome.as_str(),
            row.outcome.code().map_or("-", ErrorCode::code),
            row.original_id,
            row.replacement_id.as_deref().unwrap_or("-"),
            row.group_id.map_or_else(|| "-".to_string(), |g| g.to_string()),
            row.stage.map_or("-", |s| s.as_str()),
            outcome_detail(row),
        )?;
    }
    Ok(())
}

fn render_pretty(report: &BatchReport, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Batch report")?;
    for row in &report.rows {
        let mark = if row.outcome.is_accepted() { "✓" } else { "✗" };
        write!(
            w,
            "{mark} #{:<4} {} -> {}  {}",
            row.index,
            row.original_id,
            row.replacement_id.as_deref().unwrap_or("(none)"),
            row.outcome.as_str(),
        )?;
        if let Some(code) = row.outcome.code() {
            write!(w, " [{code}]")?;
        }
        let detail = outcome_detail(row);
        if !detail.is_empty() {
            write!(w, " ({detail})")?;
        }
        if let Some(group) = row.group_id {
            write!(w, "  group {group}")?;
        }
        writeln!(w)?;
    }
    writeln!(w)?;
    pretty_kv(w, "Accepted", report.accepted().to_string())?;
    pretty_kv(w, "Rejected", report.rejected().to_string())?;
    pretty_kv(w, "Conflicts", report.conflicts().to_string())?;
    pretty_kv(w, "Store deltas", report.deltas.len().to_string())?;
    pretty_kv(w, "Refreshes", report.triggers.len().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relink_core::{BatchCoordinator, EngineConfig};

    fn report() -> BatchReport {
        let mut c = BatchCoordinator::new(EngineConfig::default());
        c.submit_batch(&[
            CandidateEdge::new("A", "B"),
            CandidateEdge::new("A", "A"),
            CandidateEdge::new("B", "C"),
        ])
        .expect("batch")
    }

    #[test]
    fn text_has_one_line_per_row_plus_header() {
        let mut buf = Vec::new();
        render_text(&report(), &mut buf).expect("render");
        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[2].contains("rejected_self_loop\tE3001"));
        assert!(lines[1].contains("accepted\t-"));
        assert!(lines[3].ends_with("chain"));
    }

    #[test]
    fn pretty_includes_summary() {
        let mut buf = Vec::new();
        render_pretty(&report(), &mut buf).expect("render");
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.contains("Accepted:"));
        assert!(text.contains("Conflicts:"));
    }
}
