//! `rl conflicts`: query the conflict log.

use crate::output::{OutputMode, pretty_section, render_mode};
use crate::project::Project;
use anyhow::{Context as _, Result, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Args;
use relink_core::conflicts::{ConflictFilter, ConflictRecord};
use relink_core::{ConflictKind, EntityId, GroupId};
use std::io::{self, Write};

#[derive(Args, Debug, Default)]
pub struct ConflictsArgs {
    /// Only conflicts recorded against this group.
    #[arg(long)]
    pub group: Option<u64>,

    /// Only conflicts involving this entity (on either end).
    #[arg(long)]
    pub entity: Option<String>,

    /// Only this kind: chain, many_to_many, reciprocal, self_loop.
    #[arg(long, value_parser = parse_kind)]
    pub kind: Option<ConflictKind>,

    /// Only conflicts detected at or after this time (RFC 3339 or YYYY-MM-DD).
    #[arg(long, value_parser = parse_since)]
    pub since: Option<DateTime<Utc>>,
}

fn parse_kind(raw: &str) -> Result<ConflictKind, String> {
    raw.parse()
}

fn parse_since(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("'{raw}' is neither RFC 3339 nor YYYY-MM-DD"))?;
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| anyhow!("'{raw}' has no midnight"))
}

impl ConflictsArgs {
    fn filter(&self) -> Result<ConflictFilter> {
        let entity = self
            .entity
            .as_deref()
            .map(EntityId::new)
            .transpose()
            .context("--entity must not be blank")?;
        Ok(ConflictFilter {
            group_id: self.group.map(GroupId),
            entity,
            kind: self.kind,
            since: self.since,
        })
    }
}

pub fn run_conflicts(args: &ConflictsArgs, output: OutputMode, project: &Project) -> Result<()> {
    let filter = args.filter()?;
    let engine = project.load_engine()?;
    let records = engine.list_conflicts(&filter)?;
    render_mode(output, &records, render_text, render_pretty)
}

fn render_text(records: &Vec<ConflictRecord>, w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "id\tkind\tgroup\tentity\tcounterpart\tout\tin\tdetected_at")?;
    for r in records {
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            r.record_id,
            r.conflict_kind,
            r.group_id.map_or_else(|| "-".to_string(), |g| g.to_string()),
            r.entity,
            r.counterpart.as_ref().map_or("-", EntityId::as_str),
            r.degree_out,
            r.degree_in,
            r.detected_at.to_rfc3339(),
        )?;
    }
    Ok(())
}

fn render_pretty(records: &Vec<ConflictRecord>, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("Conflicts ({})", records.len()))?;
    if records.is_empty() {
        return writeln!(w, "No conflicts recorded.");
    }
    for r in records {
        let group = r
            .group_id
            .map_or_else(|| "unassigned".to_string(), |g| format!("group {g}"));
        writeln!(
            w,
            "#{:<4} {:<13} {:<11} {}  {}",
            r.record_id,
            r.conflict_kind,
            group,
            r.detected_at.format("%Y-%m-%d %H:%M"),
            r.detail,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn since_accepts_plain_dates() {
        let parsed = parse_since("2026-03-01").expect("date");
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).single().expect("ts"));
    }

    #[test]
    fn since_accepts_rfc3339() {
        let parsed = parse_since("2026-03-01T12:30:00+02:00").expect("rfc3339");
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 3, 1, 10, 30, 0).single().expect("ts"));
    }

    #[test]
    fn since_rejects_garbage() {
        assert!(parse_since("last tuesday").is_err());
    }

    #[test]
    fn filter_maps_every_flag() {
        let args = ConflictsArgs {
            group: Some(3),
            entity: Some(" A ".to_string()),
            kind: Some(ConflictKind::Chain),
            since: None,
        };
        let filter = args.filter().expect("filter");
        assert_eq!(filter.group_id, Some(GroupId(3)));
        assert_eq!(filter.entity.as_ref().map(EntityId::as_str), Some("A"));
        assert_eq!(filter.kind, Some(ConflictKind::Chain));
    }

    #[test]
    fn blank_entity_is_rejected() {
        let args = ConflictsArgs {
            entity: Some("  ".to_string()),
            ..ConflictsArgs::default()
        };
        assert!(args.filter().is_err());
    }
}
