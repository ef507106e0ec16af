use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use crate::project::Project;
use anyhow::Result;
use clap::Args;
use relink_core::config::{ConfigLayer, EffectiveConfig, load_project_config};
use std::io::{self, Write};

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Show only the values set in `.relink/config.toml`.
    #[arg(long)]
    pub project: bool,
}

pub fn run_config(args: &ConfigArgs, output: OutputMode, project: &Project) -> Result<()> {
    if args.project {
        let layer = load_project_config(&project.root)?.engine;
        return render_mode(output, &layer, render_layer_text, render_layer_pretty);
    }
    render_mode(output, &project.config, render_text, render_pretty)
}

fn effective_rows(config: &EffectiveConfig) -> Vec<(&'static str, String)> {
    let engine = &config.engine;
    vec![
        ("max_batch_size", engine.max_batch_size.to_string()),
        ("lease_timeout_ms", engine.lease_timeout_ms.to_string()),
        ("pending_prefix", engine.pending_prefix.clone()),
        ("discontinue_sentinels", engine.discontinue_sentinels.join(",")),
        ("default_stage", engine.default_stage.to_string()),
        ("go_live_past_months", engine.go_live_past_months.to_string()),
        ("go_live_future_months", engine.go_live_future_months.to_string()),
        ("output", config.resolved_output.clone()),
    ]
}

fn layer_rows(layer: &ConfigLayer) -> Vec<(&'static str, String)> {
    fn opt<T: ToString>(v: Option<&T>) -> Option<String> {
        v.map(ToString::to_string)
    }
    [
        ("max_batch_size", opt(layer.max_batch_size.as_ref())),
        ("lease_timeout_ms", opt(layer.lease_timeout_ms.as_ref())),
        ("pending_prefix", layer.pending_prefix.clone()),
        ("discontinue_sentinels", layer.discontinue_sentinels.as_ref().map(|s| s.join(","))),
        ("default_stage", opt(layer.default_stage.as_ref())),
        ("go_live_past_months", opt(layer.go_live_past_months.as_ref())),
        ("go_live_future_months", opt(layer.go_live_future_months.as_ref())),
    ]
    .into_iter()
    .filter_map(|(k, v)| v.map(|v| (k, v)))
    .collect()
}

fn write_tsv(rows: &[(&str, String)], w: &mut dyn Write) -> io::Result<()> {
    for (key, value) in rows {
        writeln!(w, "{key}\t{value}")?;
    }
    Ok(())
}

fn render_text(config: &EffectiveConfig, w: &mut dyn Write) -> io::Result<()> {
    write_tsv(&effective_rows(config), w)
}

fn render_pretty(config: &EffectiveConfig, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Effective configuration")?;
    for (key, value) in effective_rows(config) {
        pretty_kv(w, key, value)?;
    }
    Ok(())
}

fn render_layer_text(layer: &ConfigLayer, w: &mut dyn Write) -> io::Result<()> {
    write_tsv(&layer_rows(layer), w)
}

fn render_layer_pretty(layer: &ConfigLayer, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Project configuration")?;
    let rows = layer_rows(layer);
    if rows.is_empty() {
        return writeln!(w, "(no overrides)");
    }
    for (key, value) in rows {
        pretty_kv(w, key, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_rows_only_list_set_keys() {
        let layer = ConfigLayer {
            max_batch_size: Some(10),
            ..ConfigLayer::default()
        };
        let rows = layer_rows(&layer);
        assert_eq!(rows, vec![("max_batch_size", "10".to_string())]);
    }

    #[test]
    fn effective_rows_cover_every_engine_key() {
        let config = EffectiveConfig {
            engine: relink_core::EngineConfig::default(),
            resolved_output: "text".to_string(),
        };
        let rows = effective_rows(&config);
        assert_eq!(rows.len(), 8);
        assert!(rows.contains(&("pending_prefix", "PENDING***".to_string())));
    }
}
