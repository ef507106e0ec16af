use crate::output::{OutputMode, pretty_kv, render_mode};
use crate::project::Project;
use anyhow::{Context as _, Result};
use clap::Args;
use relink_core::{EntityId, EntitySide};
use serde::Serialize;
use std::io::{self, Write};

#[derive(Args, Debug)]
pub struct SideArgs {
    /// Entity identifier to look up.
    pub entity: String,
}

#[derive(Debug, Serialize)]
struct SideView {
    entity: EntityId,
    side: EntitySide,
}

/// Execute `rl side <entity>`: report where the entity appears across live edges.
pub fn run_side(args: &SideArgs, output: OutputMode, project: &Project) -> Result<()> {
    let entity = EntityId::new(&args.entity).context("entity id must not be blank")?;
    let engine = project.load_engine()?;
    let side = engine.entity_side(&entity)?;
    render_mode(
        output,
        &SideView { entity, side },
        |v, w: &mut dyn Write| -> io::Result<()> { writeln!(w, "{}\t{}", v.entity, v.side) },
        |v, w: &mut dyn Write| -> io::Result<()> {
            pretty_kv(w, "Entity", v.entity.as_str())?;
            pretty_kv(w, "Side", v.side.to_string())
        },
    )
}
