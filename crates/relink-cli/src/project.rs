//! Project directory layout and state persistence for the CLI.
//!
//! The CLI keeps engine state in a JSON snapshot under `.relink/`. Every
//! command hydrates an [`Engine`] from it; writing commands save it back
//! through a temp file and rename.

use anyhow::{Context, Result};
use relink_core::batch::NullSink;
use relink_core::clock::SystemClock;
use relink_core::config::{EffectiveConfig, resolve_config};
use relink_core::snapshot::EngineSnapshot;
use relink_core::Engine;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const PROJECT_DIR: &str = ".relink";
pub const STATE_FILE: &str = "state.json";

#[derive(Debug)]
pub struct Project {
    pub root: PathBuf,
    pub state_path: PathBuf,
    pub config: EffectiveConfig,
}

impl Project {
    /// Resolve config for `root` and locate the state file.
    pub fn open(root: &Path, state_override: Option<PathBuf>, cli_json: bool) -> Result<Self> {
        let config = resolve_config(root, cli_json)?;
        let state_path = state_override.unwrap_or_else(|| root.join(PROJECT_DIR).join(STATE_FILE));
        Ok(Self {
            root: root.to_path_buf(),
            state_path,
            config,
        })
    }

    /// Read the snapshot, or an empty one if no state has been written yet.
    pub fn load_snapshot(&self) -> Result<EngineSnapshot> {
        if !self.state_path.exists() {
            debug!(path = %self.state_path.display(), "no state file; starting empty");
            return Ok(EngineSnapshot::default());
        }
        let raw = fs::read_to_string(&self.state_path)
            .with_context(|| format!("Failed to read {}", self.state_path.display()))?;
        EngineSnapshot::from_json(&raw)
            .with_context(|| format!("Failed to load state from {}", self.state_path.display()))
    }

    pub fn load_engine(&self) -> Result<Engine> {
        let snapshot = self.load_snapshot()?;
        let engine = Engine::hydrate(
            self.config.engine.clone(),
            snapshot,
            Arc::new(SystemClock),
            Arc::new(NullSink),
        )?;
        Ok(engine)
    }

    pub fn save(&self, engine: &Engine) -> Result<()> {
        self.save_snapshot(&engine.snapshot()?)
    }

    pub fn save_snapshot(&self, snapshot: &EngineSnapshot) -> Result<()> {
        if let Some(parent) = self.state_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = snapshot.to_json_pretty()?;
        let tmp = self.state_path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.state_path)
            .with_context(|| format!("Failed to replace {}", self.state_path.display()))?;
        info!(
            path = %self.state_path.display(),
            edges = snapshot.edges.len(),
            groups = snapshot.groups.len(),
            "state saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relink_core::CandidateEdge;
    use tempfile::TempDir;

    #[test]
    fn missing_state_loads_empty() {
        let dir = TempDir::new().expect("tempdir");
        let project = Project::open(dir.path(), None, true).expect("open");
        let snapshot = project.load_snapshot().expect("load");
        assert!(snapshot.edges.is_empty());
        assert_eq!(project.state_path, dir.path().join(".relink/state.json"));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().expect("tempdir");
        let project = Project::open(dir.path(), None, true).expect("open");
        let engine = project.load_engine().expect("engine");
        engine
            .submit_batch(&[CandidateEdge::new("A", "B")])
            .expect("batch");
        project.save(&engine).expect("save");

        let reloaded = project.load_snapshot().expect("reload");
        assert_eq!(reloaded.edges.len(), 1);
        assert_eq!(reloaded.groups.len(), 1);
    }
}
