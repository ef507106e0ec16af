use crate::project::{PROJECT_DIR, Project};
use anyhow::{Context as _, Result};
use clap::Args;
use relink_core::snapshot::EngineSnapshot;
use std::path::Path;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Reinitialize even if `.relink/` already exists. Existing state is reset.
    #[arg(long)]
    pub force: bool,
}

const CONFIG_TOML: &str = "[engine]\n\
    max_batch_size = 250\n\
    lease_timeout_ms = 5000\n\
    pending_prefix = \"PENDING***\"\n\
    discontinue_sentinels = [\"NO REPLACEMENT\"]\n\
    default_stage = \"pending_clinical_readiness\"\n\
    go_live_past_months = 3\n\
    go_live_future_months = 6\n";

const GITIGNORE: &str = "state.json.tmp\n";

/// Execute `rl init`. Creates the project skeleton:
///
/// ```text
/// .relink/
///   config.toml   (engine defaults, editable)
///   state.json    (empty engine snapshot)
///   .gitignore
/// ```
///
/// # Errors
///
/// Returns an error if `.relink/` already exists and `--force` is not set,
/// or if any filesystem operation fails.
pub fn run_init(args: &InitArgs, project_root: &Path, state_override: Option<&Path>) -> Result<()> {
    let dir = project_root.join(PROJECT_DIR);
    if dir.exists() && !args.force {
        anyhow::bail!("{PROJECT_DIR}/ already exists. Use `rl init --force` to reinitialize.");
    }

    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let config_path = dir.join("config.toml");
    std::fs::write(&config_path, CONFIG_TOML)
        .with_context(|| format!("Failed to write config: {}", config_path.display()))?;

    let gitignore_path = dir.join(".gitignore");
    std::fs::write(&gitignore_path, GITIGNORE)
        .with_context(|| format!("Failed to write .gitignore: {}", gitignore_path.display()))?;

    let project = Project::open(project_root, state_override.map(Path::to_path_buf), false)?;
    project.save_snapshot(&EngineSnapshot::default())?;

    println!("✓ Initialized {PROJECT_DIR}/ project structure.");
    println!();
    println!("  Config: {PROJECT_DIR}/config.toml");
    println!("  State:  {}", project.state_path.display());
    println!();
    println!("Next steps:");
    println!("  rl submit candidates.json");

    Ok(())
}
