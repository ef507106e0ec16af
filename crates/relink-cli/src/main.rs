#![forbid(unsafe_code)]

mod cmd;
mod output;
mod project;

use clap::{Parser, Subcommand};
use output::{CliError, OutputMode, render_error, resolve_output_mode};
use project::Project;
use relink_core::EngineError;
use relink_core::config::ConfigFileError;
use relink_core::snapshot::SnapshotError;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "rl: keep original -> replacement relationships consistent",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Output format. Overrides `--json` and the configured default.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// State file to use instead of `.relink/state.json`.
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Lifecycle",
        about = "Initialize a relink project",
        after_help = "EXAMPLES:\n    # Initialize in the current directory\n    rl init\n\n    # Reset an existing project\n    rl init --force"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        next_help_heading = "Write",
        about = "Submit a batch of candidate edges",
        long_about = "Apply a JSON array of candidate rows. Each row is accepted or rejected on its own.",
        after_help = "EXAMPLES:\n    # Submit from a file\n    rl submit candidates.json\n\n    # Read from stdin and report as JSON\n    cat rows.json | rl submit - --json"
    )]
    Submit(cmd::submit::SubmitArgs),

    #[command(
        next_help_heading = "Write",
        about = "Split members out of a group into a new group",
        after_help = "EXAMPLES:\n    # Move A and B out of group 3\n    rl split 3 A B"
    )]
    Split(cmd::split::SplitArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show one group",
        after_help = "EXAMPLES:\n    rl group 1\n    rl group 1 --format text"
    )]
    Group(cmd::group::GroupArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show which side of its edges an entity occupies"
    )]
    Side(cmd::side::SideArgs),

    #[command(
        next_help_heading = "Read",
        about = "List recorded structural conflicts",
        after_help = "EXAMPLES:\n    # Every chain conflict since March\n    rl conflicts --kind chain --since 2026-03-01\n\n    # Everything touching one entity\n    rl conflicts --entity A10001 --json"
    )]
    Conflicts(cmd::conflicts::ConflictsArgs),

    #[command(next_help_heading = "Read", about = "List lifecycle stages and allowed moves")]
    Stages(cmd::stages::StagesArgs),

    #[command(next_help_heading = "Read", about = "Show effective configuration")]
    Config(cmd::config::ConfigArgs),
}

/// Filter used when `RELINK_LOG` is unset.
const fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "rl=debug,relink_core=debug,info"
    } else {
        "rl=info,relink_core=info,warn"
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("RELINK_LOG").unwrap_or_else(|_| {
        EnvFilter::new(default_filter(verbose || env::var("DEBUG").is_ok()))
    });

    let format = env::var("RELINK_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

/// Turn a command failure into a [`CliError`], keeping error codes.
fn to_cli_error(err: &anyhow::Error) -> CliError {
    if let Some(engine) = err.downcast_ref::<EngineError>() {
        return CliError::from_code(engine.to_string(), engine.code());
    }
    if let Some(snapshot) = err.downcast_ref::<SnapshotError>() {
        return CliError::from_code(format!("{err:#}"), snapshot.code());
    }
    if let Some(config) = err.downcast_ref::<ConfigFileError>() {
        return CliError::from_code(format!("{err:#}"), config.code());
    }
    CliError::new(format!("{err:#}"))
}

fn run(cli: &Cli, output: OutputMode, project_root: &std::path::Path) -> anyhow::Result<()> {
    if let Commands::Init(args) = &cli.command {
        return cmd::init::run_init(args, project_root, cli.state.as_deref());
    }
    if let Commands::Stages(args) = &cli.command {
        return cmd::stages::run_stages(args, output);
    }

    let project = Project::open(project_root, cli.state.clone(), cli.json)?;
    debug!(state = %project.state_path.display(), "project opened");

    match &cli.command {
        Commands::Submit(args) => cmd::submit::run_submit(args, output, &project),
        Commands::Split(args) => cmd::split::run_split(args, output, &project),
        Commands::Group(args) => cmd::group::run_group(args, output, &project),
        Commands::Side(args) => cmd::side::run_side(args, output, &project),
        Commands::Conflicts(args) => cmd::conflicts::run_conflicts(args, output, &project),
        Commands::Config(args) => cmd::config::run_config(args, output, &project),
        Commands::Init(_) | Commands::Stages(_) => Ok(()),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let project_root = match env::current_dir() {
        Ok(dir) => dir,
        Err(err) => {
            eprintln!("error: cannot read current directory: {err}");
            return ExitCode::FAILURE;
        }
    };

    // Output mode needs the config-resolved default; fall back to the flags
    // alone if config itself is broken so the error still renders.
    let resolved = relink_core::config::resolve_config(&project_root, cli.json)
        .map_or_else(|_| "text".to_string(), |c| c.resolved_output);
    let output = resolve_output_mode(cli.format, cli.json, &resolved);

    match run(&cli, output, &project_root) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let cli_err = to_cli_error(&err);
            if render_error(output, &cli_err).is_err() {
                eprintln!("error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relink_core::GroupId;
    use relink_core::lease::{LeaseError, LeaseKey};
    use std::time::Duration;

    #[test]
    fn json_flag_parses_after_subcommand() {
        let cli = Cli::parse_from(["rl", "stages", "--json"]);
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Stages(_)));
    }

    #[test]
    fn format_flag_is_global() {
        let cli = Cli::parse_from(["rl", "group", "4", "--format", "text"]);
        assert_eq!(cli.format, Some(OutputMode::Text));
        assert!(matches!(cli.command, Commands::Group(ref g) if g.id == 4));
    }

    #[test]
    fn state_override_parses() {
        let cli = Cli::parse_from(["rl", "--state", "/tmp/s.json", "side", "A"]);
        assert_eq!(cli.state, Some(PathBuf::from("/tmp/s.json")));
    }

    #[test]
    fn submit_parses_dry_run() {
        let cli = Cli::parse_from(["rl", "submit", "-", "--dry-run"]);
        match cli.command {
            Commands::Submit(args) => {
                assert!(args.dry_run);
                assert_eq!(args.input, PathBuf::from("-"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn split_requires_members() {
        assert!(Cli::try_parse_from(["rl", "split", "3"]).is_err());
        let cli = Cli::parse_from(["rl", "split", "3", "A", "B"]);
        assert!(matches!(cli.command, Commands::Split(ref s) if s.members.len() == 2));
    }

    #[test]
    fn conflicts_kind_is_validated() {
        assert!(Cli::try_parse_from(["rl", "conflicts", "--kind", "bogus"]).is_err());
        let cli = Cli::parse_from(["rl", "conflicts", "--kind", "many_to_many"]);
        assert!(matches!(cli.command, Commands::Conflicts(ref c) if c.kind.is_some()));
    }

    #[test]
    fn engine_errors_keep_their_code() {
        let err = anyhow::Error::from(EngineError::from(LeaseError::Timeout {
            contended: LeaseKey::Group(GroupId(1)),
            waited: Duration::from_millis(5),
        }));
        let cli_err = to_cli_error(&err);
        assert_eq!(cli_err.error_code.as_deref(), Some("E5001"));
    }

    #[test]
    fn verbose_raises_default_filter() {
        let cli = Cli::parse_from(["rl", "-v", "stages"]);
        assert!(cli.verbose);
        assert!(default_filter(cli.verbose).starts_with("rl=debug"));
        assert!(default_filter(false).starts_with("rl=info"));
    }

    #[test]
    fn snapshot_errors_keep_their_code_through_context() {
        let err = anyhow::Error::from(SnapshotError::EmptyGroup(GroupId(3)))
            .context("Failed to load state from .relink/state.json");
        let cli_err = to_cli_error(&err);
        assert_eq!(cli_err.error_code.as_deref(), Some("E1002"));
        assert!(cli_err.message.contains("group 3"));
    }

    #[test]
    fn other_errors_have_no_code() {
        let cli_err = to_cli_error(&anyhow::anyhow!("disk full"));
        assert!(cli_err.error_code.is_none());
        assert_eq!(cli_err.message, "disk full");
    }
}
