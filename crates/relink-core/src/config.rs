use anyhow::{Context, Result};
use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::env;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use crate::error::ErrorCode;
use crate::model::Stage;

/// Environment variable that overrides `max_batch_size`.
pub const MAX_BATCH_ENV: &str = "RELINK_MAX_BATCH";

/// Tunables for the batch engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_lease_timeout_ms")]
    pub lease_timeout_ms: u64,
    #[serde(default = "default_pending_prefix")]
    pub pending_prefix: String,
    #[serde(default = "default_discontinue_sentinels")]
    pub discontinue_sentinels: Vec<String>,
    #[serde(default = "default_stage")]
    pub default_stage: Stage,
    #[serde(default = "default_go_live_past_months")]
    pub go_live_past_months: u32,
    #[serde(default = "default_go_live_future_months")]
    pub go_live_future_months: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            lease_timeout_ms: default_lease_timeout_ms(),
            pending_prefix: default_pending_prefix(),
            discontinue_sentinels: default_discontinue_sentinels(),
            default_stage: default_stage(),
            go_live_past_months: default_go_live_past_months(),
            go_live_future_months: default_go_live_future_months(),
        }
    }
}

impl EngineConfig {
    /// `true` if `raw` names a pending placeholder. The prefix matches
    /// without regard to ASCII case.
    #[must_use]
    pub fn is_placeholder(&self, raw: &str) -> bool {
        let prefix = self.pending_prefix.as_str();
        !prefix.is_empty()
            && raw
                .trim()
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    }

    /// `true` if `raw` is empty or one of the "no replacement" sentinels.
    #[must_use]
    pub fn is_discontinue_sentinel(&self, raw: &str) -> bool {
        let raw = raw.trim();
        raw.is_empty()
            || self
                .discontinue_sentinels
                .iter()
                .any(|s| s.eq_ignore_ascii_case(raw))
    }

    /// Inclusive range of acceptable go-live dates relative to `today`.
    #[must_use]
    pub fn go_live_window(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let earliest = today
            .checked_sub_months(Months::new(self.go_live_past_months))
            .unwrap_or(NaiveDate::MIN);
        let latest = today
            .checked_add_months(Months::new(self.go_live_future_months))
            .unwrap_or(NaiveDate::MAX);
        (earliest, latest)
    }

    /// Overlay every field `layer` sets.
    #[must_use]
    pub fn layered(mut self, layer: &ConfigLayer) -> Self {
        if let Some(v) = layer.max_batch_size {
            self.max_batch_size = v;
        }
        if let Some(v) = layer.lease_timeout_ms {
            self.lease_timeout_ms = v;
        }
        if let Some(v) = &layer.pending_prefix {
            self.pending_prefix.clone_from(v);
        }
        if let Some(v) = &layer.discontinue_sentinels {
            self.discontinue_sentinels.clone_from(v);
        }
        if let Some(v) = layer.default_stage {
            self.default_stage = v;
        }
        if let Some(v) = layer.go_live_past_months {
            self.go_live_past_months = v;
        }
        if let Some(v) = layer.go_live_future_months {
            self.go_live_future_months = v;
        }
        self
    }

    /// Apply the `RELINK_MAX_BATCH` override if set.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a positive integer.
    pub fn with_env_override(mut self, value: Option<String>) -> Result<Self> {
        if let Some(raw) = value {
            let parsed: usize = raw
                .trim()
                .parse()
                .with_context(|| format!("{MAX_BATCH_ENV}={raw} is not a valid batch size"))?;
            anyhow::ensure!(parsed > 0, "{MAX_BATCH_ENV} must be at least 1");
            self.max_batch_size = parsed;
        }
        Ok(self)
    }
}

/// Partial engine settings from one config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigLayer {
    #[serde(default)]
    pub max_batch_size: Option<usize>,
    #[serde(default)]
    pub lease_timeout_ms: Option<u64>,
    #[serde(default)]
    pub pending_prefix: Option<String>,
    #[serde(default)]
    pub discontinue_sentinels: Option<Vec<String>>,
    #[serde(default)]
    pub default_stage: Option<Stage>,
    #[serde(default)]
    pub go_live_past_months: Option<u32>,
    #[serde(default)]
    pub go_live_future_months: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub engine: ConfigLayer,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub engine: ConfigLayer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub engine: EngineConfig,
    pub resolved_output: String,
}

/// A config file exists but is not valid TOML for its schema.
#[derive(Debug, thiserror::Error)]
#[error("Failed to parse {}", path.display())]
pub struct ConfigFileError {
    pub path: PathBuf,
    #[source]
    pub source: toml::de::Error,
}

impl ConfigFileError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::ConfigParseError
    }
}

fn parse_file<T: serde::de::DeserializeOwned>(path: &Path, content: &str) -> Result<T> {
    toml::from_str::<T>(content).map_err(|source| {
        ConfigFileError {
            path: path.to_path_buf(),
            source,
        }
        .into()
    })
}

pub fn load_project_config(project_root: &Path) -> Result<ProjectConfig> {
    let path = project_root.join(".relink/config.toml");
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    parse_file(&path, &content)
}

pub fn load_user_config() -> Result<UserConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(UserConfig::default());
    };

    let path = config_dir.join("relink/config.toml");
    if !path.exists() {
        return Ok(UserConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    parse_file(&path, &content)
}

/// Defaults, then user config, then project config, then environment.
pub fn resolve_config(project_root: &Path, cli_json: bool) -> Result<EffectiveConfig> {
    let project = load_project_config(project_root)?;
    let user = load_user_config()?;

    let engine = EngineConfig::default()
        .layered(&user.engine)
        .layered(&project.engine)
        .with_env_override(env::var(MAX_BATCH_ENV).ok())?;

    let env_format = env::var("FORMAT").ok();
    let resolved_output = resolve_output(cli_json, user.output, env_format);

    Ok(EffectiveConfig {
        engine,
        resolved_output,
    })
}

fn resolve_output(cli_json: bool, user_output: Option<String>, env_format: Option<String>) -> String {
    fn normalize_output_mode(raw: &str) -> Option<&'static str> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some("pretty"),
            "text" => Some("text"),
            "json" => Some("json"),
            _ => None,
        }
    }

    if cli_json {
        return "json".to_string();
    }

    if let Some(mode) = env_format.as_deref().and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if let Some(mode) = user_output.as_deref().and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if std::io::stdout().is_terminal() {
        "pretty".to_string()
    } else {
        "text".to_string()
    }
}

const fn default_max_batch_size() -> usize {
    250
}

const fn default_lease_timeout_ms() -> u64 {
    5_000
}

fn default_pending_prefix() -> String {
    "PENDING***".to_string()
}

fn default_discontinue_sentinels() -> Vec<String> {
    vec!["NO REPLACEMENT".to_string()]
}

const fn default_stage() -> Stage {
    Stage::PendingClinicalReadiness
}

const fn default_go_live_past_months() -> u32 {
    3
}

const fn default_go_live_future_months() -> u32 {
    6
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_project_config_uses_defaults() {
        let root = tempfile::tempdir().expect("temp dir must be created");
        let cfg = load_project_config(root.path()).expect("load should succeed");
        let engine = EngineConfig::default().layered(&cfg.engine);
        assert_eq!(engine.max_batch_size, 250);
        assert_eq!(engine.pending_prefix, "PENDING***");
        assert_eq!(engine.default_stage, Stage::PendingClinicalReadiness);
        assert_eq!(engine.discontinue_sentinels, vec!["NO REPLACEMENT".to_string()]);
    }

    #[test]
    fn project_config_overrides_user_layer() {
        let root = tempfile::tempdir().expect("temp dir must be created");
        std::fs::create_dir_all(root.path().join(".relink")).expect("create .relink");
        std::fs::write(
            root.path().join(".relink/config.toml"),
            "[engine]\nmax_batch_size = 10\ndefault_stage = \"pending_item_number\"\n",
        )
        .expect("write config");

        let project = load_project_config(root.path()).expect("load should succeed");
        let user: UserConfig = toml::from_str("output = \"json\"\n[engine]\nmax_batch_size = 99\nlease_timeout_ms = 7\n")
            .expect("parse user config");

        let engine = EngineConfig::default()
            .layered(&user.engine)
            .layered(&project.engine);
        assert_eq!(engine.max_batch_size, 10);
        assert_eq!(engine.lease_timeout_ms, 7);
        assert_eq!(engine.default_stage, Stage::PendingItemNumber);
        assert_eq!(user.output.as_deref(), Some("json"));
    }

    #[test]
    fn malformed_project_config_reports_path() {
        let root = tempfile::tempdir().expect("temp dir must be created");
        std::fs::create_dir_all(root.path().join(".relink")).expect("create .relink");
        std::fs::write(root.path().join(".relink/config.toml"), "[engine\n").expect("write");
        let err = load_project_config(root.path()).expect_err("parse should fail");
        assert!(format!("{err:#}").contains("config.toml"));
        let typed = err
            .downcast_ref::<ConfigFileError>()
            .expect("parse failures keep their type");
        assert_eq!(typed.code(), ErrorCode::ConfigParseError);
    }

    #[test]
    fn env_override_parses_batch_size() {
        let cfg = EngineConfig::default()
            .with_env_override(Some("12".to_string()))
            .expect("valid override");
        assert_eq!(cfg.max_batch_size, 12);
        assert!(EngineConfig::default().with_env_override(Some("zero".to_string())).is_err());
        assert!(EngineConfig::default().with_env_override(Some("0".to_string())).is_err());
    }

    #[test]
    fn sentinel_and_placeholder_detection() {
        let cfg = EngineConfig::default();
        assert!(cfg.is_discontinue_sentinel("no replacement"));
        assert!(cfg.is_discontinue_sentinel("  "));
        assert!(!cfg.is_discontinue_sentinel("B"));
        assert!(cfg.is_placeholder("PENDING***42"));
        assert!(!cfg.is_placeholder("PENDING42"));
        assert!(cfg.is_placeholder("pending***42"));
        assert!(cfg.is_placeholder("  Pending***x"));
        assert!(!cfg.is_placeholder("PEND"));
    }

    #[test]
    fn go_live_window_spans_configured_months() {
        let cfg = EngineConfig::default();
        let today = NaiveDate::from_ymd_opt(2026, 5, 31).expect("valid date");
        let (earliest, latest) = cfg.go_live_window(today);
        assert_eq!(earliest, NaiveDate::from_ymd_opt(2026, 2, 28).expect("valid date"));
        assert_eq!(latest, NaiveDate::from_ymd_opt(2026, 11, 30).expect("valid date"));
    }

    #[test]
    fn cli_json_overrides_env_and_config() {
        let output = resolve_output(true, Some("pretty".to_string()), Some("text".to_string()));
        assert_eq!(output, "json");
        let env_wins = resolve_output(false, Some("pretty".to_string()), Some("text".to_string()));
        assert_eq!(env_wins, "text");
    }
}
