//! Application configuration and the frozen trigger-parameter bag.
//!
//! App config lives at `~/.graybox/graybox.toml`. CLI flags override config
//! file values, which override defaults. `PromoteParams` is the flat
//! parameter bag frozen at project initiation and replayed into every
//! worker invocation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GrayboxError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "graybox.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".graybox";

// ---------------------------------------------------------------------------
// Config structs (matching graybox.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Pipeline defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Retry and polling policies for external calls.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Root directory of the file-backed state store.
    #[serde(default = "default_store_root")]
    pub store_root: String,

    /// Maximum items per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Name of the env var holding the admin API key (never the key itself).
    #[serde(default = "default_admin_key_env")]
    pub admin_key_env: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            store_root: default_store_root(),
            batch_size: default_batch_size(),
            admin_key_env: default_admin_key_env(),
        }
    }
}

fn default_store_root() -> String {
    "~/graybox-state".into()
}
fn default_batch_size() -> usize {
    200
}
fn default_admin_key_env() -> String {
    "GRAYBOX_ADMIN_API_KEY".into()
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retry ceiling for transient I/O errors.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay in seconds between transient-error retries.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Maximum number of bulk-job status checks before giving up.
    #[serde(default = "default_max_job_checks")]
    pub max_job_checks: u32,

    /// Fixed delay in seconds between bulk-job status checks.
    #[serde(default = "default_job_check_interval")]
    pub job_check_interval_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay(),
            max_job_checks: default_max_job_checks(),
            job_check_interval_secs: default_job_check_interval(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}
fn default_retry_delay() -> u64 {
    3
}
fn default_max_job_checks() -> u32 {
    30
}
fn default_job_check_interval() -> u64 {
    5
}

// ---------------------------------------------------------------------------
// PromoteParams — the frozen trigger-parameter bag
// ---------------------------------------------------------------------------

/// Flat parameter bag accepted by every stage worker. Frozen into the
/// project's `status.json` at initiation and replayed verbatim afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromoteParams {
    /// Production content tree root folder.
    #[serde(default)]
    pub root_folder: String,

    /// Graybox (staging) content tree root folder.
    #[serde(default)]
    pub gb_root_folder: String,

    /// Experience name — the path segment marking this staging variant.
    #[serde(default)]
    pub experience_name: String,

    /// Path to the project status workbook.
    #[serde(default)]
    pub project_excel_path: String,

    /// Authoring origin serving rendered markdown for the staging tree.
    #[serde(default)]
    pub staging_origin: String,

    /// Admin API key for authenticated content fetches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_api_key: Option<String>,

    /// Restrict promotion to the experience's drafts subtree.
    #[serde(default)]
    pub drafts_only: bool,

    /// Path patterns excluded from promotion.
    #[serde(default)]
    pub promote_ignore_paths: Vec<String>,
}

impl PromoteParams {
    /// The project path identifying this promotion effort.
    pub fn project_path(&self) -> String {
        format!("{}/{}", self.gb_root_folder, self.experience_name)
    }

    /// Validate the required trigger parameters. Called at the entry point,
    /// before any state mutation; a failure here is a client error.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("rootFolder", &self.root_folder),
            ("gbRootFolder", &self.gb_root_folder),
            ("experienceName", &self.experience_name),
            ("projectExcelPath", &self.project_excel_path),
            ("stagingOrigin", &self.staging_origin),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(GrayboxError::config(format!(
                "missing required parameters: {}",
                missing.join(", ")
            )));
        }
        if self.experience_name.contains('/') {
            return Err(GrayboxError::config(
                "experienceName must be a single path segment",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.graybox/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| GrayboxError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.graybox/graybox.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does
/// not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| GrayboxError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| GrayboxError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| GrayboxError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| GrayboxError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| GrayboxError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_params() -> PromoteParams {
        PromoteParams {
            root_folder: "/site".into(),
            gb_root_folder: "/site-graybox".into(),
            experience_name: "summer-launch".into(),
            project_excel_path: "/site-graybox/summer-launch/promote.xlsx".into(),
            staging_origin: "https://main--site-graybox--org.example.page".into(),
            admin_api_key: None,
            drafts_only: false,
            promote_ignore_paths: vec![],
        }
    }

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("store_root"));
        assert!(toml_str.contains("batch_size"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.batch_size, 200);
        assert_eq!(parsed.retry.max_attempts, 5);
    }

    #[test]
    fn params_validation_reports_all_missing() {
        let params = PromoteParams::default();
        let err = params.validate().expect_err("must fail");
        let msg = err.to_string();
        assert!(msg.contains("rootFolder"));
        assert!(msg.contains("experienceName"));
        assert!(msg.contains("stagingOrigin"));
    }

    #[test]
    fn params_validation_accepts_complete_bag() {
        assert!(valid_params().validate().is_ok());
    }

    #[test]
    fn params_rejects_multi_segment_experience() {
        let mut params = valid_params();
        params.experience_name = "a/b".into();
        assert!(params.validate().is_err());
    }

    #[test]
    fn project_path_joins_root_and_experience() {
        assert_eq!(
            valid_params().project_path(),
            "/site-graybox/summer-launch"
        );
    }

    #[test]
    fn params_replay_roundtrip() {
        let params = valid_params();
        let json = serde_json::to_string(&params).expect("serialize");
        let back: PromoteParams = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, params);
    }
}
