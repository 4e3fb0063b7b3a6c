use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const API_URL_ENV: &str = "DOCQA_API_URL";

const DEFAULT_ASK_TIMEOUT_SECS: u64 = 60;
const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 300;

/// Settings file at `<config dir>/docqa/config.json`. Every field is optional.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub api_url: Option<String>,
    pub ask_timeout_secs: Option<u64>,
    pub upload_timeout_secs: Option<u64>,
    pub log_file: Option<PathBuf>,
}

/// Fully resolved settings the app runs with
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_url: String,
    pub ask_timeout: Duration,
    pub upload_timeout: Duration,
    pub log_file: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let config_content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&config_content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Combine the file with overrides: flag first, then environment, then file, then default.
    pub fn resolve(
        self,
        api_url_flag: Option<String>,
        api_url_env: Option<String>,
        log_file_flag: Option<PathBuf>,
    ) -> Result<Settings> {
        let api_url = non_blank(api_url_flag)
            .or_else(|| non_blank(api_url_env))
            .or_else(|| non_blank(self.api_url))
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let log_file = match log_file_flag.or(self.log_file) {
            Some(path) => path,
            None => default_log_path()?,
        };

        Ok(Settings {
            api_url: api_url.trim().trim_end_matches('/').to_string(),
            ask_timeout: Duration::from_secs(self.ask_timeout_secs.unwrap_or(DEFAULT_ASK_TIMEOUT_SECS)),
            upload_timeout: Duration::from_secs(
                self.upload_timeout_secs.unwrap_or(DEFAULT_UPLOAD_TIMEOUT_SECS),
            ),
            log_file,
        })
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("docqa").join("config.json"))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn default_log_path() -> Result<PathBuf> {
    let data_dir = dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow!("Could not determine a directory for the log file"))?;

    Ok(data_dir.join("docqa").join("docqa.log"))
}
