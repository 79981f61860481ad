use std::path::PathBuf;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{PipelineError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "vk_members.toml";
const ENV_PREFIX: &str = "VKM";
const MAX_PAGE_SIZE: u32 = 1000;

/// How the Loader treats member ids that are already in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Append every staged row; reruns duplicate members.
    Append,
    /// Delete rows with the same member ids before inserting.
    Replace,
}

/// Everything a stage needs to know, passed explicitly into each entry point.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub group_id: String,
    pub page_size: u32,
    pub max_pages: u32,
    pub api_url: String,
    pub api_version: String,
    pub fields: String,
    /// Name of the environment variable holding the access token.
    pub token_env: String,
    pub store_path: PathBuf,
    pub staging_path: PathBuf,
    pub report_dir: PathBuf,
    pub load_mode: LoadMode,
}

/// Command-line values that take precedence over file and environment.
#[derive(Debug, Default)]
pub struct Overrides {
    pub group_id: Option<String>,
    pub page_size: Option<u32>,
    pub store_path: Option<String>,
    pub staging_path: Option<String>,
    pub load_mode: Option<LoadMode>,
}

impl Settings {
    /// Defaults, then `config_file` (optional), then `VKM_*` env vars, then overrides.
    pub fn load(config_file: &str, overrides: Overrides) -> Result<Self> {
        let load_mode = overrides.load_mode.map(|m| match m {
            LoadMode::Append => "append",
            LoadMode::Replace => "replace",
        });

        let settings: Settings = Config::builder()
            .set_default("group_id", "vk_fishing")?
            .set_default("page_size", MAX_PAGE_SIZE)?
            .set_default("max_pages", 10_000)?
            .set_default("api_url", "https://api.vk.com/method/groups.getMembers")?
            .set_default("api_version", "5.131")?
            .set_default("fields", "id,first_name,last_name,last_seen,contacts,city,counters")?
            .set_default("token_env", "VK_ACCESS_TOKEN")?
            .set_default("store_path", "data/vk_members.sqlite")?
            .set_default("staging_path", "data/vk_group_members.csv")?
            .set_default("report_dir", "data/reports")?
            .set_default("load_mode", "append")?
            .add_source(File::with_name(config_file).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .set_override_option("group_id", overrides.group_id)?
            .set_override_option("page_size", overrides.page_size)?
            .set_override_option("store_path", overrides.store_path)?
            .set_override_option("staging_path", overrides.staging_path)?
            .set_override_option("load_mode", load_mode)?
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.group_id.trim().is_empty() {
            return Err(invalid("group_id must not be empty"));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(invalid(&format!(
                "page_size must be within 1..={}, got {}",
                MAX_PAGE_SIZE, self.page_size
            )));
        }
        if self.max_pages == 0 {
            return Err(invalid("max_pages must be positive"));
        }
        Ok(())
    }

    /// Resolve the credential reference to the token itself.
    pub fn access_token(&self) -> Result<String> {
        std::env::var(&self.token_env).map_err(|_| {
            invalid(&format!("{} environment variable must be set", self.token_env))
        })
    }
}

fn invalid(msg: &str) -> PipelineError {
    PipelineError::Config(config::ConfigError::Message(msg.to_string()))
}

#[cfg(test)]
pub fn test_settings(dir: &std::path::Path) -> Settings {
    Settings {
        group_id: "test_group".into(),
        page_size: 2,
        max_pages: 50,
        api_url: "http://localhost/method/groups.getMembers".into(),
        api_version: "5.131".into(),
        fields: "id,first_name,last_name".into(),
        token_env: "VKM_TEST_TOKEN".into(),
        store_path: dir.join("members.sqlite"),
        staging_path: dir.join("staging.csv"),
        report_dir: dir.join("reports"),
        load_mode: LoadMode::Append,
    }
}
