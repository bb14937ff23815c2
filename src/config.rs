//! Configuration loader and validator for the creative pipeline.
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::CampaignIntent;
use crate::naming::AspectRatio;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub store: Store,
    pub google: Google,
    pub openai: OpenAi,
    pub meta: Meta,
    pub campaigns: Campaigns,
    pub targeting: Targeting,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub default_platform: String,
    pub default_num_ideas: usize,
    pub lease_ttl_seconds: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Sheets,
    Sqlite,
}

/// Where the ledger and the app catalog live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Store {
    pub backend: Backend,
    pub ledger: TableRef,
    pub apps: TableRef,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableRef {
    pub spreadsheet_id: String,
    pub tab: String,
}

impl TableRef {
    /// Stable key for local state (grid rows, leases).
    pub fn key(&self) -> String {
        format!("{}/{}", self.spreadsheet_id, self.tab)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Google {
    pub access_token: String,
    pub drive_folder_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpenAi {
    pub api_key: String,
    pub text_model: String,
    pub image_model: String,
    pub image_size: String,
    /// Attempts per generation call, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_min_ms")]
    pub backoff_min_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_min_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    20_000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Meta {
    pub access_token: String,
    pub api_version: String,
    pub creative_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Campaigns {
    pub defaults: CampaignDefaults,
    #[serde(default)]
    pub apps: Vec<AppCampaign>,
}

/// Naming key and budget shared by every app unless overridden.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CampaignDefaults {
    pub network: String,
    pub platform: String,
    pub data_source: String,
    pub geo: String,
    pub targeting: String,
    pub campaign_type: String,
    pub daily_budget_minor: u64,
    #[serde(default)]
    pub run_counter: Option<u32>,
}

/// Per-app advertising account wiring plus optional naming-key overrides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppCampaign {
    pub app_name: String,
    pub ad_account_id: String,
    pub page_id: String,
    pub application_id: String,
    #[serde(default)]
    pub store_url: Option<String>,
    #[serde(default)]
    pub instagram_id: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub data_source: Option<String>,
    #[serde(default)]
    pub geo: Option<String>,
    #[serde(default)]
    pub targeting: Option<String>,
    #[serde(default)]
    pub campaign_type: Option<String>,
    #[serde(default)]
    pub daily_budget_minor: Option<u64>,
    #[serde(default)]
    pub run_counter: Option<u32>,
}

/// Defaults merged with one app's entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignSettings {
    pub app_name: String,
    pub ad_account_id: String,
    pub page_id: String,
    pub application_id: String,
    pub store_url: Option<String>,
    pub instagram_id: Option<String>,
    pub network: String,
    pub platform: String,
    pub data_source: String,
    pub geo: String,
    pub targeting: String,
    pub campaign_type: String,
    pub daily_budget_minor: u64,
    pub run_counter: Option<u32>,
}

impl CampaignSettings {
    pub fn intent(&self) -> CampaignIntent {
        CampaignIntent {
            app_name: self.app_name.clone(),
            network: self.network.clone(),
            platform: self.platform.clone(),
            geo: self.geo.clone(),
            targeting_key: self.targeting.clone(),
            campaign_type: self.campaign_type.clone(),
            data_source: self.data_source.clone(),
        }
    }
}

impl Campaigns {
    /// Settings for `app_name` (case-insensitive), if the app is configured.
    pub fn settings_for(&self, app_name: &str) -> Option<CampaignSettings> {
        let entry = self
            .apps
            .iter()
            .find(|a| a.app_name.eq_ignore_ascii_case(app_name.trim()))?;
        let d = &self.defaults;
        let pick = |over: &Option<String>, default: &String| {
            over.clone()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.clone())
        };
        Some(CampaignSettings {
            app_name: entry.app_name.clone(),
            ad_account_id: entry.ad_account_id.clone(),
            page_id: entry.page_id.clone(),
            application_id: entry.application_id.clone(),
            store_url: entry.store_url.clone().filter(|u| !u.trim().is_empty()),
            instagram_id: entry.instagram_id.clone().filter(|u| !u.trim().is_empty()),
            network: pick(&entry.network, &d.network),
            platform: pick(&entry.platform, &d.platform),
            data_source: pick(&entry.data_source, &d.data_source),
            geo: pick(&entry.geo, &d.geo),
            targeting: pick(&entry.targeting, &d.targeting),
            campaign_type: pick(&entry.campaign_type, &d.campaign_type),
            daily_budget_minor: entry.daily_budget_minor.unwrap_or(d.daily_budget_minor),
            run_counter: entry.run_counter.or(d.run_counter),
        })
    }
}

/// Audience constraints shared by every ad set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Targeting {
    /// Overrides the countries derived from the naming geo token.
    #[serde(default)]
    pub countries: Vec<String>,
    pub age_min: u32,
    pub device_platforms: Vec<String>,
    pub user_os: Vec<String>,
    pub publisher_platforms: Vec<String>,
}

impl Targeting {
    /// Targeting spec sent with ad-set creation.
    pub fn spec(&self, geo: &str) -> Value {
        let countries: Vec<String> = if self.countries.is_empty() {
            geo.split(['-', ',', '+'])
                .map(|c| c.trim().to_ascii_uppercase())
                .filter(|c| !c.is_empty())
                .collect()
        } else {
            self.countries.clone()
        };
        json!({
            "geo_locations": { "countries": countries },
            "age_min": self.age_min,
            "device_platforms": self.device_platforms,
            "user_os": self.user_os,
            "publisher_platforms": self.publisher_platforms,
        })
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.resolved_data_dir())
    }

    /// `app.data_dir` with a leading `~/` expanded.
    pub fn resolved_data_dir(&self) -> PathBuf {
        match self.app.data_dir.strip_prefix("~/") {
            Some(rest) => match std::env::var("HOME") {
                Ok(home) => PathBuf::from(home).join(rest),
                Err(_) => PathBuf::from(&self.app.data_dir),
            },
            None => PathBuf::from(&self.app.data_dir),
        }
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn blank(s: &str) -> bool {
    s.trim().is_empty()
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if blank(&cfg.app.data_dir) {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if blank(&cfg.app.default_platform) {
        return Err(ConfigError::Invalid("app.default_platform must be non-empty"));
    }
    if cfg.app.default_num_ideas == 0 {
        return Err(ConfigError::Invalid("app.default_num_ideas must be > 0"));
    }
    if cfg.app.lease_ttl_seconds == 0 {
        return Err(ConfigError::Invalid("app.lease_ttl_seconds must be > 0"));
    }

    for table in [&cfg.store.ledger, &cfg.store.apps] {
        if blank(&table.spreadsheet_id) {
            return Err(ConfigError::Invalid("store.*.spreadsheet_id must be non-empty"));
        }
        if blank(&table.tab) {
            return Err(ConfigError::Invalid("store.*.tab must be non-empty"));
        }
    }
    if cfg.store.ledger == cfg.store.apps {
        return Err(ConfigError::Invalid("store.ledger and store.apps must differ"));
    }
    if cfg.store.backend == Backend::Sheets && blank(&cfg.google.access_token) {
        return Err(ConfigError::Invalid("google.access_token must be non-empty"));
    }

    if blank(&cfg.openai.api_key) {
        return Err(ConfigError::Invalid("openai.api_key must be non-empty"));
    }
    if blank(&cfg.openai.text_model) || blank(&cfg.openai.image_model) {
        return Err(ConfigError::Invalid("openai models must be non-empty"));
    }
    if cfg.openai.image_size.parse::<AspectRatio>().is_err() {
        return Err(ConfigError::Invalid("openai.image_size must look like 1024x1536"));
    }
    if cfg.openai.max_attempts == 0 {
        return Err(ConfigError::Invalid("openai.max_attempts must be > 0"));
    }
    if cfg.openai.backoff_min_ms > cfg.openai.backoff_max_ms {
        return Err(ConfigError::Invalid("openai.backoff_min_ms must not exceed backoff_max_ms"));
    }

    if blank(&cfg.meta.access_token) {
        return Err(ConfigError::Invalid("meta.access_token must be non-empty"));
    }
    if blank(&cfg.meta.api_version) {
        return Err(ConfigError::Invalid("meta.api_version must be non-empty"));
    }

    let d = &cfg.campaigns.defaults;
    if [&d.network, &d.platform, &d.data_source, &d.geo, &d.targeting, &d.campaign_type]
        .iter()
        .any(|v| blank(v))
    {
        return Err(ConfigError::Invalid("campaigns.defaults naming fields must be non-empty"));
    }
    if d.daily_budget_minor == 0 {
        return Err(ConfigError::Invalid("campaigns.defaults.daily_budget_minor must be > 0"));
    }
    for app in &cfg.campaigns.apps {
        if blank(&app.app_name) {
            return Err(ConfigError::Invalid("campaigns.apps[].app_name must be non-empty"));
        }
        if blank(&app.ad_account_id) || blank(&app.page_id) || blank(&app.application_id) {
            return Err(ConfigError::Invalid(
                "campaigns.apps[] needs ad_account_id, page_id and application_id",
            ));
        }
        if app.daily_budget_minor == Some(0) {
            return Err(ConfigError::Invalid("campaigns.apps[].daily_budget_minor must be > 0"));
        }
    }

    if cfg.targeting.age_min < 13 {
        return Err(ConfigError::Invalid("targeting.age_min must be >= 13"));
    }
    if cfg.targeting.publisher_platforms.is_empty() {
        return Err(ConfigError::Invalid("targeting.publisher_platforms must be non-empty"));
    }

    Ok(())
}

/// Returns the canonical example YAML content.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  default_platform: "Meta"
  default_num_ideas: 5
  lease_ttl_seconds: 1800

store:
  backend: sheets
  ledger:
    spreadsheet_id: "GOOGLE_SPREADSHEET_ID"
    tab: "Sheet1"
  apps:
    spreadsheet_id: "GOOGLE_SPREADSHEET_ID"
    tab: "Apps"

google:
  access_token: "YOUR_GOOGLE_OAUTH_ACCESS_TOKEN"
  drive_folder_id: "GOOGLE_DRIVE_FOLDER_ID"

openai:
  api_key: "YOUR_OPENAI_API_KEY"
  text_model: "gpt-4o"
  image_model: "gpt-image-1"
  image_size: "1024x1536"
  max_attempts: 5
  backoff_min_ms: 1000
  backoff_max_ms: 20000

meta:
  access_token: "YOUR_META_ACCESS_TOKEN"
  api_version: "v19.0"
  creative_message: "Try it free"

campaigns:
  defaults:
    network: "FB"
    platform: "AND"
    data_source: "AI"
    geo: "US"
    targeting: "BROAD"
    campaign_type: "AEO"
    daily_budget_minor: 1000
  apps:
    - app_name: "FocusTimer"
      ad_account_id: "1234567890"
      page_id: "PAGE_ID"
      application_id: "APPLICATION_ID"
      store_url: "https://play.google.com/store/apps/details?id=com.example.focustimer"

targeting:
  age_min: 18
  device_platforms: ["mobile"]
  user_os: ["Android_ver_10.0_and_above"]
  publisher_platforms: ["facebook", "instagram", "audience_network", "messenger"]
"#
}
