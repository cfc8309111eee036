use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::error::{
    CreateSettingsDirSnafu, EngineResult, RenameSettingsSnafu, SerializeSettingsSnafu,
    WriteSettingsSnafu,
};
use crate::frame::Sentinels;
use crate::poller::PollOptions;

pub const SETTINGS_DIRECTORY_NAME: &str = "grantscribe";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "GRANTSCRIBE_";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

pub const DEFAULT_PROVIDER_ID: &str = "openai";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const DEFAULT_NO_DATA_TIMEOUT_SECS: u64 = 60;
const DEFAULT_JOB_TIMEOUT_SECS: u64 = 300;
const DEFAULT_JOB_INTERVAL_MS: u64 = 2_000;
const DEFAULT_ESCALATE_AFTER_ATTEMPTS: u32 = 15;
const DEFAULT_FINAL_NOTICE_AFTER_ATTEMPTS: u32 = 30;
const DEFAULT_PLACEHOLDER_EXCERPT_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSettings {
    #[serde(default = "default_no_data_timeout_secs")]
    pub no_data_timeout_secs: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            no_data_timeout_secs: DEFAULT_NO_DATA_TIMEOUT_SECS,
        }
    }
}

impl StreamSettings {
    pub fn no_data_timeout(&self) -> Duration {
        Duration::from_secs(self.no_data_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSettings {
    #[serde(default = "default_job_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_job_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_escalate_after_attempts")]
    pub escalate_after_attempts: u32,
    #[serde(default = "default_final_notice_after_attempts")]
    pub final_notice_after_attempts: u32,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_JOB_TIMEOUT_SECS,
            interval_ms: DEFAULT_JOB_INTERVAL_MS,
            escalate_after_attempts: DEFAULT_ESCALATE_AFTER_ATTEMPTS,
            final_notice_after_attempts: DEFAULT_FINAL_NOTICE_AFTER_ATTEMPTS,
        }
    }
}

impl JobSettings {
    pub fn poll_options(&self) -> PollOptions {
        PollOptions {
            timeout: Duration::from_secs(self.timeout_secs),
            interval: Duration::from_millis(self.interval_ms),
            escalate_after_attempts: self.escalate_after_attempts,
            final_notice_after_attempts: self.final_notice_after_attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionSettings {
    #[serde(default = "default_placeholder_excerpt_chars")]
    pub placeholder_excerpt_chars: usize,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            placeholder_excerpt_chars: DEFAULT_PLACEHOLDER_EXCERPT_CHARS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: default_endpoint(),
            model: default_model(),
            temperature: None,
            max_tokens: None,
        }
    }
}

impl ProviderSettings {
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    fn normalized(mut self) -> Self {
        self.provider_id = non_blank_or(self.provider_id, default_provider_id);
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = non_blank_or(self.endpoint, default_endpoint);
        self.model = non_blank_or(self.model, default_model);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default)]
    pub sentinels: Sentinels,
    #[serde(default)]
    pub stream: StreamSettings,
    #[serde(default)]
    pub jobs: JobSettings,
    #[serde(default)]
    pub extraction: ExtractionSettings,
    #[serde(default)]
    pub provider: ProviderSettings,
}

impl EngineSettings {
    /// Replaces blank or zero values with defaults so downstream code never sees them.
    pub fn normalized(mut self) -> Self {
        self.sentinels = self.sentinels.normalized();
        if self.stream.no_data_timeout_secs == 0 {
            self.stream.no_data_timeout_secs = DEFAULT_NO_DATA_TIMEOUT_SECS;
        }
        if self.jobs.timeout_secs == 0 {
            self.jobs.timeout_secs = DEFAULT_JOB_TIMEOUT_SECS;
        }
        if self.jobs.interval_ms == 0 {
            self.jobs.interval_ms = DEFAULT_JOB_INTERVAL_MS;
        }
        if self.extraction.placeholder_excerpt_chars == 0 {
            self.extraction.placeholder_excerpt_chars = DEFAULT_PLACEHOLDER_EXCERPT_CHARS;
        }
        self.provider = self.provider.normalized();
        self
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<EngineSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".grantscribe"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<EngineSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: EngineSettings) -> EngineResult<()> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_from_disk(path: &Path) -> EngineSettings {
        let mut figment = Figment::from(Serialized::defaults(EngineSettings::default()));
        if path.exists() {
            figment = figment.merge(Json::file(path));
        } else {
            tracing::info!("settings file not found at {:?}, using defaults", path);
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut settings = match figment.extract::<EngineSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                EngineSettings::default()
            }
        };

        if !settings.provider.is_configured()
            && let Ok(api_key) = std::env::var(OPENAI_API_KEY_ENV)
        {
            settings.provider.api_key = api_key.trim().to_string();
        }

        settings
    }

    fn persist(&self, settings: &EngineSettings) -> EngineResult<()> {
        if let Some(parent) = self.config_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context(CreateSettingsDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeSettingsSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteSettingsSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameSettingsSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

fn non_blank_or(value: String, default: fn() -> String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        default()
    } else {
        trimmed.to_string()
    }
}

fn default_no_data_timeout_secs() -> u64 {
    DEFAULT_NO_DATA_TIMEOUT_SECS
}

fn default_job_timeout_secs() -> u64 {
    DEFAULT_JOB_TIMEOUT_SECS
}

fn default_job_interval_ms() -> u64 {
    DEFAULT_JOB_INTERVAL_MS
}

fn default_escalate_after_attempts() -> u32 {
    DEFAULT_ESCALATE_AFTER_ATTEMPTS
}

fn default_final_notice_after_attempts() -> u32 {
    DEFAULT_FINAL_NOTICE_AFTER_ATTEMPTS
}

fn default_placeholder_excerpt_chars() -> usize {
    DEFAULT_PLACEHOLDER_EXCERPT_CHARS
}

fn default_provider_id() -> String {
    DEFAULT_PROVIDER_ID.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("absent.json"));
        let settings = store.settings();
        assert_eq!(settings.stream, StreamSettings::default());
        assert_eq!(settings.jobs, JobSettings::default());
        assert_eq!(settings.sentinels, Sentinels::default());
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(
            &path,
            r#"{"jobs": {"interval_ms": 500}, "provider": {"model": "  "}}"#,
        )
        .unwrap();

        let settings = SettingsStore::new(path).settings();
        assert_eq!(settings.jobs.interval_ms, 500);
        assert_eq!(settings.jobs.timeout_secs, DEFAULT_JOB_TIMEOUT_SECS);
        assert_eq!(settings.provider.model, DEFAULT_MODEL);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, "{ not json").unwrap();

        let settings = SettingsStore::new(path).settings();
        assert_eq!(settings.extraction, ExtractionSettings::default());
    }

    #[test]
    fn update_persists_normalized_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE_NAME);
        let store = SettingsStore::new(path.clone());

        let mut settings = EngineSettings::default();
        settings.stream.no_data_timeout_secs = 0;
        settings.sentinels.end_of_content = "<END>".to_string();
        store.update(settings).unwrap();

        assert_eq!(
            store.settings().stream.no_data_timeout_secs,
            DEFAULT_NO_DATA_TIMEOUT_SECS
        );
        assert!(!path.with_extension("json.tmp").exists());

        let reloaded = SettingsStore::new(path).settings();
        assert_eq!(reloaded.sentinels.end_of_content, "<END>");
    }

    #[test]
    fn job_settings_convert_to_poll_options() {
        let options = JobSettings {
            timeout_secs: 30,
            interval_ms: 1_500,
            ..JobSettings::default()
        }
        .poll_options();
        assert_eq!(options.timeout, Duration::from_secs(30));
        assert_eq!(options.interval, Duration::from_millis(1_500));
        assert_eq!(options.max_attempts(), 20);
    }
}
