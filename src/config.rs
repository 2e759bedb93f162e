use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DocflowConfig {
    pub api: ApiConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    pub base_url: String,
    /// Global limit for one HTTP exchange, connect through body. Default: 120
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub routes: RouteConfig,
}

fn default_request_timeout_secs() -> u64 {
    120
}

/// Endpoint paths relative to `base_url`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouteConfig {
    pub qrcode: String,
    pub barcode: String,
    pub create_job: String,
    pub upload: String,
    pub readiness: String,
    pub download_trigger: String,
    pub download_file: String,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            qrcode: "qrcode/start/".to_string(),
            barcode: "barcode/start/".to_string(),
            create_job: "aidoc/create_folder_aidoc/".to_string(),
            upload: "aidoc/upload_aidoc/".to_string(),
            readiness: "aidoc/check_ocr_done/".to_string(),
            download_trigger: "aidoc/download_pdf2layer/".to_string(),
            download_file: "aidoc/download_file/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GateConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RunnerConfig {
    /// Unset: a hung remote call stalls the pass until cancelled.
    #[serde(default)]
    pub item_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SelectionConfig {
    #[serde(default = "default_skip_hidden")]
    pub skip_hidden: bool,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            skip_hidden: default_skip_hidden(),
        }
    }
}

fn default_skip_hidden() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub logs_dir: Option<PathBuf>,
}

impl LoggingConfig {
    /// Configured directory, else `~/.docflow/logs`; `None` without a home.
    pub fn resolve_logs_dir(&self) -> Option<PathBuf> {
        self.logs_dir
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".docflow").join("logs")))
    }
}

impl DocflowConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file as YAML: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        const DEFAULT_DOCFLOW_YAML: &str = include_str!("../docflow.yaml");

        serde_yaml::from_str(DEFAULT_DOCFLOW_YAML)
            .expect("Failed to parse embedded docflow.yaml - this is a bug in the docflow.yaml file")
    }

    /// Replaces the service base URL, e.g. from `--base-url`.
    pub fn with_base_url(mut self, base_url: Option<String>) -> Result<Self> {
        if let Some(base_url) = base_url {
            self.api.base_url = base_url;
            self.validate()?;
        }
        Ok(self)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.gate.poll_interval_ms)
    }

    pub fn item_timeout(&self) -> Option<Duration> {
        self.runner.item_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        let base_url = self.api.base_url.trim();
        if base_url.is_empty() {
            anyhow::bail!("api.base_url must not be empty");
        }
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            anyhow::bail!("api.base_url must be an http(s) URL, got '{}'", base_url);
        }
        if self.api.request_timeout_secs == 0 {
            anyhow::bail!("api.request_timeout_secs must be positive");
        }
        if self.gate.poll_interval_ms == 0 {
            anyhow::bail!("gate.poll_interval_ms must be positive");
        }
        if self.runner.item_timeout_secs == Some(0) {
            anyhow::bail!("runner.item_timeout_secs must be positive when set");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = DocflowConfig::default_config();

        assert_eq!(config.api.base_url, "http://0.0.0.0:8000/app");
        assert_eq!(config.api.routes.readiness, "aidoc/check_ocr_done/");
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.item_timeout(), None);
        assert!(config.selection.skip_hidden);
    }

    #[test]
    fn test_default_config_validates() {
        DocflowConfig::default_config().validate().unwrap();
    }

    #[test]
    fn test_embedded_routes_match_defaults() {
        let config = DocflowConfig::default_config();
        let defaults = RouteConfig::default();
        assert_eq!(config.api.routes.qrcode, defaults.qrcode);
        assert_eq!(config.api.routes.download_file, defaults.download_file);
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let file = write_config("api:\n  base_url: \"https://ocr.example.com/app\"\n");
        let config = DocflowConfig::load(file.path()).unwrap();

        assert_eq!(config.api.request_timeout_secs, 120);
        assert_eq!(config.api.routes.upload, "aidoc/upload_aidoc/");
        assert_eq!(config.gate.poll_interval_ms, 5000);
        assert!(config.logging.logs_dir.is_none());
    }

    #[test]
    fn test_yaml_overrides() {
        let yaml = r#"
api:
  base_url: "http://localhost:9000/app"
  routes:
    qrcode: "v2/qr/"
gate:
  poll_interval_ms: 250
runner:
  item_timeout_secs: 30
selection:
  skip_hidden: false
logging:
  logs_dir: "/tmp/docflow-logs"
"#;
        let file = write_config(yaml);
        let config = DocflowConfig::load(file.path()).unwrap();

        assert_eq!(config.api.routes.qrcode, "v2/qr/");
        assert_eq!(config.api.routes.barcode, "barcode/start/");
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.item_timeout(), Some(Duration::from_secs(30)));
        assert!(!config.selection.skip_hidden);
        assert_eq!(
            config.logging.resolve_logs_dir(),
            Some(PathBuf::from("/tmp/docflow-logs"))
        );
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            "api:\n  base_url: \"\"\n",
            "api:\n  base_url: \"ftp://example.com\"\n",
            "api:\n  base_url: \"http://x\"\ngate:\n  poll_interval_ms: 0\n",
            "api:\n  base_url: \"http://x\"\nrunner:\n  item_timeout_secs: 0\n",
            "api:\n  base_url: \"http://x\"\n  request_timeout_secs: 0\n",
        ];
        for yaml in cases {
            let file = write_config(yaml);
            assert!(DocflowConfig::load(file.path()).is_err(), "accepted {:?}", yaml);
        }
    }

    #[test]
    fn test_unknown_section_fails_to_parse() {
        let file = write_config("api:\n  base_url: \"http://x\"\nagents: {}\n");
        assert!(DocflowConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_missing_file_error_names_path() {
        let err = DocflowConfig::load(Path::new("/nonexistent/docflow.yaml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/docflow.yaml"));
    }

    #[test]
    fn test_base_url_override() {
        let config = DocflowConfig::default_config()
            .with_base_url(Some("https://staging.example.com/app".to_string()))
            .unwrap();
        assert_eq!(config.api.base_url, "https://staging.example.com/app");

        let unchanged = DocflowConfig::default_config().with_base_url(None).unwrap();
        assert_eq!(unchanged.api.base_url, "http://0.0.0.0:8000/app");

        assert!(DocflowConfig::default_config()
            .with_base_url(Some("not a url".to_string()))
            .is_err());
    }
}
