// Configuration loading - defaults, optional file, environment
use crate::application::browser::LifecycleSignal;
use crate::domain::error::{ReportError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// One panel per block, fixed render size
    #[default]
    Simple,
    /// Panels placed on the dashboard grid, sized from their grid units
    Grid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DashboardMode {
    #[default]
    Default,
    /// Expand collapsed rows before collecting panels
    Full,
}

impl DashboardMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Some(Self::Default),
            "full" => Some(Self::Full),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}

/// What a failed panel does to the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PanelErrorPolicy {
    /// Log, render a placeholder, keep going
    #[default]
    Degrade,
    /// Abort the whole report
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    pub server: ServerSettings,
    pub grafana: GrafanaSettings,
    pub report: ReportSettings,
    pub rendering: RenderingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub listen_addr: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrafanaSettings {
    pub app_url: String,
    pub api_token: Option<String>,
    pub skip_tls_check: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    pub orientation: Orientation,
    pub layout: Layout,
    pub dashboard_mode: DashboardMode,
    pub time_zone: String,
    /// chrono format string used for the range shown in the report
    pub time_format: String,
    pub theme: Theme,
    pub header_template: Option<String>,
    pub footer_template: Option<String>,
    pub include_panel_ids: Vec<String>,
    pub exclude_panel_ids: Vec<String>,
    pub include_panel_data_ids: Vec<String>,
    pub panel_error_policy: PanelErrorPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderingSettings {
    /// Screenshot panels in the browser instead of calling the image renderer
    pub native_rendering: bool,
    pub max_browser_workers: usize,
    pub max_render_workers: usize,
    pub remote_chrome_url: Option<String>,
    pub chrome_executable: Option<String>,
    pub tab_timeout_secs: u64,
    pub csv_step_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub retry_base_delay_ms: u64,
    pub blocked_urls: Vec<String>,
    /// Lifecycle event that ends a dashboard navigation
    pub page_ready_signal: LifecycleSignal,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            grafana: GrafanaSettings::default(),
            report: ReportSettings::default(),
            rendering: RenderingSettings::default(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Default for GrafanaSettings {
    fn default() -> Self {
        Self {
            app_url: "http://localhost:3000".to_string(),
            api_token: None,
            skip_tls_check: false,
        }
    }
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            orientation: Orientation::default(),
            layout: Layout::default(),
            dashboard_mode: DashboardMode::default(),
            time_zone: "UTC".to_string(),
            time_format: "%a %b %-d %H:%M:%S %:z %Y".to_string(),
            theme: Theme::default(),
            header_template: None,
            footer_template: None,
            include_panel_ids: Vec::new(),
            exclude_panel_ids: Vec::new(),
            include_panel_data_ids: Vec::new(),
            panel_error_policy: PanelErrorPolicy::default(),
        }
    }
}

impl Default for RenderingSettings {
    fn default() -> Self {
        Self {
            native_rendering: false,
            max_browser_workers: 2,
            max_render_workers: 0,
            remote_chrome_url: None,
            chrome_executable: None,
            tab_timeout_secs: 30,
            csv_step_timeout_secs: 60,
            http_timeout_secs: 60,
            retry_base_delay_ms: 500,
            blocked_urls: Vec::new(),
            page_ready_signal: LifecycleSignal::NetworkIdle,
        }
    }
}

impl GrafanaSettings {
    pub fn base_url(&self) -> &str {
        self.app_url.trim_end_matches('/')
    }

    /// Headers sent with every API call and browser navigation
    pub fn auth_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        if let Some(token) = self.api_token.as_deref().filter(|t| !t.is_empty()) {
            headers.insert("Authorization".to_string(), format!("Bearer {}", token));
        }
        headers
    }
}

impl RenderingSettings {
    pub fn tab_timeout(&self) -> Duration {
        Duration::from_secs(self.tab_timeout_secs)
    }

    pub fn csv_step_timeout(&self) -> Duration {
        Duration::from_secs(self.csv_step_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl ReporterConfig {
    /// Defaults, then `config/reporter.*` if present, then `REPORTER__*`
    /// environment variables (e.g. `REPORTER__GRAFANA__APP_URL`).
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::with_name("config/reporter").required(false))
            .add_source(
                config::Environment::with_prefix("REPORTER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("report.include_panel_ids")
                    .with_list_parse_key("report.exclude_panel_ids")
                    .with_list_parse_key("report.include_panel_data_ids")
                    .with_list_parse_key("rendering.blocked_urls"),
            )
            .build()?;

        let parsed: Self = settings.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<()> {
        if self.grafana.app_url.trim().is_empty() {
            return Err(invalid("grafana.app_url must not be empty"));
        }
        if self.rendering.tab_timeout_secs == 0 {
            return Err(invalid("rendering.tab_timeout_secs must be positive"));
        }
        crate::domain::time_range::parse_time_zone(&self.report.time_zone)?;
        let bad_format = chrono::format::StrftimeItems::new(&self.report.time_format)
            .any(|item| matches!(item, chrono::format::Item::Error));
        if bad_format {
            return Err(invalid("report.time_format is not a valid strftime format"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> ReportError {
    ReportError::Config(config::ConfigError::Message(msg.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(text: &str) -> ReporterConfig {
        config::Config::builder()
            .add_source(config::Config::try_from(&ReporterConfig::default()).unwrap())
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_file_overrides_defaults() {
        let cfg = from_toml(
            r#"
            [grafana]
            app_url = "https://grafana.example.com/"
            api_token = "glsa_abc"

            [report]
            layout = "grid"
            orientation = "landscape"
            dashboard_mode = "full"
            include_panel_ids = ["1", "4"]

            [rendering]
            max_browser_workers = 4
            page_ready_signal = "dom_content_loaded"
            "#,
        );
        assert_eq!(cfg.grafana.base_url(), "https://grafana.example.com");
        assert_eq!(cfg.report.layout, Layout::Grid);
        assert_eq!(cfg.report.orientation, Orientation::Landscape);
        assert_eq!(cfg.report.dashboard_mode, DashboardMode::Full);
        assert_eq!(cfg.report.include_panel_ids, vec!["1", "4"]);
        assert_eq!(cfg.rendering.max_browser_workers, 4);
        assert_eq!(cfg.rendering.page_ready_signal, LifecycleSignal::DomContentLoaded);
        // untouched keys keep their defaults
        assert_eq!(cfg.rendering.tab_timeout_secs, 30);
        assert_eq!(cfg.report.panel_error_policy, PanelErrorPolicy::Degrade);
        assert_eq!(
            cfg.grafana.auth_headers().get("Authorization").unwrap(),
            "Bearer glsa_abc"
        );
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut cfg = ReporterConfig::default();
        cfg.grafana.app_url = " ".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = ReporterConfig::default();
        cfg.report.time_zone = "nowhere".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = ReporterConfig::default();
        cfg.report.time_format = "%Y-%Q".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_dashboard_mode_parse() {
        assert_eq!(DashboardMode::parse("FULL"), Some(DashboardMode::Full));
        assert_eq!(DashboardMode::parse("default"), Some(DashboardMode::Default));
        assert_eq!(DashboardMode::parse("other"), None);
    }
}
