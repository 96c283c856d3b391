// Grafana HTTP API repository implementation
use crate::application::dashboard_repository::DashboardRepository;
use crate::domain::dashboard::{Dashboard, GridPos, Panel, PanelId, Variables};
use crate::domain::error::{ReportError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct GrafanaRepository {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct DashboardResponse {
    dashboard: DashboardModel,
}

#[derive(Debug, Deserialize)]
struct DashboardModel {
    #[serde(default)]
    title: String,
    #[serde(default)]
    uid: String,
    #[serde(default)]
    panels: Vec<PanelModel>,
}

#[derive(Debug, Deserialize)]
struct PanelModel {
    id: PanelId,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    title: String,
    #[serde(rename = "gridPos", default)]
    grid_pos: GridPos,
    #[serde(default)]
    repeat: Option<String>,
    #[serde(default)]
    collapsed: bool,
    /// Children of a collapsed row
    #[serde(default)]
    panels: Vec<PanelModel>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    version: String,
}

impl GrafanaRepository {
    pub fn new(
        base_url: &str,
        headers: &HashMap<String, String>,
        timeout: std::time::Duration,
        skip_tls_check: bool,
    ) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: build_client(headers, timeout, skip_tls_check)?,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ReportError::DashboardHttp {
                url: url.to_string(),
                status,
                body,
            });
        }

        Ok(response.json::<T>().await?)
    }
}

/// Shared reqwest client carrying the auth headers
pub fn build_client(
    headers: &HashMap<String, String>,
    timeout: std::time::Duration,
    skip_tls_check: bool,
) -> Result<reqwest::Client> {
    let mut default_headers = HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| invalid_header(format!("invalid header name {}: {}", key, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| invalid_header(format!("invalid value for header {}: {}", key, e)))?;
        default_headers.insert(name, value);
    }

    Ok(reqwest::Client::builder()
        .default_headers(default_headers)
        .timeout(timeout)
        .danger_accept_invalid_certs(skip_tls_check)
        .build()?)
}

fn flatten_panels(models: Vec<PanelModel>) -> Vec<Panel> {
    let mut panels = Vec::new();
    for model in models {
        let is_collapsed_row = model.kind == "row" && model.collapsed;
        panels.push(
            Panel::new(model.id.0, model.kind, model.title, model.grid_pos).with_repeat(model.repeat),
        );
        if is_collapsed_row {
            panels.extend(flatten_panels(model.panels));
        }
    }
    panels
}

fn into_dashboard(model: DashboardModel) -> Dashboard {
    Dashboard::new(
        model.title,
        model.uid,
        Variables::new(),
        flatten_panels(model.panels),
    )
}

#[async_trait]
impl DashboardRepository for GrafanaRepository {
    async fn fetch_dashboard(&self, uid: &str) -> Result<Dashboard> {
        let url = format!(
            "{}/api/dashboards/uid/{}",
            self.base_url,
            urlencoding::encode(uid)
        );
        tracing::debug!("Fetching dashboard model from {}", url);
        let response: DashboardResponse = self.get_json(&url).await?;
        let dashboard = into_dashboard(response.dashboard);
        tracing::debug!(
            "Dashboard {} has {} panels",
            dashboard.uid,
            dashboard.panels.len()
        );
        Ok(dashboard)
    }

    async fn fetch_version(&self) -> Result<String> {
        let url = format!("{}/api/health", self.base_url);
        let health: HealthResponse = self.get_json(&url).await?;
        Ok(health.version)
    }
}

fn invalid_header(msg: String) -> ReportError {
    ReportError::Config(config::ConfigError::Message(msg))
}
