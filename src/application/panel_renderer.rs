// Panel renderer - PNG and CSV payloads for single panels
use crate::application::browser::{
    ActionOutput, BrowserInstance, Tab, TabAction, TabOptions, cancellable,
    with_tab,
};
use crate::application::dashboard_extractor::{REFERENCE_COLUMN_WIDTH_PX, ROW_HEIGHT_PX};
use crate::application::page_scripts::{
    csv_step_script, wait_queries_script, CsvStep, CSV_CAPTURE_SCRIPT, CSV_DOWNLOAD_BUTTON,
    CSV_READ_SCRIPT,
};
use crate::application::urls::DashboardQuery;
use crate::domain::dashboard::{GridPos, Panel};
use crate::domain::error::{ReportError, Result};
use crate::infrastructure::config::Layout;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Render size used by the simple layout regardless of grid size
pub const SIMPLE_PANEL_WIDTH: u32 = 1000;
pub const SIMPLE_PANEL_HEIGHT: u32 = 500;

/// Extra attempts after the first failed image request
pub const MAX_RETRIES: u32 = 2;

#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub base_url: String,
    pub layout: Layout,
    /// Screenshot in the browser instead of calling the image renderer
    pub native_rendering: bool,
    pub retry_base_delay: Duration,
    pub tab: TabOptions,
    /// Budget for each step of the CSV download dance
    pub csv_step_timeout: Duration,
}

#[derive(Clone)]
pub struct PanelRenderer {
    client: reqwest::Client,
    browser: Arc<dyn BrowserInstance>,
    settings: Arc<RendererSettings>,
}

/// Pixel size a panel is rendered at
pub fn panel_size(layout: Layout, grid_pos: &GridPos) -> (u32, u32) {
    match layout {
        Layout::Simple => (SIMPLE_PANEL_WIDTH, SIMPLE_PANEL_HEIGHT),
        Layout::Grid => (
            (grid_pos.w.max(1.0) * REFERENCE_COLUMN_WIDTH_PX).round() as u32,
            (grid_pos.h.max(1.0) * ROW_HEIGHT_PX).round() as u32,
        ),
    }
}

/// Image bodies come back either as raw PNG bytes or as base64 text
pub fn to_base64(content_type: Option<&str>, body: &[u8]) -> String {
    let is_image = content_type
        .map(|ct| ct.starts_with("image/"))
        .unwrap_or(false);
    if !is_image {
        if let Ok(text) = std::str::from_utf8(body) {
            let text = text.trim();
            if !text.is_empty() && BASE64.decode(text).is_ok() {
                return text.to_string();
            }
        }
    }
    BASE64.encode(body)
}

impl PanelRenderer {
    pub fn new(client: reqwest::Client, browser: Arc<dyn BrowserInstance>, settings: RendererSettings) -> Self {
        Self {
            client,
            browser,
            settings: Arc::new(settings),
        }
    }

    /// Whether image rendering needs a browser tab rather than an HTTP call
    pub fn renders_natively(&self) -> bool {
        self.settings.native_rendering
    }

    pub async fn render_image(
        &self,
        cancel: &CancellationToken,
        query: &DashboardQuery,
        panel: &Panel,
    ) -> Result<String> {
        if self.settings.native_rendering {
            self.screenshot_image(cancel, query, panel).await
        } else {
            let (width, height) = panel_size(self.settings.layout, &panel.grid_pos);
            let url = query.render_url(&self.settings.base_url, &panel.id, width, height);
            self.fetch_image(cancel, &url).await
        }
    }

    /// GET the image, retrying failed attempts with linearly growing waits
    pub async fn fetch_image(&self, cancel: &CancellationToken, url: &str) -> Result<String> {
        let mut attempt = 0;
        loop {
            match cancellable(cancel, self.try_fetch(url)).await {
                Ok(data) => return Ok(data),
                Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    let delay = self.settings.retry_base_delay * attempt;
                    tracing::warn!(
                        "Panel fetch {} failed (attempt {}), retrying in {:?}: {}",
                        url,
                        attempt,
                        delay,
                        e
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ReportError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_fetch(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReportError::DashboardHttp {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;
        Ok(to_base64(content_type.as_deref(), &body))
    }

    /// Native alternative to the image renderer: load the solo panel page in a
    /// tab sized to the panel and screenshot it
    pub async fn screenshot_image(
        &self,
        cancel: &CancellationToken,
        query: &DashboardQuery,
        panel: &Panel,
    ) -> Result<String> {
        let (width, height) = panel_size(self.settings.layout, &panel.grid_pos);
        let url = query.solo_url(&self.settings.base_url, &panel.id, width, height);
        let wait_script = wait_queries_script(self.settings.tab.timeout);
        let signal = self.settings.tab.ready_signal;

        with_tab(self.browser.as_ref(), self.settings.tab.clone(), cancel, |tab| async move {
            tab.run(None, vec![TabAction::SetViewport { width, height }]).await?;
            tab.navigate_and_wait_for(&url, signal).await?;
            let outputs = tab
                .run(None, vec![TabAction::Evaluate(wait_script), TabAction::Screenshot])
                .await?;
            let png = outputs
                .into_iter()
                .nth(1)
                .and_then(ActionOutput::into_image)
                .ok_or_else(|| ReportError::Browser(format!("no screenshot captured for {}", url)))?;
            Ok(BASE64.encode(png))
        })
        .await
    }

    /// Table data as CSV, exported through the panel inspector exactly as a
    /// user would download it
    pub async fn fetch_csv(
        &self,
        cancel: &CancellationToken,
        query: &DashboardQuery,
        panel: &Panel,
    ) -> Result<String> {
        let url = query.inspect_url(&self.settings.base_url, panel.base_id());
        let step_timeout = Some(self.settings.csv_step_timeout);
        let signal = self.settings.tab.ready_signal;

        with_tab(self.browser.as_ref(), self.settings.tab.clone(), cancel, |tab| async move {
            tab.navigate_and_wait_for(&url, signal).await?;
            run_step(tab.as_ref(), step_timeout, CSV_CAPTURE_SCRIPT, "install download capture").await?;

            for step in [CsvStep::ExpandOptions, CsvStep::ApplyTransformations, CsvStep::Download] {
                let done = run_step(tab.as_ref(), step_timeout, &csv_step_script(step), step.name()).await?;
                if done != serde_json::Value::Bool(true) {
                    return Err(ReportError::script(format!(
                        "inspect step '{}' found nothing to act on at {}",
                        step.name(),
                        url
                    )));
                }
            }

            tab.run(step_timeout, vec![TabAction::Click(CSV_DOWNLOAD_BUTTON.to_string())])
                .await?;

            let csv = run_step(tab.as_ref(), step_timeout, CSV_READ_SCRIPT, "read download").await?;
            match csv {
                serde_json::Value::String(text) => Ok(text),
                other => Err(ReportError::script(format!(
                    "download produced no CSV (got {})",
                    other
                ))),
            }
        })
        .await
    }
}

async fn run_step(tab: &dyn Tab, timeout: Option<Duration>, script: &str, name: &str) -> Result<serde_json::Value> {
    tracing::debug!("CSV step: {}", name);
    let outputs = tab
        .run(timeout, vec![TabAction::Evaluate(script.to_string())])
        .await?;
    Ok(outputs
        .into_iter()
        .next()
        .and_then(ActionOutput::into_value)
        .unwrap_or(serde_json::Value::Null))
}
