// Dashboard extractor - live panel geometry scraped from the rendered page
use crate::application::browser::{
    ActionOutput, BrowserInstance, Tab, TabAction, TabOptions, with_tab,
};
use crate::application::page_scripts::{
    panel_count_script, panel_selector, scrape_script, EXPAND_ROW_SCRIPTS,
};
use crate::application::urls::DashboardQuery;
use crate::application::worker_pool::WorkerPool;
use crate::domain::dashboard::{clone_id, GridPos, Panel, PanelId, GRID_COLUMNS};
use crate::domain::error::{ReportError, Result};
use crate::infrastructure::config::DashboardMode;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Viewport the dashboard is laid out in while scraping
pub const REFERENCE_VIEWPORT_WIDTH: u32 = 1920;
pub const REFERENCE_VIEWPORT_HEIGHT: u32 = 1080;

/// One grid column at the reference viewport width
pub const REFERENCE_COLUMN_WIDTH_PX: f64 = REFERENCE_VIEWPORT_WIDTH as f64 / GRID_COLUMNS;

/// Height of one grid row at the reference viewport width
pub const ROW_HEIGHT_PX: f64 = 36.0;

/// Bounding box and label of one panel as reported by the page
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PanelElement {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub title: String,
    pub id: PanelId,
}

#[derive(Debug, Clone)]
pub struct ExtractorSettings {
    pub base_url: String,
    pub tab: TabOptions,
    /// Consecutive equal panel counts required before scraping
    pub stable_polls: usize,
    pub poll_interval: Duration,
    pub stability_timeout: Duration,
}

impl ExtractorSettings {
    pub fn new(base_url: impl Into<String>, tab: TabOptions) -> Self {
        let stability_timeout = tab.timeout;
        Self {
            base_url: base_url.into(),
            tab,
            stable_polls: 3,
            poll_interval: Duration::from_millis(500),
            stability_timeout,
        }
    }
}

#[derive(Clone)]
pub struct DashboardExtractor {
    browser: Arc<dyn BrowserInstance>,
    pool: WorkerPool,
    settings: Arc<ExtractorSettings>,
}

impl DashboardExtractor {
    pub fn new(browser: Arc<dyn BrowserInstance>, pool: WorkerPool, settings: ExtractorSettings) -> Self {
        Self {
            browser,
            pool,
            settings: Arc::new(settings),
        }
    }

    /// Load the dashboard in a fresh tab and return its panels with grid
    /// positions. Fails with `NoExtractionData` when the page yields nothing to
    /// read and `NoPanels` when it yields only non-panel elements.
    pub async fn extract_panels(
        &self,
        cancel: &CancellationToken,
        query: &DashboardQuery,
        mode: DashboardMode,
        version: &str,
    ) -> Result<Vec<Panel>> {
        let url = query.view_url(&self.settings.base_url);
        let selector = panel_selector(version);
        let browser = self.browser.clone();
        let settings = self.settings.clone();
        let job_cancel = cancel.clone();

        tracing::debug!("Extracting panels from {} (mode {:?})", url, mode);
        let started = Instant::now();

        let scraped = self
            .pool
            .run(cancel, async move {
                with_tab(browser.as_ref(), settings.tab.clone(), &job_cancel, |tab| async move {
                    scrape_page(tab.as_ref(), &settings, &url, mode, selector).await
                })
                .await
            })
            .await?;

        let Some(value) = scraped.filter(|v| v.is_array()) else {
            return Err(ReportError::NoExtractionData {
                uid: query.uid.clone(),
            });
        };
        let elements: Vec<PanelElement> = serde_json::from_value(value).map_err(|e| {
            tracing::warn!("Unreadable extraction data for {}: {}", query.uid, e);
            ReportError::NoExtractionData {
                uid: query.uid.clone(),
            }
        })?;

        let panels = normalize_geometry(&elements);
        if panels.is_empty() {
            return Err(ReportError::NoPanels {
                uid: query.uid.clone(),
            });
        }

        tracing::debug!(
            "Extracted {} panels from {} elements for {} in {:?}",
            panels.len(),
            elements.len(),
            query.uid,
            started.elapsed()
        );
        Ok(panels)
    }
}

async fn scrape_page(
    tab: &dyn Tab,
    settings: &ExtractorSettings,
    url: &str,
    mode: DashboardMode,
    selector: &str,
) -> Result<Option<serde_json::Value>> {
    tab.run(
        None,
        vec![TabAction::SetViewport {
            width: REFERENCE_VIEWPORT_WIDTH,
            height: REFERENCE_VIEWPORT_HEIGHT,
        }],
    )
    .await?;
    tab.navigate_and_wait_for(url, settings.tab.ready_signal).await?;

    if mode == DashboardMode::Full {
        for script in EXPAND_ROW_SCRIPTS {
            match evaluate(tab, script, None).await {
                Ok(expanded) => tracing::debug!("Expanded rows: {}", expanded),
                Err(e) => tracing::debug!("Row expansion variant skipped: {}", e),
            }
        }
    }

    wait_for_stable_count(tab, settings, &panel_count_script(selector)).await?;

    evaluate(tab, &scrape_script(selector), None)
        .await
        .map(|v| Some(v).filter(|v| !v.is_null()))
}

async fn evaluate(tab: &dyn Tab, script: &str, timeout: Option<Duration>) -> Result<serde_json::Value> {
    let outputs = tab
        .run(timeout, vec![TabAction::Evaluate(script.to_string())])
        .await?;
    Ok(outputs
        .into_iter()
        .next()
        .and_then(ActionOutput::into_value)
        .unwrap_or(serde_json::Value::Null))
}

/// Polls the panel count until it repeats `stable_polls` times in a row.
/// Lazily loaded dashboards keep adding panels for a while after network idle.
async fn wait_for_stable_count(tab: &dyn Tab, settings: &ExtractorSettings, script: &str) -> Result<u64> {
    let deadline = Instant::now() + settings.stability_timeout;
    let mut last = None;
    let mut streak = 0;

    loop {
        let count = evaluate(tab, script, None).await?.as_u64().unwrap_or(0);
        if last == Some(count) {
            streak += 1;
        } else {
            last = Some(count);
            streak = 1;
        }

        if streak >= settings.stable_polls {
            return Ok(count);
        }
        if Instant::now() >= deadline {
            tracing::warn!("Panel count still changing after {:?}; scraping {} panels", settings.stability_timeout, count);
            return Ok(count);
        }
        tokio::time::sleep(settings.poll_interval).await;
    }
}

/// Map absolute pixel boxes to the 24-column grid. Elements one row tall or
/// less are section chrome and are dropped. Repeated ids get clone suffixes.
pub fn normalize_geometry(elements: &[PanelElement]) -> Vec<Panel> {
    if elements.is_empty() {
        return Vec::new();
    }

    let x_offset = elements.iter().map(|e| e.x).fold(f64::INFINITY, f64::min);
    let y_offset = elements.iter().map(|e| e.y).fold(f64::INFINITY, f64::min);
    let max_width = elements
        .iter()
        .map(|e| e.x + e.width)
        .fold(f64::NEG_INFINITY, f64::max);

    let width_scale = ((max_width - x_offset) / GRID_COLUMNS).round().max(1.0);
    // Row height is fixed in reference pixels, so it follows the column width
    let height_scale = ROW_HEIGHT_PX * width_scale / REFERENCE_COLUMN_WIDTH_PX;

    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut panels = Vec::new();

    for element in elements {
        let h = (element.height / height_scale).round();
        if h <= 1.0 {
            continue;
        }
        let grid_pos = GridPos::new(
            ((element.x - x_offset) / width_scale).round().max(0.0),
            ((element.y - y_offset) / height_scale).round().max(0.0),
            (element.width / width_scale).round().max(0.0),
            h,
        );

        let base = element.id.0.clone();
        let copies = seen.entry(base.clone()).or_insert(0);
        let id = if *copies == 0 { base.clone() } else { clone_id(&base, *copies) };
        *copies += 1;

        panels.push(Panel::new(id, "", element.title.clone(), grid_pos));
    }

    panels
}
