// Report service - assembles a dashboard into a streamed PDF
use crate::application::browser::{
    cancellable, BrowserInstance, PdfOptions, PdfStream, Tab, TabGuard, TabOptions,
};
use crate::application::dashboard_extractor::DashboardExtractor;
use crate::application::dashboard_repository::DashboardRepository;
use crate::application::panel_renderer::PanelRenderer;
use crate::application::templater::{ReportData, ReportHtml, ReportPanel, ReportTemplater};
use crate::application::urls::DashboardQuery;
use crate::application::worker_pool::WorkerPool;
use crate::domain::dashboard::{Dashboard, Panel, Variables};
use crate::domain::error::{ReportError, Result};
use crate::domain::panel_selection::PanelSelector;
use crate::domain::time_range::{parse_time_zone, TimeRange};
use crate::infrastructure::config::{
    DashboardMode, Layout, Orientation, PanelErrorPolicy, ReporterConfig, Theme,
};
use chrono::{FixedOffset, Utc};
use futures::future::{join_all, BoxFuture};
use futures::{FutureExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Report-wide choices, fixed at startup
#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub layout: Layout,
    pub orientation: Orientation,
    pub dashboard_mode: DashboardMode,
    pub time_zone: FixedOffset,
    /// Zone name as forwarded to the dashboard pages
    pub time_zone_name: String,
    pub time_format: String,
    pub theme: Theme,
    pub images: PanelSelector,
    pub data: PanelSelector,
    pub error_policy: PanelErrorPolicy,
    pub tab: TabOptions,
}

impl ReportOptions {
    pub fn from_config(config: &ReporterConfig, tab: TabOptions) -> Result<Self> {
        let report = &config.report;
        Ok(Self {
            layout: report.layout,
            orientation: report.orientation,
            dashboard_mode: report.dashboard_mode,
            time_zone: parse_time_zone(&report.time_zone)?,
            time_zone_name: report.time_zone.clone(),
            time_format: report.time_format.clone(),
            theme: report.theme,
            images: PanelSelector::new(
                report.include_panel_ids.clone(),
                report.exclude_panel_ids.clone(),
                true,
            ),
            data: PanelSelector::new(report.include_panel_data_ids.clone(), Vec::new(), false),
            error_policy: report.panel_error_policy,
            tab,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Payload {
    Image,
    Csv,
}

#[derive(Clone)]
pub struct ReportService {
    repository: Arc<dyn DashboardRepository>,
    extractor: DashboardExtractor,
    renderer: PanelRenderer,
    templater: Arc<dyn ReportTemplater>,
    browser: Arc<dyn BrowserInstance>,
    browser_pool: WorkerPool,
    render_pool: WorkerPool,
    /// Open print tabs, held until their PDF stream ends
    print_slots: Arc<Semaphore>,
    options: Arc<ReportOptions>,
}

impl ReportService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: Arc<dyn DashboardRepository>,
        extractor: DashboardExtractor,
        renderer: PanelRenderer,
        templater: Arc<dyn ReportTemplater>,
        browser: Arc<dyn BrowserInstance>,
        browser_pool: WorkerPool,
        render_pool: WorkerPool,
        options: ReportOptions,
    ) -> Self {
        let print_slots = Arc::new(Semaphore::new(browser_pool.size()));
        Self {
            repository,
            extractor,
            renderer,
            templater,
            browser,
            browser_pool,
            render_pool,
            print_slots,
            options: Arc::new(options),
        }
    }

    pub fn options(&self) -> &ReportOptions {
        &self.options
    }

    /// Render the dashboard over the given range and stream the PDF. The print
    /// tab stays open until the stream ends or is dropped.
    pub async fn generate_report(
        &self,
        cancel: &CancellationToken,
        uid: &str,
        time_range: &TimeRange,
        variables: Variables,
    ) -> Result<PdfStream> {
        let started = Instant::now();
        let zone = self.options.time_zone;
        let range = time_range.resolve(zone)?;
        let query = self.query(uid, variables).with_time_range(&range);

        tracing::info!(
            "Generating report for {} ({} to {})",
            uid,
            range.from,
            range.to
        );

        let dashboard = self.load_dashboard(cancel, &query).await?;
        let panels = self.render_panels(cancel, &query, dashboard.panels).await?;

        let (from, to) = range.format(&self.options.time_format);
        let generated = Utc::now()
            .with_timezone(&zone)
            .format(&self.options.time_format)
            .to_string();
        let html = self.templater.render(&ReportData {
            title: dashboard.title,
            uid: uid.to_string(),
            from,
            to,
            generated,
            layout: self.options.layout,
            panels,
        })?;

        let stream = self.print(cancel, html).await?;
        tracing::info!("Report for {} ready to stream after {:?}", uid, started.elapsed());
        Ok(stream)
    }

    /// Panels as the browser sees them, without rendering anything
    pub async fn extract_panels(
        &self,
        cancel: &CancellationToken,
        uid: &str,
        variables: Variables,
        mode: DashboardMode,
    ) -> Result<Vec<Panel>> {
        let range = TimeRange::default().resolve(self.options.time_zone)?;
        let query = self.query(uid, variables).with_time_range(&range);
        self.scrape(cancel, &query, mode).await
    }

    fn query(&self, uid: &str, variables: Variables) -> DashboardQuery {
        DashboardQuery::new(uid, variables)
            .with_time_zone(self.options.time_zone_name.clone())
            .with_theme(self.options.theme.as_str())
    }

    async fn scrape(
        &self,
        cancel: &CancellationToken,
        query: &DashboardQuery,
        mode: DashboardMode,
    ) -> Result<Vec<Panel>> {
        let version = match cancellable(cancel, self.repository.fetch_version()).await {
            Ok(version) => version,
            Err(ReportError::Cancelled) => return Err(ReportError::Cancelled),
            Err(e) => {
                tracing::warn!("Could not read server version, assuming current layout: {}", e);
                String::new()
            }
        };
        self.extractor.extract_panels(cancel, query, mode, &version).await
    }

    /// Saved model from the API merged with the live layout from the browser.
    /// Only the API side is required; its failure stops the scrape at once.
    async fn load_dashboard(&self, cancel: &CancellationToken, query: &DashboardQuery) -> Result<Dashboard> {
        let scrape_cancel = cancel.child_token();
        let fetch = cancellable(cancel, self.repository.fetch_dashboard(&query.uid));
        let scrape = self.scrape(&scrape_cancel, query, self.options.dashboard_mode);
        tokio::pin!(fetch);
        tokio::pin!(scrape);

        let (saved, scraped) = tokio::select! {
            saved = &mut fetch => match saved {
                Ok(saved) => (saved, scrape.await),
                Err(e) => {
                    scrape_cancel.cancel();
                    return Err(e);
                }
            },
            scraped = &mut scrape => (fetch.await?, scraped),
        };

        let mut dashboard = saved;
        dashboard.variables = query.variables.clone();
        match scraped {
            Ok(live) => dashboard.panels = merge_panels(&dashboard.panels, live),
            Err(ReportError::Cancelled) => return Err(ReportError::Cancelled),
            Err(e) => tracing::warn!(
                "Browser extraction failed for {}, using saved layout: {}",
                query.uid,
                e
            ),
        }
        dashboard.panels.retain(|p| !p.is_row());
        Ok(dashboard)
    }

    async fn render_panels(
        &self,
        cancel: &CancellationToken,
        query: &DashboardQuery,
        panels: Vec<Panel>,
    ) -> Result<Vec<ReportPanel>> {
        let selected: Vec<(Panel, bool, bool)> = panels
            .into_iter()
            .map(|p| {
                let image = self.options.images.selects(&p.id);
                let data = self.options.data.selects(&p.id);
                (p, image, data)
            })
            .filter(|(_, image, data)| *image || *data)
            .collect();

        let mut jobs: Vec<BoxFuture<'static, (usize, Payload, Result<String>)>> = Vec::new();
        for (idx, (panel, image, data)) in selected.iter().enumerate() {
            if *image {
                let job = self.image_job(cancel, query, panel.clone());
                jobs.push(job.map(move |r| (idx, Payload::Image, r)).boxed());
            }
            if *data {
                let job = self.csv_job(cancel, query, panel.clone());
                jobs.push(job.map(move |r| (idx, Payload::Csv, r)).boxed());
            }
        }

        tracing::debug!(
            "Dispatching {} jobs for {} panels of {}",
            jobs.len(),
            selected.len(),
            query.uid
        );
        let results = join_all(jobs).await;

        let mut report: Vec<ReportPanel> = selected
            .into_iter()
            .map(|(panel, _, _)| ReportPanel::new(panel))
            .collect();
        for (idx, payload, result) in results {
            let item = &mut report[idx];
            match result {
                Ok(data) => match payload {
                    Payload::Image => item.panel.set_encoded_image(data)?,
                    Payload::Csv => item.panel.set_csv_data(data)?,
                },
                Err(ReportError::Cancelled) => return Err(ReportError::Cancelled),
                Err(e) => {
                    let err = ReportError::panel(&item.panel.id, &e);
                    if self.options.error_policy == PanelErrorPolicy::Fail {
                        return Err(err);
                    }
                    tracing::warn!("{:?} payload skipped: {}", payload, err);
                    item.errors.push(e.to_string());
                }
            }
        }
        Ok(report)
    }

    fn image_job(&self, cancel: &CancellationToken, query: &DashboardQuery, panel: Panel) -> BoxFuture<'static, Result<String>> {
        let pool = if self.renderer.renders_natively() {
            self.browser_pool.clone()
        } else {
            self.render_pool.clone()
        };
        let renderer = self.renderer.clone();
        let query = query.clone();
        let cancel = cancel.clone();
        async move {
            let job_cancel = cancel.clone();
            pool.run(&cancel, async move { renderer.render_image(&job_cancel, &query, &panel).await })
                .await
        }
        .boxed()
    }

    fn csv_job(&self, cancel: &CancellationToken, query: &DashboardQuery, panel: Panel) -> BoxFuture<'static, Result<String>> {
        let pool = self.browser_pool.clone();
        let renderer = self.renderer.clone();
        let query = query.clone();
        let cancel = cancel.clone();
        async move {
            let job_cancel = cancel.clone();
            pool.run(&cancel, async move { renderer.fetch_csv(&job_cancel, &query, &panel).await })
                .await
        }
        .boxed()
    }

    async fn print(&self, cancel: &CancellationToken, html: ReportHtml) -> Result<PdfStream> {
        let browser = self.browser.clone();
        let tab_options = self.options.tab.clone();
        let pdf_options = PdfOptions {
            landscape: self.options.orientation == Orientation::Landscape,
            print_background: true,
            header_template: Some(html.header),
            footer_template: Some(html.footer),
        };
        let body = html.body;
        let job_cancel = cancel.clone();

        let slot = tokio::select! {
            _ = cancel.cancelled() => return Err(ReportError::Cancelled),
            slot = self.print_slots.clone().acquire_owned() => slot.map_err(|_| ReportError::PoolClosed {
                pool: "print".to_string(),
            })?,
        };

        let (guard, mut pdf) = self
            .browser_pool
            .run(cancel, async move {
                let tab = cancellable(&job_cancel, browser.new_tab(tab_options)).await?;
                let guard = TabGuard::new(tab);
                let printed = cancellable(&job_cancel, print_document(guard.tab(), &body, &pdf_options)).await;
                match printed {
                    Ok(pdf) => Ok((guard, pdf)),
                    Err(e) => {
                        guard.release().await;
                        Err(e)
                    }
                }
            })
            .await?;

        let stream = async_stream::stream! {
            while let Some(chunk) = pdf.next().await {
                let failed = chunk.is_err();
                yield chunk;
                if failed {
                    break;
                }
            }
            guard.release().await;
            drop(slot);
        };
        Ok(Box::pin(stream))
    }
}

async fn print_document(tab: &dyn Tab, body: &str, options: &PdfOptions) -> Result<PdfStream> {
    tab.set_content(body).await?;
    tab.print_to_pdf(options).await
}

/// Live geometry wins; type and repeat come from the saved model, matched on
/// the id without its clone suffix.
pub fn merge_panels(saved: &[Panel], live: Vec<Panel>) -> Vec<Panel> {
    let by_id: HashMap<&str, &Panel> = saved.iter().map(|p| (p.id.as_str(), p)).collect();
    live.into_iter()
        .map(|mut panel| {
            if let Some(model) = by_id.get(panel.base_id()) {
                panel.kind = model.kind.clone();
                panel.repeat = model.repeat.clone();
                if panel.title.is_empty() {
                    panel.title = model.title.clone();
                }
            }
            panel
        })
        .collect()
}
