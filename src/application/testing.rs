// In-memory browser used by unit tests
use crate::application::browser::{
    ActionOutput, BrowserInstance, LifecycleSignal, PdfOptions, PdfStream, Tab, TabAction,
    TabOptions,
};
use crate::application::dashboard_extractor::{DashboardExtractor, ExtractorSettings};
use crate::application::dashboard_repository::DashboardRepository;
use crate::application::panel_renderer::{PanelRenderer, RendererSettings};
use crate::application::report_service::{ReportOptions, ReportService};
use crate::application::worker_pool::WorkerPool;
use crate::domain::dashboard::Dashboard;
use crate::domain::error::{ReportError, Result};
use crate::infrastructure::config::ReporterConfig;
use crate::infrastructure::html_template::HtmlTemplater;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Smallest valid PNG signature, enough for payload checks
pub const FAKE_PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

pub type ScriptHandler = Arc<dyn Fn(&str) -> Result<serde_json::Value> + Send + Sync>;

#[derive(Default)]
struct FakeState {
    opened: AtomicUsize,
    closed: AtomicUsize,
    open_now: AtomicUsize,
    max_open: AtomicUsize,
    navigations: Mutex<Vec<String>>,
    signals: Mutex<Vec<LifecycleSignal>>,
    actions: Mutex<Vec<TabAction>>,
    contents: Mutex<Vec<String>>,
    pdf_options: Mutex<Vec<PdfOptions>>,
    script: Mutex<Option<ScriptHandler>>,
    fail_navigation: Mutex<Option<String>>,
    navigation_delay: Mutex<Duration>,
}

#[derive(Clone, Default)]
pub struct FakeBrowser {
    state: Arc<FakeState>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_script(&self, handler: impl Fn(&str) -> Result<serde_json::Value> + Send + Sync + 'static) {
        *self.state.script.lock().unwrap() = Some(Arc::new(handler));
    }

    /// Navigations whose URL contains `needle` answer with HTTP 500
    pub fn fail_navigation_to(&self, needle: &str) {
        *self.state.fail_navigation.lock().unwrap() = Some(needle.to_string());
    }

    pub fn set_navigation_delay(&self, delay: Duration) {
        *self.state.navigation_delay.lock().unwrap() = delay;
    }

    pub fn tabs_opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn tabs_closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn max_open_tabs(&self) -> usize {
        self.state.max_open.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.navigations.lock().unwrap().clone()
    }

    pub fn signals(&self) -> Vec<LifecycleSignal> {
        self.state.signals.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<TabAction> {
        self.state.actions.lock().unwrap().clone()
    }

    pub fn contents(&self) -> Vec<String> {
        self.state.contents.lock().unwrap().clone()
    }

    pub fn pdf_options(&self) -> Vec<PdfOptions> {
        self.state.pdf_options.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrowserInstance for FakeBrowser {
    fn name(&self) -> &str {
        "fake"
    }

    async fn new_tab(&self, _options: TabOptions) -> Result<Arc<dyn Tab>> {
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        let now = self.state.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_open.fetch_max(now, Ordering::SeqCst);
        Ok(Arc::new(FakeTab {
            state: self.state.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) {}
}

struct FakeTab {
    state: Arc<FakeState>,
    closed: AtomicBool,
}

#[async_trait]
impl Tab for FakeTab {
    async fn navigate_and_wait_for(&self, url: &str, signal: LifecycleSignal) -> Result<()> {
        self.state.navigations.lock().unwrap().push(url.to_string());
        self.state.signals.lock().unwrap().push(signal);
        let delay = *self.state.navigation_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failing = self.state.fail_navigation.lock().unwrap().clone();
        if let Some(needle) = failing {
            if url.contains(&needle) {
                return Err(ReportError::NavigationStatus {
                    url: url.to_string(),
                    status: 500,
                });
            }
        }
        Ok(())
    }

    async fn run(&self, _timeout: Option<Duration>, actions: Vec<TabAction>) -> Result<Vec<ActionOutput>> {
        let mut outputs = Vec::with_capacity(actions.len());
        for action in actions {
            self.state.actions.lock().unwrap().push(action.clone());
            let output = match action {
                TabAction::Evaluate(script) => {
                    let handler = self.state.script.lock().unwrap().clone();
                    match handler {
                        Some(handler) => ActionOutput::Value(handler(&script)?),
                        None => ActionOutput::Value(serde_json::Value::Null),
                    }
                }
                TabAction::Screenshot => ActionOutput::Image(FAKE_PNG.to_vec()),
                TabAction::Click(_) | TabAction::SetViewport { .. } => ActionOutput::None,
            };
            outputs.push(output);
        }
        Ok(outputs)
    }

    async fn set_content(&self, html: &str) -> Result<()> {
        self.state.contents.lock().unwrap().push(html.to_string());
        Ok(())
    }

    async fn print_to_pdf(&self, options: &PdfOptions) -> Result<PdfStream> {
        self.state.pdf_options.lock().unwrap().push(options.clone());
        let chunks: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"%PDF-1.4\n")),
            Ok(Bytes::from_static(b"%%EOF\n")),
        ];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.closed.fetch_add(1, Ordering::SeqCst);
            self.state.open_now.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Serves one saved dashboard, or 404 for everything when there is none
pub struct StaticRepository {
    pub dashboard: Option<Dashboard>,
    pub version: String,
}

#[async_trait]
impl DashboardRepository for StaticRepository {
    async fn fetch_dashboard(&self, uid: &str) -> Result<Dashboard> {
        self.dashboard.clone().ok_or_else(|| ReportError::DashboardHttp {
            url: format!("http://grafana/api/dashboards/uid/{}", uid),
            status: 404,
            body: "not found".to_string(),
        })
    }

    async fn fetch_version(&self) -> Result<String> {
        Ok(self.version.clone())
    }
}

/// Fully wired service over a fake browser, with short timings
pub fn report_service(
    base_url: &str,
    browser: &FakeBrowser,
    dashboard: Option<Dashboard>,
    configure: impl FnOnce(&mut ReporterConfig),
) -> ReportService {
    let mut config = ReporterConfig::default();
    config.grafana.app_url = base_url.to_string();
    configure(&mut config);

    let browser: Arc<dyn BrowserInstance> = Arc::new(browser.clone());
    let browser_pool = WorkerPool::new("browser", 2);
    let render_pool = WorkerPool::new("render", 4);
    let tab = TabOptions {
        timeout: Duration::from_secs(5),
        ..TabOptions::default()
    };

    let mut extractor_settings = ExtractorSettings::new(base_url, tab.clone());
    extractor_settings.poll_interval = Duration::from_millis(1);
    let extractor = DashboardExtractor::new(browser.clone(), browser_pool.clone(), extractor_settings);
    let renderer = PanelRenderer::new(
        reqwest::Client::new(),
        browser.clone(),
        RendererSettings {
            base_url: base_url.to_string(),
            layout: config.report.layout,
            native_rendering: config.rendering.native_rendering,
            retry_base_delay: Duration::from_millis(1),
            tab: tab.clone(),
            csv_step_timeout: Duration::from_secs(1),
        },
    );

    ReportService::new(
        Arc::new(StaticRepository {
            dashboard,
            version: "11.2.0".to_string(),
        }),
        extractor,
        renderer,
        Arc::new(HtmlTemplater::default()),
        browser,
        browser_pool,
        render_pool,
        ReportOptions::from_config(&config, tab).unwrap(),
    )
}
