// Chromium over the DevTools protocol - local process or remote endpoint
use crate::application::browser::{
    ActionOutput, BrowserInstance, LifecycleSignal, PdfOptions, PdfStream, Tab, TabAction,
    TabOptions,
};
use crate::domain::error::{ReportError, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{BrowserContextId, CloseParams as BrowserCloseParams};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::io::{CloseParams as StreamCloseParams, ReadParams};
use chromiumoxide::cdp::browser_protocol::network::{
    ClearBrowserCookiesParams, EnableParams as NetworkEnableParams, EventResponseReceived, Headers,
    ResourceType, SetBlockedUrLsParams, SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, EventLifecycleEvent, NavigateParams, PrintToPdfParams,
    PrintToPdfTransferMode, SetLifecycleEventsEnabledParams,
};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Bytes requested per IO.read call while streaming a PDF
const PDF_CHUNK_SIZE: i64 = 256 * 1024;

/// Page margin in inches, leaves room for the print header and footer
const PRINT_MARGIN_INCHES: f64 = 0.6;

impl From<CdpError> for ReportError {
    fn from(err: CdpError) -> Self {
        ReportError::Browser(err.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct LaunchSettings {
    pub executable: Option<String>,
    pub skip_tls_check: bool,
    pub request_timeout: Option<Duration>,
}

/// Flags every locally launched browser runs with
pub fn launch_args(skip_tls_check: bool) -> Vec<&'static str> {
    let mut args = vec![
        "--disable-gpu",
        "--hide-scrollbars",
        "--mute-audio",
        "--disable-dev-shm-usage",
        "--font-render-hinting=none",
    ];
    if skip_tls_check {
        args.push("--ignore-certificate-errors");
    }
    args
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Launched,
    Connected,
}

pub struct ChromiumBrowser {
    name: String,
    origin: Origin,
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
    closed: AtomicBool,
}

impl ChromiumBrowser {
    /// Start a headless Chromium owned by this process
    pub async fn launch(settings: &LaunchSettings) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .args(launch_args(settings.skip_tls_check));
        if let Some(path) = &settings.executable {
            builder = builder.chrome_executable(path);
        }
        if let Some(timeout) = settings.request_timeout {
            builder = builder.request_timeout(timeout);
        }
        let config = builder.build().map_err(ReportError::Browser)?;

        let (browser, handler) = Browser::launch(config).await?;
        tracing::info!("Launched local Chromium");
        Ok(Self::start("local", Origin::Launched, browser, handler))
    }

    /// Attach to a browser someone else runs, by websocket or HTTP debug URL
    pub async fn connect(url: &str) -> Result<Self> {
        let (browser, handler) = Browser::connect(url).await?;
        tracing::info!("Connected to remote Chromium at {}", url);
        Ok(Self::start("remote", Origin::Connected, browser, handler))
    }

    fn start(name: &str, origin: Origin, browser: Browser, mut handler: chromiumoxide::Handler) -> Self {
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("CDP handler error: {}", e);
                }
            }
            tracing::debug!("CDP handler finished");
        });

        Self {
            name: name.to_string(),
            origin,
            browser: Arc::new(browser),
            handler,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl BrowserInstance for ChromiumBrowser {
    fn name(&self) -> &str {
        &self.name
    }

    async fn new_tab(&self, options: TabOptions) -> Result<Arc<dyn Tab>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ReportError::Browser(format!("{} browser is closed", self.name)));
        }

        let context_id = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await?
            .result
            .browser_context_id;

        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(ReportError::Browser)?;

        let page = match self.browser.new_page(params).await {
            Ok(page) => page,
            Err(e) => {
                dispose_context(&self.browser, context_id).await;
                return Err(e.into());
            }
        };

        Ok(Arc::new(ChromiumTab {
            page,
            browser: self.browser.clone(),
            context_id,
            options,
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // A connected browser belongs to someone else; only drop the connection
        if self.origin == Origin::Launched {
            if let Err(e) = self.browser.execute(BrowserCloseParams::default()).await {
                tracing::warn!("Failed to close {} browser: {}", self.name, e);
            }
        }
        self.handler.abort();
        tracing::info!("Closed {} browser", self.name);
    }
}

async fn dispose_context(browser: &Browser, context_id: BrowserContextId) {
    if let Err(e) = browser
        .execute(DisposeBrowserContextParams::new(context_id))
        .await
    {
        tracing::warn!("Failed to dispose browser context: {}", e);
    }
}

/// Non-2xx document responses fail the navigation; 304 is a cache hit
fn document_failed(status: i64) -> bool {
    !(200..300).contains(&status) && status != 304
}

struct ChromiumTab {
    page: Page,
    browser: Arc<Browser>,
    context_id: BrowserContextId,
    options: TabOptions,
    closed: AtomicBool,
}

impl ChromiumTab {
    async fn prepare_network(&self) -> Result<()> {
        self.page.execute(NetworkEnableParams::default()).await?;
        self.page
            .execute(SetLifecycleEventsEnabledParams::new(true))
            .await?;
        if !self.options.headers.is_empty() {
            let headers = Headers::new(serde_json::to_value(&self.options.headers)?);
            self.page
                .execute(SetExtraHttpHeadersParams::new(headers))
                .await?;
        }
        if !self.options.blocked_urls.is_empty() {
            self.page
                .execute(SetBlockedUrLsParams::new(self.options.blocked_urls.clone()))
                .await?;
        }
        Ok(())
    }

    async fn navigate(&self, url: &str, signal: LifecycleSignal) -> Result<()> {
        self.prepare_network().await?;

        // Listen before navigating so no event is missed
        let mut lifecycle = self.page.event_listener::<EventLifecycleEvent>().await?;
        let mut responses = self.page.event_listener::<EventResponseReceived>().await?;

        let navigation = self.page.execute(NavigateParams::new(url)).await?.result;
        if let Some(reason) = navigation.error_text.filter(|e| !e.is_empty()) {
            return Err(ReportError::Navigation {
                url: url.to_string(),
                reason,
            });
        }
        let frame_id = navigation.frame_id;
        let loader_id = navigation.loader_id;

        loop {
            tokio::select! {
                Some(event) = responses.next() => {
                    let main_document = event.r#type == ResourceType::Document
                        && event.frame_id.as_ref() == Some(&frame_id);
                    if main_document && document_failed(event.response.status) {
                        return Err(ReportError::NavigationStatus {
                            url: url.to_string(),
                            status: event.response.status,
                        });
                    }
                }
                Some(event) = lifecycle.next() => {
                    let same_load = loader_id.as_ref().map_or(true, |id| *id == event.loader_id);
                    if event.frame_id == frame_id && same_load && event.name == signal.event_name() {
                        tracing::debug!("{} reached {}", url, event.name);
                        return Ok(());
                    }
                }
                else => {
                    return Err(ReportError::Navigation {
                        url: url.to_string(),
                        reason: "page event stream closed".to_string(),
                    });
                }
            }
        }
    }

    async fn run_action(&self, action: TabAction) -> Result<ActionOutput> {
        match action {
            TabAction::Evaluate(script) => {
                let params = EvaluateParams::builder()
                    .expression(script)
                    .await_promise(true)
                    .return_by_value(true)
                    .build()
                    .map_err(ReportError::script)?;
                let result = self
                    .page
                    .evaluate_expression(params)
                    .await
                    .map_err(|e| ReportError::script(e.to_string()))?;
                Ok(ActionOutput::Value(
                    result.value().cloned().unwrap_or(serde_json::Value::Null),
                ))
            }
            TabAction::Click(selector) => {
                self.page.find_element(selector.as_str()).await?.click().await?;
                Ok(ActionOutput::None)
            }
            TabAction::SetViewport { width, height } => {
                self.page
                    .execute(SetDeviceMetricsOverrideParams::new(
                        width as i64,
                        height as i64,
                        1.0,
                        false,
                    ))
                    .await?;
                Ok(ActionOutput::None)
            }
            TabAction::Screenshot => {
                let png = self
                    .page
                    .screenshot(
                        ScreenshotParams::builder()
                            .format(CaptureScreenshotFormat::Png)
                            .build(),
                    )
                    .await?;
                Ok(ActionOutput::Image(png))
            }
        }
    }
}

#[async_trait]
impl Tab for ChromiumTab {
    async fn navigate_and_wait_for(&self, url: &str, signal: LifecycleSignal) -> Result<()> {
        let limit = self.options.timeout;
        tokio::time::timeout(limit, self.navigate(url, signal))
            .await
            .map_err(|_| ReportError::timeout(format!("navigation to {}", url), limit))?
    }

    async fn run(&self, timeout: Option<Duration>, actions: Vec<TabAction>) -> Result<Vec<ActionOutput>> {
        let limit = timeout.unwrap_or(self.options.timeout);
        let count = actions.len();
        let sequence = async {
            let mut outputs = Vec::with_capacity(count);
            for action in actions {
                outputs.push(self.run_action(action).await?);
            }
            Ok(outputs)
        };
        tokio::time::timeout(limit, sequence)
            .await
            .map_err(|_| ReportError::timeout(format!("{} tab actions", count), limit))?
    }

    async fn set_content(&self, html: &str) -> Result<()> {
        let limit = self.options.timeout;
        tokio::time::timeout(limit, self.page.set_content(html))
            .await
            .map_err(|_| ReportError::timeout("setting page content", limit))??;
        Ok(())
    }

    async fn print_to_pdf(&self, options: &PdfOptions) -> Result<PdfStream> {
        let decorated = options.header_template.is_some() || options.footer_template.is_some();
        let params = PrintToPdfParams {
            landscape: Some(options.landscape),
            print_background: Some(options.print_background),
            display_header_footer: Some(decorated),
            header_template: options.header_template.clone(),
            footer_template: options.footer_template.clone(),
            margin_top: decorated.then_some(PRINT_MARGIN_INCHES),
            margin_bottom: decorated.then_some(PRINT_MARGIN_INCHES),
            transfer_mode: Some(PrintToPdfTransferMode::ReturnAsStream),
            ..Default::default()
        };

        let printed = self
            .page
            .execute(params)
            .await
            .map_err(|e| ReportError::PdfPrint(e.to_string()))?
            .result;
        let handle = printed
            .stream
            .ok_or_else(|| ReportError::PdfPrint("browser returned no PDF stream".to_string()))?;

        let page = self.page.clone();
        let stream = async_stream::stream! {
            loop {
                let mut read = ReadParams::new(handle.clone());
                read.size = Some(PDF_CHUNK_SIZE);
                let chunk = match page.execute(read).await {
                    Ok(response) => response.result,
                    Err(e) => {
                        yield Err(ReportError::PdfPrint(e.to_string()));
                        break;
                    }
                };

                let data = if chunk.base64_encoded.unwrap_or(false) {
                    match BASE64.decode(chunk.data.as_bytes()) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            yield Err(ReportError::PdfPrint(format!("undecodable PDF chunk: {}", e)));
                            break;
                        }
                    }
                } else {
                    chunk.data.into_bytes()
                };
                if !data.is_empty() {
                    yield Ok(Bytes::from(data));
                }
                if chunk.eof {
                    break;
                }
            }
            if let Err(e) = page.execute(StreamCloseParams::new(handle)).await {
                tracing::warn!("Failed to close PDF stream: {}", e);
            }
        };
        Ok(Box::pin(stream))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.page.execute(ClearBrowserCookiesParams::default()).await {
            tracing::warn!("Failed to clear cookies: {}", e);
        }
        if let Err(e) = self.page.clone().close().await {
            tracing::warn!("Failed to close page: {}", e);
        }
        dispose_context(&self.browser, self.context_id.clone()).await;
    }
}
