// Browser capability traits - what the pipeline needs from a headless browser
use crate::domain::error::{ReportError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// PDF bytes as they come off the browser, chunk by chunk
pub type PdfStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Page lifecycle event a navigation waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleSignal {
    DomContentLoaded,
    Load,
    #[default]
    NetworkIdle,
}

impl LifecycleSignal {
    /// Event name as reported by the DevTools protocol
    pub fn event_name(self) -> &'static str {
        match self {
            LifecycleSignal::DomContentLoaded => "DOMContentLoaded",
            LifecycleSignal::Load => "load",
            LifecycleSignal::NetworkIdle => "networkIdle",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TabOptions {
    /// Upper bound for navigation and for scripted actions without their own
    /// timeout
    pub timeout: Duration,
    pub headers: HashMap<String, String>,
    pub blocked_urls: Vec<String>,
    /// When a dashboard page counts as loaded
    pub ready_signal: LifecycleSignal,
}

impl Default for TabOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            headers: HashMap::new(),
            blocked_urls: Vec::new(),
            ready_signal: LifecycleSignal::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TabAction {
    /// Evaluate a script, awaiting it if it returns a promise
    Evaluate(String),
    Click(String),
    SetViewport { width: u32, height: u32 },
    Screenshot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutput {
    None,
    Value(serde_json::Value),
    Image(Vec<u8>),
}

impl ActionOutput {
    pub fn into_value(self) -> Option<serde_json::Value> {
        match self {
            ActionOutput::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_image(self) -> Option<Vec<u8>> {
        match self {
            ActionOutput::Image(bytes) => Some(bytes),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PdfOptions {
    pub landscape: bool,
    pub print_background: bool,
    pub header_template: Option<String>,
    pub footer_template: Option<String>,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            landscape: false,
            print_background: true,
            header_template: None,
            footer_template: None,
        }
    }
}

/// One isolated browsing context. Owned by a single operation and closed
/// exactly once.
#[async_trait]
pub trait Tab: Send + Sync {
    async fn navigate_and_wait_for(&self, url: &str, signal: LifecycleSignal) -> Result<()>;

    async fn run(&self, timeout: Option<Duration>, actions: Vec<TabAction>) -> Result<Vec<ActionOutput>>;

    async fn set_content(&self, html: &str) -> Result<()>;

    async fn print_to_pdf(&self, options: &PdfOptions) -> Result<PdfStream>;

    /// Clears cookies, then tears the context down. Failures are logged, and
    /// calling it again is a no-op.
    async fn close(&self);
}

#[async_trait]
pub trait BrowserInstance: Send + Sync {
    fn name(&self) -> &str;

    async fn new_tab(&self, options: TabOptions) -> Result<Arc<dyn Tab>>;

    async fn close(&self);
}

/// Closes its tab when released, or in the background if dropped first
pub struct TabGuard {
    tab: Option<Arc<dyn Tab>>,
}

impl TabGuard {
    pub fn new(tab: Arc<dyn Tab>) -> Self {
        Self { tab: Some(tab) }
    }

    pub fn tab(&self) -> &dyn Tab {
        match &self.tab {
            Some(tab) => tab.as_ref(),
            None => unreachable!("tab is only taken by release"),
        }
    }

    pub async fn release(mut self) {
        if let Some(tab) = self.tab.take() {
            tab.close().await;
        }
    }
}

impl Drop for TabGuard {
    fn drop(&mut self) {
        if let Some(tab) = self.tab.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { tab.close().await });
                }
                Err(_) => tracing::warn!("tab dropped outside a runtime; browser context leaked"),
            }
        }
    }
}

/// Opens a tab, hands it to `op` and closes it on every exit path
pub async fn with_tab<T, F, Fut>(
    browser: &dyn BrowserInstance,
    options: TabOptions,
    cancel: &CancellationToken,
    op: F,
) -> Result<T>
where
    F: FnOnce(Arc<dyn Tab>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let tab = cancellable(cancel, browser.new_tab(options)).await?;
    let guard = TabGuard::new(tab.clone());
    let result = cancellable(cancel, op(tab)).await;
    guard.release().await;
    result
}

/// Races `fut` against the request's cancellation
pub async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ReportError::Cancelled),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::FakeBrowser;

    #[tokio::test]
    async fn test_with_tab_closes_on_success_and_error() {
        let browser = FakeBrowser::new();
        let cancel = CancellationToken::new();

        let ok: Result<u32> = with_tab(&browser, TabOptions::default(), &cancel, |_| async { Ok(1) }).await;
        assert_eq!(ok.unwrap(), 1);

        let err: Result<u32> = with_tab(&browser, TabOptions::default(), &cancel, |_| async {
            Err(ReportError::script("boom"))
        })
        .await;
        assert!(err.is_err());

        assert_eq!(browser.tabs_opened(), 2);
        assert_eq!(browser.tabs_closed(), 2);
    }

    #[tokio::test]
    async fn test_with_tab_observes_cancellation() {
        let browser = FakeBrowser::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<()> = with_tab(&browser, TabOptions::default(), &cancel, |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ReportError::Cancelled)));
    }

    #[tokio::test]
    async fn test_dropped_guard_closes_in_background() {
        let browser = FakeBrowser::new();
        let tab = browser.new_tab(TabOptions::default()).await.unwrap();
        drop(TabGuard::new(tab));
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(browser.tabs_closed(), 1);
    }

    #[test]
    fn test_lifecycle_event_names() {
        assert_eq!(LifecycleSignal::NetworkIdle.event_name(), "networkIdle");
        assert_eq!(LifecycleSignal::Load.event_name(), "load");
    }
}
