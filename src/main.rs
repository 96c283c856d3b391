// Main entry point - Dependency injection and server setup
mod domain;
mod application;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc};
use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::browser::{BrowserInstance, TabOptions};
use crate::application::dashboard_extractor::{DashboardExtractor, ExtractorSettings};
use crate::application::panel_renderer::{PanelRenderer, RendererSettings};
use crate::application::report_service::{ReportOptions, ReportService};
use crate::application::worker_pool::WorkerPool;
use crate::infrastructure::chromium::{ChromiumBrowser, LaunchSettings};
use crate::infrastructure::config::ReporterConfig;
use crate::infrastructure::grafana_repository::{build_client, GrafanaRepository};
use crate::infrastructure::html_template::HtmlTemplater;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{generate_report, health_check, list_panels};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = ReporterConfig::load()?;
    let grafana = &config.grafana;
    let rendering = &config.rendering;
    let headers = grafana.auth_headers();

    // Browser (infrastructure layer)
    let browser: Arc<dyn BrowserInstance> = match &rendering.remote_chrome_url {
        Some(url) if !url.is_empty() => Arc::new(ChromiumBrowser::connect(url).await?),
        _ => Arc::new(
            ChromiumBrowser::launch(&LaunchSettings {
                executable: rendering.chrome_executable.clone(),
                skip_tls_check: grafana.skip_tls_check,
                request_timeout: Some(rendering.tab_timeout()),
            })
            .await?,
        ),
    };

    // Create repository and HTTP client (infrastructure layer)
    let repository = Arc::new(GrafanaRepository::new(
        grafana.base_url(),
        &headers,
        rendering.http_timeout(),
        grafana.skip_tls_check,
    )?);
    let client = build_client(&headers, rendering.http_timeout(), grafana.skip_tls_check)?;

    // Create pools and services (application layer)
    let browser_pool = WorkerPool::new("browser", rendering.max_browser_workers);
    let render_pool = WorkerPool::new("render", rendering.max_render_workers);
    let tab = TabOptions {
        timeout: rendering.tab_timeout(),
        headers: headers.clone(),
        blocked_urls: rendering.blocked_urls.clone(),
        ready_signal: rendering.page_ready_signal,
    };

    let extractor = DashboardExtractor::new(
        browser.clone(),
        browser_pool.clone(),
        ExtractorSettings::new(grafana.base_url(), tab.clone()),
    );
    let renderer = PanelRenderer::new(
        client,
        browser.clone(),
        RendererSettings {
            base_url: grafana.base_url().to_string(),
            layout: config.report.layout,
            native_rendering: rendering.native_rendering,
            retry_base_delay: rendering.retry_base_delay(),
            tab: tab.clone(),
            csv_step_timeout: rendering.csv_step_timeout(),
        },
    );
    let templater = Arc::new(HtmlTemplater::new(
        config.report.header_template.clone(),
        config.report.footer_template.clone(),
    ));

    let report_service = ReportService::new(
        repository,
        extractor,
        renderer,
        templater,
        browser.clone(),
        browser_pool.clone(),
        render_pool.clone(),
        ReportOptions::from_config(&config, tab)?,
    );

    // Create application state
    let state = Arc::new(AppState { report_service });

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/api/report", get(generate_report))
        .route("/api/panels", get(list_panels))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = config.server.listen_addr.parse()?;
    tracing::info!(
        "Starting dashboard-reporter on {} (browser: {}, {} workers: {}, {} workers: {})",
        addr,
        browser.name(),
        browser_pool.name(),
        browser_pool.size(),
        render_pool.name(),
        render_pool.size()
    );

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    browser_pool.shutdown();
    render_pool.shutdown();
    browser.close().await;
    Ok(())
}
