// HTTP request handlers
use crate::domain::dashboard::Variables;
use crate::domain::error::ReportError;
use crate::domain::time_range::TimeRange;
use crate::infrastructure::config::DashboardMode;
use crate::presentation::app_state::AppState;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type Params = Vec<(String, String)>;

fn param<'a>(params: &'a Params, name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
}

fn variables(params: &Params) -> Variables {
    Variables::from_query_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

impl ReportError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ReportError::TimeParse { .. } => StatusCode::BAD_REQUEST,
            ReportError::DashboardHttp { status: 404, .. }
            | ReportError::NoPanels { .. }
            | ReportError::NoExtractionData { .. } => StatusCode::NOT_FOUND,
            ReportError::DashboardHttp { .. }
            | ReportError::Http(_)
            | ReportError::Navigation { .. }
            | ReportError::NavigationStatus { .. }
            | ReportError::PanelRender { .. } => StatusCode::BAD_GATEWAY,
            ReportError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ReportError::Cancelled | ReportError::PoolClosed { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ReportError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::info!("Request rejected: {}", self);
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Render a dashboard to PDF and stream it back
pub async fn generate_report(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Params>,
) -> Response {
    let Some(uid) = param(&params, "dashUid") else {
        return bad_request("dashUid is required");
    };
    let defaults = TimeRange::default();
    let range = TimeRange::new(
        param(&params, "from").unwrap_or(defaults.from.as_str()),
        param(&params, "to").unwrap_or(defaults.to.as_str()),
    );

    // Dropping the guard cancels everything still running for this request,
    // whether the client goes away before or during the download
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let pdf = match state
        .report_service
        .generate_report(&cancel, uid, &range, variables(&params))
        .await
    {
        Ok(pdf) => pdf,
        Err(e) => return e.into_response(),
    };

    let body = async_stream::stream! {
        let _guard = guard;
        let mut pdf = pdf;
        while let Some(chunk) = pdf.next().await {
            yield chunk;
        }
    };

    (
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}.pdf\"", uid.replace('"', "")),
            ),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

/// Panels of a dashboard as laid out in the browser
pub async fn list_panels(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Params>,
) -> Response {
    let Some(uid) = param(&params, "dashUid") else {
        return bad_request("dashUid is required");
    };
    let mode = match param(&params, "mode") {
        Some(raw) => match DashboardMode::parse(raw) {
            Some(mode) => mode,
            None => return bad_request("mode must be 'default' or 'full'"),
        },
        None => state.report_service.options().dashboard_mode,
    };

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    match state
        .report_service
        .extract_panels(&cancel, uid, variables(&params), mode)
        .await
    {
        Ok(panels) => Json(panels).into_response(),
        Err(e) => e.into_response(),
    }
}
