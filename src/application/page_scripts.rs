// In-page scripts. Their internals are opaque; only their inputs and the
// shape of what they return matter to the pipeline.
use std::time::Duration;

const SCRAPE_PANELS: &str = include_str!("../../assets/scrape_panels.js");
const WAIT_QUERIES: &str = include_str!("../../assets/wait_queries.js");
const CSV_STEPS: &str = include_str!("../../assets/csv_steps.js");

/// Row expansion for every known layout; each is a no-op on the others
pub const EXPAND_ROW_SCRIPTS: [&str; 2] = [
    include_str!("../../assets/expand_rows_legacy.js"),
    include_str!("../../assets/expand_rows_scenes.js"),
];

pub const CSV_CAPTURE_SCRIPT: &str = include_str!("../../assets/csv_capture.js");

/// Resolves with the captured CSV text
pub const CSV_READ_SCRIPT: &str = "window.__reporterCsv";

/// Set on the inspector's download button by the download step
pub const CSV_DOWNLOAD_BUTTON: &str = "[data-reporter-download]";

const SCENES_PANEL_SELECTOR: &str = "[data-viz-panel-key]";
const LEGACY_PANEL_SELECTOR: &str = "[data-panelid]";

/// Panel container selector for the given server version. Unknown versions
/// get the current layout.
pub fn panel_selector(version: &str) -> &'static str {
    let major = version
        .trim_start_matches('v')
        .split('.')
        .next()
        .and_then(|m| m.parse::<u32>().ok());
    match major {
        Some(m) if m < 11 => LEGACY_PANEL_SELECTOR,
        _ => SCENES_PANEL_SELECTOR,
    }
}

pub fn panel_count_script(selector: &str) -> String {
    format!("document.querySelectorAll('{}').length", selector)
}

pub fn scrape_script(selector: &str) -> String {
    SCRAPE_PANELS.replace("__SELECTOR__", selector)
}

pub fn wait_queries_script(timeout: Duration) -> String {
    WAIT_QUERIES.replace("__TIMEOUT_MS__", &timeout.as_millis().to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvStep {
    ExpandOptions,
    ApplyTransformations,
    Download,
}

impl CsvStep {
    pub fn name(self) -> &'static str {
        match self {
            CsvStep::ExpandOptions => "options",
            CsvStep::ApplyTransformations => "transform",
            CsvStep::Download => "download",
        }
    }
}

pub fn csv_step_script(step: CsvStep) -> String {
    CSV_STEPS.replace("__STEP__", step.name())
}
