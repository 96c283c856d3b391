// URL space of the dashboard service: view, solo, render and inspect pages
use crate::domain::dashboard::Variables;
use crate::domain::time_range::ResolvedTimeRange;

/// Everything that scopes a dashboard page besides the panel itself
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardQuery {
    pub uid: String,
    pub variables: Variables,
    /// Unix milliseconds
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub time_zone: Option<String>,
    pub theme: Option<String>,
}

impl DashboardQuery {
    pub fn new(uid: impl Into<String>, variables: Variables) -> Self {
        Self {
            uid: uid.into(),
            variables,
            ..Default::default()
        }
    }

    pub fn with_time_range(mut self, range: &ResolvedTimeRange) -> Self {
        self.from = Some(range.from_millis());
        self.to = Some(range.to_millis());
        self
    }

    pub fn with_time_zone(mut self, zone: impl Into<String>) -> Self {
        self.time_zone = Some(zone.into());
        self
    }

    pub fn with_theme(mut self, theme: impl Into<String>) -> Self {
        self.theme = Some(theme.into());
        self
    }

    fn common_params(&self) -> Vec<String> {
        let mut params = Vec::new();
        if let Some(from) = self.from {
            params.push(format!("from={}", from));
        }
        if let Some(to) = self.to {
            params.push(format!("to={}", to));
        }
        if let Some(zone) = &self.time_zone {
            params.push(format!("timezone={}", urlencoding::encode(zone)));
        }
        if let Some(theme) = &self.theme {
            params.push(format!("theme={}", theme));
        }
        if !self.variables.is_empty() {
            params.push(self.variables.to_query());
        }
        params
    }

    fn uid(&self) -> std::borrow::Cow<'_, str> {
        urlencoding::encode(&self.uid)
    }

    /// Full dashboard view in kiosk mode
    pub fn view_url(&self, base: &str) -> String {
        let mut params = self.common_params();
        params.push("kiosk".to_string());
        format!("{}/d/{}/_?{}", base, self.uid(), params.join("&"))
    }

    /// Single panel page, used for native screenshots
    pub fn solo_url(&self, base: &str, panel_id: &str, width: u32, height: u32) -> String {
        let mut params = vec![
            format!("panelId={}", urlencoding::encode(panel_id)),
            format!("width={}", width),
            format!("height={}", height),
        ];
        params.extend(self.common_params());
        format!("{}/d-solo/{}/_?{}", base, self.uid(), params.join("&"))
    }

    /// Image renderer endpoint for one panel
    pub fn render_url(&self, base: &str, panel_id: &str, width: u32, height: u32) -> String {
        let mut params = vec![
            format!("panelId={}", urlencoding::encode(panel_id)),
            format!("width={}", width),
            format!("height={}", height),
        ];
        params.extend(self.common_params());
        format!("{}/render/d-solo/{}/_?{}", base, self.uid(), params.join("&"))
    }

    /// Panel inspector opened on the data tab
    pub fn inspect_url(&self, base: &str, panel_id: &str) -> String {
        let id = urlencoding::encode(panel_id);
        let mut params = vec![
            format!("viewPanel={}", id),
            format!("inspect={}", id),
            "inspectTab=data".to_string(),
        ];
        params.extend(self.common_params());
        format!("{}/d/{}/_?{}", base, self.uid(), params.join("&"))
    }
}
