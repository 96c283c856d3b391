// Templating seam between the assembled dashboard and the printed document
use crate::domain::dashboard::Panel;
use crate::domain::error::Result;
use crate::infrastructure::config::Layout;

/// A selected panel with whatever payloads it ended up with
#[derive(Debug, Clone)]
pub struct ReportPanel {
    pub panel: Panel,
    /// Failures collected while rendering this panel
    pub errors: Vec<String>,
}

impl ReportPanel {
    pub fn new(panel: Panel) -> Self {
        Self {
            panel,
            errors: Vec::new(),
        }
    }

    pub fn failed(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ReportData {
    pub title: String,
    pub uid: String,
    /// Range boundaries already formatted for display
    pub from: String,
    pub to: String,
    pub generated: String,
    pub layout: Layout,
    pub panels: Vec<ReportPanel>,
}

/// Document body plus the print header and footer
#[derive(Debug, Clone, PartialEq)]
pub struct ReportHtml {
    pub header: String,
    pub body: String,
    pub footer: String,
}

pub trait ReportTemplater: Send + Sync {
    fn render(&self, data: &ReportData) -> Result<ReportHtml>;
}
