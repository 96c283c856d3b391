// Default HTML templater for printed reports
use crate::application::templater::{ReportData, ReportHtml, ReportPanel, ReportTemplater};
use crate::domain::error::{ReportError, Result};
use crate::infrastructure::config::Layout;
use std::fmt::Write;

const DEFAULT_HEADER: &str = r#"<div style="font-size:9px;width:100%;padding:0 1cm;display:flex;justify-content:space-between;"><span>{{title}}</span><span>{{from}} to {{to}}</span></div>"#;

const DEFAULT_FOOTER: &str = r#"<div style="font-size:9px;width:100%;padding:0 1cm;display:flex;justify-content:space-between;"><span>Generated {{generated}}</span><span><span class="pageNumber"></span> / <span class="totalPages"></span></span></div>"#;

const STYLE: &str = r#"
body { font-family: sans-serif; margin: 0; color: #222; }
h1 { font-size: 20px; margin: 0 0 4px 0; }
.range { font-size: 12px; color: #555; margin: 0 0 12px 0; }
.grid { display: grid; grid-template-columns: repeat(24, 1fr); grid-auto-rows: calc(100vw / 24 * 0.45); gap: 4px; }
.simple .panel { margin-bottom: 16px; page-break-inside: avoid; }
.panel { overflow: hidden; }
.panel h2 { font-size: 13px; margin: 0 0 4px 0; }
.panel img { width: 100%; display: block; }
.grid .panel img { height: calc(100% - 20px); object-fit: contain; }
table { border-collapse: collapse; font-size: 10px; width: 100%; margin-top: 4px; }
th, td { border: 1px solid #ccc; padding: 2px 4px; text-align: left; }
th { background: #f2f2f2; }
.panel-error { border: 1px dashed #c33; color: #c33; font-size: 11px; padding: 8px; }
"#;

/// Renders the report as one HTML document, placing panels on the 24 column
/// dashboard grid or stacking them one per block.
#[derive(Debug, Clone)]
pub struct HtmlTemplater {
    header_template: String,
    footer_template: String,
}

impl Default for HtmlTemplater {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl HtmlTemplater {
    pub fn new(header_template: Option<String>, footer_template: Option<String>) -> Self {
        Self {
            header_template: header_template.unwrap_or_else(|| DEFAULT_HEADER.to_string()),
            footer_template: footer_template.unwrap_or_else(|| DEFAULT_FOOTER.to_string()),
        }
    }

    fn render_body(&self, data: &ReportData) -> String {
        let class = match data.layout {
            Layout::Grid => "grid",
            Layout::Simple => "simple",
        };

        let mut html = String::new();
        let _ = write!(
            html,
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{}</title><style>{}</style></head><body>",
            escape_html(&data.title),
            STYLE
        );
        let _ = write!(
            html,
            "<h1>{}</h1><p class=\"range\">{} to {}</p><div class=\"{}\">",
            escape_html(&data.title),
            escape_html(&data.from),
            escape_html(&data.to),
            class
        );
        for panel in &data.panels {
            render_panel(&mut html, panel, data.layout);
        }
        html.push_str("</div></body></html>");
        html
    }
}

impl ReportTemplater for HtmlTemplater {
    fn render(&self, data: &ReportData) -> Result<ReportHtml> {
        let vars = [
            ("title", data.title.as_str()),
            ("uid", data.uid.as_str()),
            ("from", data.from.as_str()),
            ("to", data.to.as_str()),
            ("generated", data.generated.as_str()),
        ];
        Ok(ReportHtml {
            header: prepare_template(&self.header_template, &vars)?,
            body: self.render_body(data),
            footer: prepare_template(&self.footer_template, &vars)?,
        })
    }
}

fn render_panel(html: &mut String, item: &ReportPanel, layout: Layout) {
    let panel = &item.panel;
    let title = escape_html(&panel.title);

    match layout {
        Layout::Grid => {
            let pos = &panel.grid_pos;
            let _ = write!(
                html,
                "<section class=\"panel\" data-panel-id=\"{}\" style=\"grid-column: {} / span {}; grid-row: {} / span {};\">",
                escape_html(&panel.id),
                pos.x as u32 + 1,
                (pos.w as u32).max(1),
                pos.y as u32 + 1,
                (pos.h as u32).max(1)
            );
        }
        Layout::Simple => {
            let _ = write!(
                html,
                "<section class=\"panel\" data-panel-id=\"{}\">",
                escape_html(&panel.id)
            );
        }
    }

    if !panel.title.is_empty() {
        let _ = write!(html, "<h2>{}</h2>", title);
    }

    if item.failed() {
        html.push_str("<div class=\"panel-error\"><p>Panel could not be rendered</p><ul>");
        for err in &item.errors {
            let _ = write!(html, "<li>{}</li>", escape_html(err));
        }
        html.push_str("</ul></div>");
    }
    if let Some(image) = panel.encoded_image() {
        let _ = write!(
            html,
            "<img src=\"data:image/png;base64,{}\" alt=\"{}\">",
            image, title
        );
    }
    if let Some(csv) = panel.csv_data() {
        render_table(html, csv);
    }

    html.push_str("</section>");
}

/// First CSV record becomes the header row
fn render_table(html: &mut String, csv: &str) {
    let mut records = split_csv(csv).into_iter();
    let Some(header) = records.next() else {
        return;
    };

    html.push_str("<table><thead><tr>");
    for cell in &header {
        let _ = write!(html, "<th>{}</th>", escape_html(cell));
    }
    html.push_str("</tr></thead><tbody>");
    for record in records {
        html.push_str("<tr>");
        for cell in &record {
            let _ = write!(html, "<td>{}</td>", escape_html(cell));
        }
        html.push_str("</tr>");
    }
    html.push_str("</tbody></table>");
}

/// Splits CSV text into records, honouring double-quoted fields, `""`
/// escapes and line breaks inside quotes. Blank lines are skipped.
fn split_csv(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, quoted) {
            ('"', true) if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            ('"', _) => quoted = !quoted,
            (',', false) => record.push(std::mem::take(&mut field)),
            ('\r', false) if chars.peek() == Some(&'\n') => {}
            ('\n', false) => end_record(&mut records, &mut record, &mut field),
            _ => field.push(c),
        }
    }
    end_record(&mut records, &mut record, &mut field);
    records
}

fn end_record(records: &mut Vec<Vec<String>>, record: &mut Vec<String>, field: &mut String) {
    if record.is_empty() && field.trim().is_empty() {
        field.clear();
        return;
    }
    record.push(std::mem::take(field));
    records.push(std::mem::take(record));
}

/// Substitutes `{{name}}` placeholders with HTML-escaped values. Unknown
/// placeholders are an error.
pub fn prepare_template(template: &str, vars: &[(&str, &str)]) -> Result<String> {
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(ReportError::Template(format!(
                "unterminated placeholder in template: {}",
                &rest[start..]
            )));
        };
        let name = &after[..end];
        if !vars.iter().any(|(key, _)| *key == name) {
            return Err(ReportError::Template(format!("unknown placeholder {{{{{}}}}}", name)));
        }
        rest = &after[end + 2..];
    }

    let mut result = template.to_string();
    for (key, value) in vars {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, &escape_html(value));
    }
    Ok(result)
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dashboard::{GridPos, Panel};

    fn data(layout: Layout, panels: Vec<ReportPanel>) -> ReportData {
        ReportData {
            title: "Node <prod>".to_string(),
            uid: "node".to_string(),
            from: "Mon Jan 1 00:00:00 +00:00 2024".to_string(),
            to: "Mon Jan 1 06:00:00 +00:00 2024".to_string(),
            generated: "Mon Jan 1 06:00:05 +00:00 2024".to_string(),
            layout,
            panels,
        }
    }

    fn image_panel(id: &str, pos: GridPos) -> ReportPanel {
        let mut panel = Panel::new(id, "timeseries", format!("Panel {}", id), pos);
        panel.set_encoded_image("iVBORw0KGgo=".to_string()).unwrap();
        ReportPanel::new(panel)
    }

    #[test]
    fn test_prepare_template() {
        let result = prepare_template("<span>{{title}}</span> {{to}}", &[("title", "A & B"), ("to", "y")]).unwrap();
        assert_eq!(result, "<span>A &amp; B</span> y");

        let err = prepare_template("{{missing}}", &[("title", "t")]).unwrap_err();
        assert!(matches!(err, ReportError::Template(_)));
    }

    #[test]
    fn test_grid_body_places_panels() {
        let html = HtmlTemplater::default()
            .render(&data(
                Layout::Grid,
                vec![
                    image_panel("1", GridPos::new(0.0, 0.0, 12.0, 8.0)),
                    image_panel("2", GridPos::new(12.0, 0.0, 12.0, 8.0)),
                ],
            ))
            .unwrap();

        assert_eq!(html.body.matches("data:image/png;base64,").count(), 2);
        assert!(html.body.contains("grid-column: 13 / span 12; grid-row: 1 / span 8;"));
        assert!(html.body.contains("<h1>Node &lt;prod&gt;</h1>"));
        assert!(html.header.contains("Node &lt;prod&gt;"));
        assert!(html.footer.contains("class=\"pageNumber\""));
    }

    #[test]
    fn test_csv_and_error_panels() {
        let mut table = Panel::new("3", "table", "Hosts", GridPos::default());
        table
            .set_csv_data("\"host\",\"load\"\n\"web-1\",\"0.5\"\n\"a \"\"quoted\"\", name\",1\n".to_string())
            .unwrap();
        let mut broken = ReportPanel::new(Panel::new("4", "graph", "Broken", GridPos::default()));
        broken.errors.push("render failed: <503>".to_string());

        let html = HtmlTemplater::default()
            .render(&data(Layout::Simple, vec![ReportPanel::new(table), broken]))
            .unwrap();

        assert!(html.body.contains("<th>host</th><th>load</th>"));
        assert!(html.body.contains("<td>web-1</td><td>0.5</td>"));
        assert!(html.body.contains("<td>a &quot;quoted&quot;, name</td>"));
        assert!(html.body.contains("panel-error"));
        assert!(html.body.contains("render failed: &lt;503&gt;"));
        assert!(!html.body.contains("data:image/png;base64,"));
    }

    #[test]
    fn test_quoted_line_breaks_stay_in_one_cell() {
        let records = split_csv("name,note\r\nweb-1,\"first line\nsecond, line\"\r\n\r\nweb-2,ok");
        assert_eq!(records.len(), 3);
        assert_eq!(records[1], vec!["web-1", "first line\nsecond, line"]);
        assert_eq!(records[2], vec!["web-2", "ok"]);
    }

    #[test]
    fn test_custom_header_template() {
        let templater = HtmlTemplater::new(Some("<div>{{uid}} {{generated}}</div>".to_string()), None);
        let html = templater.render(&data(Layout::Simple, Vec::new())).unwrap();
        assert_eq!(html.header, "<div>node Mon Jan 1 06:00:05 +00:00 2024</div>");

        let templater = HtmlTemplater::new(Some("<div>{{page}}</div>".to_string()), None);
        assert!(templater.render(&data(Layout::Simple, Vec::new())).is_err());
    }
}
