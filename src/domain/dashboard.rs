// Dashboard domain model
use crate::domain::error::{ReportError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Logical width of the dashboard grid
pub const GRID_COLUMNS: f64 = 24.0;

const CLONE_MARKER: &str = "-clone-";

/// Panel identifier. The dashboard API sends integers for ordinary panels and
/// strings for some library/repeated panels, so both are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PanelId(pub String);

impl<'de> Deserialize<'de> for PanelId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Int(i64),
            Float(f64),
            Str(String),
        }

        Ok(match Wire::deserialize(deserializer)? {
            Wire::Int(n) => PanelId(n.to_string()),
            Wire::Float(f) => PanelId(format!("{}", f.trunc() as i64)),
            Wire::Str(s) => PanelId(s),
        })
    }
}

impl fmt::Display for PanelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Template variables in request order; a key may carry several values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables {
    entries: Vec<(String, Vec<String>)>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((key, vec![value])),
        }
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Collect `var-*` pairs out of raw query parameters
    pub fn from_query_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut vars = Self::new();
        for (key, value) in pairs {
            if let Some(name) = key.strip_prefix("var-") {
                vars.insert(name, value);
            }
        }
        vars
    }

    /// Encode as `var-<key>=<value>` pairs joined with `&`
    pub fn to_query(&self) -> String {
        let mut parts = Vec::new();
        for (key, values) in &self.entries {
            for value in values {
                parts.push(format!(
                    "var-{}={}",
                    urlencoding::encode(key),
                    urlencoding::encode(value)
                ));
            }
        }
        parts.join("&")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GridPos {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub w: f64,
    #[serde(default)]
    pub h: f64,
}

impl GridPos {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Panel {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    #[serde(rename = "gridPos")]
    pub grid_pos: GridPos,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat: Option<String>,
    #[serde(skip)]
    encoded_image: Option<String>,
    #[serde(skip)]
    csv_data: Option<String>,
}

impl Panel {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, title: impl Into<String>, grid_pos: GridPos) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            title: title.into(),
            grid_pos,
            repeat: None,
            encoded_image: None,
            csv_data: None,
        }
    }

    pub fn with_repeat(mut self, repeat: Option<String>) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn is_row(&self) -> bool {
        self.kind == "row"
    }

    /// Id with any clone suffix removed, i.e. the id the dashboard JSON uses
    pub fn base_id(&self) -> &str {
        match self.id.find(CLONE_MARKER) {
            Some(idx) => &self.id[..idx],
            None => &self.id,
        }
    }

    pub fn encoded_image(&self) -> Option<&str> {
        self.encoded_image.as_deref()
    }

    pub fn csv_data(&self) -> Option<&str> {
        self.csv_data.as_deref()
    }

    pub fn set_encoded_image(&mut self, data: String) -> Result<()> {
        if self.encoded_image.is_some() {
            return Err(ReportError::PayloadAlreadySet {
                panel_id: self.id.clone(),
            });
        }
        self.encoded_image = Some(data);
        Ok(())
    }

    pub fn set_csv_data(&mut self, data: String) -> Result<()> {
        if self.csv_data.is_some() {
            return Err(ReportError::PayloadAlreadySet {
                panel_id: self.id.clone(),
            });
        }
        self.csv_data = Some(data);
        Ok(())
    }
}

/// Builds the id of the `index`-th copy of a repeated panel
pub fn clone_id(base: &str, index: usize) -> String {
    format!("{}{}{}", base, CLONE_MARKER, index)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dashboard {
    pub title: String,
    pub uid: String,
    pub variables: Variables,
    pub panels: Vec<Panel>,
}

impl Dashboard {
    pub fn new(title: String, uid: String, variables: Variables, panels: Vec<Panel>) -> Self {
        Self {
            title,
            uid,
            variables,
            panels,
        }
    }

    #[cfg(test)]
    pub fn panel(&self, id: &str) -> Option<&Panel> {
        self.panels.iter().find(|p| p.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panel_id_accepts_int_and_string() {
        let ids: Vec<PanelId> = serde_json::from_str(r#"[7, "12", 3.0, "lib-panel"]"#).unwrap();
        let ids: Vec<String> = ids.into_iter().map(|p| p.0).collect();
        assert_eq!(ids, vec!["7", "12", "3", "lib-panel"]);
    }

    #[test]
    fn test_variables_keep_order_and_repeats() {
        let mut vars = Variables::new();
        vars.insert("host", "a");
        vars.insert("env", "prod");
        vars.insert("host", "b c");
        assert_eq!(vars.get("host").unwrap(), ["a", "b c"]);
        assert_eq!(vars.to_query(), "var-host=a&var-host=b%20c&var-env=prod");
    }

    #[test]
    fn test_variables_from_query_pairs_ignore_other_params() {
        let vars = Variables::from_query_pairs(vec![
            ("dashUid", "abc"),
            ("var-job", "node"),
            ("from", "now-1h"),
            ("var-job", "api"),
        ]);
        assert_eq!(vars.get("job").unwrap(), ["node", "api"]);
        assert!(vars.get("dashUid").is_none());
    }

    #[test]
    fn test_clone_ids() {
        let panel = Panel::new(clone_id("4", 2), "graph", "CPU", GridPos::default());
        assert_eq!(panel.id, "4-clone-2");
        assert_eq!(panel.base_id(), "4");
        let plain = Panel::new("4", "graph", "CPU", GridPos::default());
        assert_eq!(plain.base_id(), "4");
    }

    #[test]
    fn test_payloads_are_write_once() {
        let mut panel = Panel::new("1", "graph", "CPU", GridPos::default());
        panel.set_encoded_image("aGVsbG8=".to_string()).unwrap();
        let err = panel.set_encoded_image("b3RoZXI=".to_string()).unwrap_err();
        assert!(matches!(err, ReportError::PayloadAlreadySet { .. }));
        assert_eq!(panel.encoded_image(), Some("aGVsbG8="));

        panel.set_csv_data("a,b\n1,2".to_string()).unwrap();
        assert!(panel.set_csv_data("x".to_string()).is_err());
    }
}
