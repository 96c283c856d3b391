// Panel selection by include/exclude id lists

/// Decides which panels get a given treatment (image or table data).
///
/// Entries are id prefixes: `4` matches panel `4` and its repeated copies
/// (`4-clone-1`, ...) but not panel `42`. Exclusion always wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PanelSelector {
    include: Vec<String>,
    exclude: Vec<String>,
    default_include: bool,
}

impl PanelSelector {
    pub fn new(include: Vec<String>, exclude: Vec<String>, default_include: bool) -> Self {
        Self {
            include: normalize(include),
            exclude: normalize(exclude),
            default_include,
        }
    }

    pub fn selects(&self, panel_id: &str) -> bool {
        if self.exclude.iter().any(|p| matches_prefix(panel_id, p)) {
            return false;
        }
        if self.include.is_empty() {
            return self.default_include;
        }
        self.include.iter().any(|p| matches_prefix(panel_id, p))
    }
}

fn normalize(ids: Vec<String>) -> Vec<String> {
    ids.into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect()
}

fn matches_prefix(panel_id: &str, prefix: &str) -> bool {
    match panel_id.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('-'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let selector = PanelSelector::new(ids(&["1", "4", "6"]), ids(&["2", "4", "3"]), true);
        let panels = ["1", "2", "3", "4", "5", "6", "7"];
        let selected_ids: Vec<&str> = panels.into_iter().filter(|id| selector.selects(id)).collect();
        assert_eq!(selected_ids, vec!["1", "6"]);
    }

    #[test]
    fn test_empty_include_uses_default() {
        let all = PanelSelector::new(vec![], ids(&["3"]), true);
        assert!(all.selects("1"));
        assert!(!all.selects("3"));

        let none = PanelSelector::new(vec![], vec![], false);
        assert!(!none.selects("1"));
    }

    #[test]
    fn test_prefix_matches_clones_only() {
        let selector = PanelSelector::new(ids(&["4"]), vec![], false);
        assert!(selector.selects("4"));
        assert!(selector.selects("4-clone-2"));
        assert!(!selector.selects("42"));
    }

    #[test]
    fn test_blank_entries_ignored() {
        let selector = PanelSelector::new(ids(&["", "  "]), vec![], true);
        assert!(selector.selects("9"));
    }
}
