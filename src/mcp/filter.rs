// Recursive tool-catalogue filter algebra, used to project
// `MCPCoordinator::available_tools()` before handing a tool list to an
// agent layer. Purely structural and side-effect-free: evaluating a
// filter never touches a connection.

use super::types::ToolEntry;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolFilter {
    All,
    None,
    Servers(HashSet<String>),
    Tools(HashSet<String>),
    /// Matches against `ToolEntry::qualified_id` (`"<serverID>.<name>"`).
    ToolIds(HashSet<String>),
    /// Regex source, matched against the bare tool name. Compiled on
    /// every evaluation rather than cached, so the variant stays plain
    /// data and round-trips through serde untouched.
    Pattern(String),
    And(Vec<ToolFilter>),
    Or(Vec<ToolFilter>),
    Not(Box<ToolFilter>),
}

impl ToolFilter {
    pub fn matches(&self, entry: &ToolEntry) -> bool {
        match self {
            ToolFilter::All => true,
            ToolFilter::None => false,
            ToolFilter::Servers(ids) => ids.contains(&entry.server_id),
            ToolFilter::Tools(names) => names.contains(&entry.name),
            ToolFilter::ToolIds(ids) => ids.contains(&entry.qualified_id()),
            ToolFilter::Pattern(source) => regex::Regex::new(source)
                .map(|re| re.is_match(&entry.name))
                .unwrap_or(false),
            ToolFilter::And(filters) => filters.iter().all(|f| f.matches(entry)),
            ToolFilter::Or(filters) => filters.iter().any(|f| f.matches(entry)),
            ToolFilter::Not(inner) => !inner.matches(entry),
        }
    }

    pub fn apply(&self, catalogue: &[ToolEntry]) -> Vec<ToolEntry> {
        catalogue
            .iter()
            .filter(|entry| self.matches(entry))
            .cloned()
            .collect()
    }
}

/// Common filter presets, matching the shape an agent layer usually
/// wants without hand-building a `ToolFilter`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolMode {
    FullAccess,
    ReadOnly,
    None,
    Custom(ToolFilter),
}

impl ToolMode {
    pub fn into_filter(self) -> ToolFilter {
        match self {
            ToolMode::FullAccess => ToolFilter::All,
            ToolMode::ReadOnly => ToolFilter::Pattern("^(read|get|list)_".to_string()),
            ToolMode::None => ToolFilter::None,
            ToolMode::Custom(filter) => filter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(server_id: &str, name: &str) -> ToolEntry {
        ToolEntry {
            server_id: server_id.to_string(),
            name: name.to_string(),
            description: None,
            definition: crate::json::JsonValue::Null,
        }
    }

    #[test]
    fn all_and_none_are_opposite_constants() {
        let e = entry("s1", "search");
        assert!(ToolFilter::All.matches(&e));
        assert!(!ToolFilter::None.matches(&e));
    }

    #[test]
    fn pattern_filter_matches_read_only_prefixes() {
        let filter = ToolMode::ReadOnly.into_filter();
        assert!(filter.matches(&entry("s1", "read_file")));
        assert!(filter.matches(&entry("s1", "list_dir")));
        assert!(!filter.matches(&entry("s1", "write_file")));
    }

    #[test]
    fn qualified_tool_id_filter() {
        let mut ids = HashSet::new();
        ids.insert("s1.search".to_string());
        let filter = ToolFilter::ToolIds(ids);
        assert!(filter.matches(&entry("s1", "search")));
        assert!(!filter.matches(&entry("s2", "search")));
    }

    #[test]
    fn and_or_not_compose() {
        let mut servers = HashSet::new();
        servers.insert("s1".to_string());
        let filter = ToolFilter::And(vec![
            ToolFilter::Servers(servers),
            ToolFilter::Not(Box::new(ToolFilter::Tools({
                let mut s = HashSet::new();
                s.insert("dangerous".to_string());
                s
            }))),
        ]);
        assert!(filter.matches(&entry("s1", "search")));
        assert!(!filter.matches(&entry("s1", "dangerous")));
        assert!(!filter.matches(&entry("s2", "search")));
    }

    #[test]
    fn codable_round_trip_is_identity() {
        let filter = ToolFilter::Or(vec![
            ToolFilter::Pattern("^get_".to_string()),
            ToolFilter::ToolIds(["s1.search".to_string()].into_iter().collect()),
        ]);
        let json = serde_json::to_string(&filter).unwrap();
        let back: ToolFilter = serde_json::from_str(&json).unwrap();
        let e = entry("s1", "search");
        assert_eq!(filter.matches(&e), back.matches(&e));
    }
}
