//! Search service and post-filters

pub mod filters;
pub mod service;

use uuid::Uuid;

/// Ties together the log lines of one search request.
///
/// Freshly minted per query; renders as the first eight hex digits so
/// log lines stay scannable while collisions stay implausible within
/// one trace window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryId(Uuid);

impl QueryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The full underlying identifier
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let full = self.0.simple().to_string();
        write!(f, "{}", full.get(..8).unwrap_or(&full))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_ids_are_unique() {
        assert_ne!(QueryId::new(), QueryId::new());
    }

    #[test]
    fn test_display_is_short_hex() {
        let id = QueryId::new();
        let shown = id.to_string();
        assert_eq!(shown.len(), 8);
        assert!(shown.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(id.as_uuid().simple().to_string().starts_with(&shown));
    }
}
