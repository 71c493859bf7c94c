use std::fmt::{self, Display};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::QueryError;

/// Lifecycle of a query as this layer observes it.
///
/// Transitions are the engine's business: `Pending -> {Success, Error}`, and
/// either may go back to `Pending` on a refetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStatus {
    /// Nothing resolved yet.
    Pending,
    /// Data resolved.
    Success,
    /// The last fetch failed.
    Error,
}

impl QueryStatus {
    /// True while nothing has resolved.
    pub fn is_pending(&self) -> bool {
        matches!(self, QueryStatus::Pending)
    }

    /// True once data has resolved.
    pub fn is_success(&self) -> bool {
        matches!(self, QueryStatus::Success)
    }

    /// True after a failed fetch.
    pub fn is_error(&self) -> bool {
        matches!(self, QueryStatus::Error)
    }
}

impl Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            QueryStatus::Pending => "pending",
            QueryStatus::Success => "success",
            QueryStatus::Error => "error",
        };
        f.write_str(status)
    }
}

/// What the engine reports for an observed query.
///
/// Owned by the engine. This layer reads `status` and `data` for gating and
/// forwards the whole result to render callbacks untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Current lifecycle state.
    pub status: QueryStatus,
    /// Resolved (possibly `select`-transformed) data, if any.
    pub data: Option<Value>,
    /// The error behind an `Error` status.
    pub error: Option<QueryError>,
    /// True while a fetch is in flight, including background refetches.
    pub is_fetching: bool,
    /// Whether another page exists. Only set by infinite-mode engines.
    pub has_next_page: Option<bool>,
}

impl QueryResult {
    /// A pending result with nothing resolved.
    pub fn pending() -> Self {
        QueryResult {
            status: QueryStatus::Pending,
            data: None,
            error: None,
            is_fetching: true,
            has_next_page: None,
        }
    }

    /// A successful result carrying `data`.
    pub fn success(data: Value) -> Self {
        QueryResult {
            status: QueryStatus::Success,
            data: Some(data),
            error: None,
            is_fetching: false,
            has_next_page: None,
        }
    }

    /// A failed result carrying `error`.
    pub fn error(error: QueryError) -> Self {
        QueryResult {
            status: QueryStatus::Error,
            data: None,
            error: Some(error),
            is_fetching: false,
            has_next_page: None,
        }
    }

    /// Set the in-flight flag.
    pub fn set_is_fetching(self, is_fetching: bool) -> Self {
        QueryResult {
            is_fetching,
            ..self
        }
    }

    /// Set the next-page flag.
    pub fn set_has_next_page(self, has_next_page: Option<bool>) -> Self {
        QueryResult {
            has_next_page,
            ..self
        }
    }

    /// Deserialize the data into a concrete type.
    ///
    /// `None` when there is no data or the shape does not match.
    pub fn data_as<T: DeserializeOwned>(&self) -> Option<T> {
        let data = self.data.clone()?;
        serde_json::from_value(data).ok()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn status_helpers_match_variants() {
        assert!(QueryStatus::Pending.is_pending());
        assert!(QueryStatus::Success.is_success());
        assert!(QueryStatus::Error.is_error());
        assert!(!QueryStatus::Success.is_pending());
    }

    #[test]
    fn status_displays_lowercase() {
        assert_eq!(QueryStatus::Pending.to_string(), "pending");
        assert_eq!(QueryStatus::Success.to_string(), "success");
        assert_eq!(QueryStatus::Error.to_string(), "error");
    }

    #[test]
    fn constructors_fill_the_expected_fields() {
        let pending = QueryResult::pending();
        assert!(pending.status.is_pending());
        assert!(pending.is_fetching, "A pending query is being fetched");
        assert_eq!(pending.data, None);

        let success = QueryResult::success(json!({ "id": 1 }));
        assert!(success.status.is_success());
        assert_eq!(success.data, Some(json!({ "id": 1 })));

        let failed = QueryResult::error(QueryError::new("boom"));
        assert!(failed.status.is_error());
        assert_eq!(failed.error, Some(QueryError::new("boom")));
    }

    #[test]
    fn data_deserializes_into_concrete_types() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Todo {
            id: u32,
            title: String,
        }

        let result = QueryResult::success(json!({ "id": 7, "title": "water the plants" }));
        assert_eq!(
            result.data_as::<Todo>(),
            Some(Todo {
                id: 7,
                title: "water the plants".to_string()
            })
        );
        assert_eq!(
            result.data_as::<Vec<u32>>(),
            None,
            "Mismatched shapes should yield None"
        );
    }
}
