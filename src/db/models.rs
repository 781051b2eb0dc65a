//! Database model types.

use serde::{Deserialize, Serialize};

/// A monitored service configuration plus its last-known check state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: i64,
    pub name: String,
    /// Target URL; the scheme selects the checker (`http://`, `https://`, `tcp-tls://`).
    pub url: String,
    /// Recurrence period in minutes, at least 1.
    pub interval: i64,
    /// Request headers serialized as `"k1:v1,k2:v2"`.
    pub headers: String,
    /// HTTP verb; empty means GET.
    pub method: String,
    /// Request payload, sent only for POST/PUT/PATCH/DELETE when non-empty.
    pub body: String,
    /// Optional content requirement against the response body.
    pub response_pattern: String,
    /// Interpret `response_pattern` as a regex rather than a literal substring.
    pub use_regex_pattern: bool,
    /// Hex SHA-1 fingerprint of a pinned server certificate; empty disables pinning.
    pub sha1_certificate: String,
    /// `"ok"` or a failure description from the most recent check.
    pub status: String,
    /// Epoch millis of the most recent check attempt, 0 = never.
    pub last_checked: i64,
    /// Epoch millis of the most recent `"ok"` result, 0 = never.
    pub last_successful_check: i64,
    /// Archived services are excluded from scheduling.
    pub archived: bool,
    /// Manual sort order, unique among active services.
    pub position: i64,
    /// Free-text grouping label, empty = ungrouped.
    pub group_name: String,
}

impl Default for Service {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            url: String::new(),
            interval: 15,
            headers: String::new(),
            method: String::new(),
            body: String::new(),
            response_pattern: String::new(),
            use_regex_pattern: false,
            sha1_certificate: String::new(),
            status: String::new(),
            last_checked: 0,
            last_successful_check: 0,
            archived: false,
            position: 0,
            group_name: String::new(),
        }
    }
}

/// One completed check attempt. Keyed by service *name*, not id, so the log
/// survives service deletion and rename.
#[derive(Debug, Clone)]
pub struct CheckHistoryRecord {
    pub id: i64,
    pub service_name: String,
    /// Epoch millis at which the check completed.
    pub timestamp: i64,
    pub status: String,
}
