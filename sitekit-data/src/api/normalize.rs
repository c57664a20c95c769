//! Request normalization
//!
//! Every request is stamped with the dashboard's selected date range before
//! its cache key is computed, so two widgets asking for the same report
//! under the same range share one key.

use serde_json::Value;

use super::request::DataRequest;

/// Date range selected when the dashboard loads.
pub const DEFAULT_DATE_RANGE: &str = "last-28-days";

/// Placeholder asking for the range preceding the current one.
pub const PREV_DATE_RANGE_PLACEHOLDER: &str = "prev-date-range-placeholder";

const DATE_RANGE: &str = "dateRange";

/// Returns the slug of the range preceding `slug`.
///
/// `last-28-days` becomes `prev-28-days`. Slugs without the `last` prefix are
/// returned unchanged.
pub fn previous_date_range(slug: &str) -> String {
    match slug.strip_prefix("last") {
        Some(rest) => format!("prev{}", rest),
        None => slug.to_string(),
    }
}

/// Fills in the request's `dateRange` from the current selection.
///
/// - The previous-range placeholder is replaced by the previous range of
///   `current_date_range`, and nothing else is filled in.
/// - A missing `dateRange` is set to `current_date_range`.
/// - A caller-supplied `dateRange` is kept.
pub fn normalize(mut request: DataRequest, current_date_range: &str) -> DataRequest {
    if request.date_range() == Some(PREV_DATE_RANGE_PLACEHOLDER) {
        request.data.insert(
            DATE_RANGE.to_string(),
            Value::String(previous_date_range(current_date_range)),
        );
        return request;
    }

    if !request.data.contains_key(DATE_RANGE) {
        request.data.insert(
            DATE_RANGE.to_string(),
            Value::String(current_date_range.to_string()),
        );
    }

    request
}
