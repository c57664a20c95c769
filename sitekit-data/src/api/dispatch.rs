//! Resolver dispatch

use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;

use serde_json::Value;

use super::request::DataRequest;

/// Hands `result` to the request's callback.
///
/// Returns `true` if a callback ran to completion. A panicking callback is
/// logged and swallowed so the rest of the batch keeps resolving.
pub fn resolve(mut request: DataRequest, result: &Value) -> bool {
    let Some(callback) = request.take_callback() else {
        return false;
    };

    let datapoint = request.datapoint.as_str();
    match catch_unwind(AssertUnwindSafe(|| callback(result, datapoint))) {
        Ok(()) => true,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!(
                "Callback for {}/{}/{} panicked: {}",
                request.request_type,
                request.identifier,
                request.datapoint,
                message
            );
            false
        }
    }
}
