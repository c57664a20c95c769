//! Site Kit data client library
//!
//! An async client for the data endpoints of the Site Kit WordPress plugin.
//! Dashboard widgets describe the datapoints they need as [`api::DataRequest`]s;
//! the client answers them from a local cache where it can, and otherwise
//! batches, deduplicates and prioritizes them into as few REST calls as
//! possible. Per-datapoint service errors are classified into the
//! notifications the dashboard shows.

pub mod api;
pub mod cache;
pub mod error;
pub mod notify;
pub mod response;
pub mod transport;

mod client;

pub use client::*;
pub use response::CacheStamp;
pub use response::CacheStatus;
pub use response::Response;
