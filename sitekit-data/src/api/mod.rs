//! Data requests and the operations that resolve them

mod batch;
mod datapoint;
pub mod dispatch;
mod key;
pub mod normalize;
mod request;

pub use batch::*;
pub use key::*;
pub use normalize::DEFAULT_DATE_RANGE;
pub use normalize::PREV_DATE_RANGE_PLACEHOLDER;
pub use request::*;
