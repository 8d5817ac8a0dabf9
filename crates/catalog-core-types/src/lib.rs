//! Core types shared across the catalog crates
//!
//! - **Correlation types**: `RequestId`, `TraceId`, `RequestContext`
//! - **Schema constants**: canonical structured-log field keys and event names

pub mod correlation;
pub mod schema;

pub use correlation::{RequestContext, RequestId, TraceId};
