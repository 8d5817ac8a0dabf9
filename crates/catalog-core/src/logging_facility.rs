//! Structured logging facility
//!
//! - One initialization point, [`init`], selected by [`Profile`]
//! - Boundary macros (`log_op_start!`, `log_op_end!`, `log_op_error!`) that
//!   stamp every event with the canonical keys from
//!   `catalog_core_types::schema`
//! - An in-memory capture layer for asserting on emitted events in tests
//!
//! ```rust
//! use catalog_core::logging_facility::{init, Profile};
//!
//! init(Profile::Development);
//! ```

pub mod init;
pub mod macros;
pub mod test_capture;

pub use init::{init, Profile};
pub use test_capture::{init_test_capture, CapturedEvent, TestCapture};
