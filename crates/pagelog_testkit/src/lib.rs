//! # pagelog testkit
//!
//! Test utilities for the pagelog page store.
//!
//! This crate provides:
//! - A page backend that loses unflushed writes on a simulated crash and
//!   can fail writes on demand
//! - A harness driving a store and its transaction log through crashes
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pagelog_testkit::prelude::*;
//!
//! #[test]
//! fn survives_crash() {
//!     let mut h = TestHarness::new(256);
//!     let page = h.allocate_user_page();
//!     h.write_user_page(page, 0xAA);
//!     h.crash();
//!     assert!(h.user_page_is_blank(page));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
