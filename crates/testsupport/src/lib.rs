//! Test support utilities for the multimap workspace.
//!
//! This crate provides:
//! - Isolated test contexts that own a temporary data directory and a
//!   matching [`common::Config`]
//! - Bookstore fixtures
//! - Property-based generators for operation scripts
//! - An in-memory reference multimap to check scripts against
//!
//! # Example Usage
//!
//! ```
//! use testsupport::prelude::*;
//!
//! let ctx = TestContext::new(4).unwrap();
//! assert_eq!(ctx.config().degree, 4);
//! assert!(ctx.data_dir().exists());
//! ```

pub mod context;
pub mod fixtures;
pub mod model;
pub mod proptest_generators;

/// Convenient re-exports for common testing patterns.
pub mod prelude {
    pub use crate::context::*;
    pub use crate::fixtures::*;
    pub use crate::model::*;
}
