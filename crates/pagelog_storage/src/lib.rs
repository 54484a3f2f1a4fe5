//! # pagelog storage
//!
//! Page backends for the pagelog page store.
//!
//! A backend is an **opaque array of fixed-size pages**. It does not know
//! what a page contains: kind tags, checksums, free-list bitmaps and log
//! streams are all interpreted by `pagelog_core`.
//!
//! ## Design Principles
//!
//! - Backends read and write whole pages addressed by a `u32` page id
//! - Writing past the end grows the backend; the gap reads as zero pages
//! - `flush` is the durability barrier; nothing is promised before it
//! - Must be `Send + Sync`
//!
//! ## Available Backends
//!
//! - [`InMemoryPageBackend`] - For testing and ephemeral stores
//! - [`FilePageBackend`] - Persistent pages in one locked file
//!
//! ## Example
//!
//! ```rust
//! use pagelog_storage::{PageBackend, InMemoryPageBackend};
//!
//! let mut backend = InMemoryPageBackend::new(128);
//! backend.write_page(3, &[7u8; 128]).unwrap();
//! assert_eq!(backend.page_count().unwrap(), 4);
//! assert_eq!(backend.read_page(3).unwrap()[0], 7);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::PageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FilePageBackend;
pub use memory::InMemoryPageBackend;
