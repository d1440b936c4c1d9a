//! Local file store behind the plain HTTP upload/download endpoints.

pub mod handlers;
mod store;

pub use store::{FileStoreError, LocalFileStore, StoredFile};
