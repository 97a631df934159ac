pub mod blob_store;
pub mod db;
pub mod error;
pub mod repositories;

pub use blob_store::{BlobStore, MemoryBlobStore};
pub use db::Database;
pub use error::StorageError;
