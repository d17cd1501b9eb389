pub mod kv;
pub mod sqlite;

pub use kv::InMemoryKvStore;
pub use sqlite::SqliteEntityStore;
