//! Data source implementations.
//!
//! Each source implements [`DataSource`](crate::traits::DataSource):
//! - `sqlite` - relational store read through `sqlx`
//! - `memory` - fixed in-process rows, for tests and embedding

pub mod memory;
pub mod sqlite;

pub use memory::MemorySource;
pub use sqlite::SqliteSource;
