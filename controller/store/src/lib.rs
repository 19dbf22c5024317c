#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

#[cfg(any(test, feature = "test-util"))]
pub mod fixtures;
mod schema;
mod sqlite;

pub use self::sqlite::SqliteStore;
