//! Database schema and connection setup

pub mod init;

pub use init::{create_schema, init_database, init_memory_database, SCHEMA_VERSION};
