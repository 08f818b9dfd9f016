//! API request/response types shared by the server and its clients

pub mod types;

pub use types::*;
