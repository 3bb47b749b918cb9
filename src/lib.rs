//! Map-based property discovery: viewport queries, status resolution,
//! proximity and conversation inbox behind an HTTP API.

pub mod api;
pub mod config;
pub mod conversations;
pub mod error;
pub mod models;
pub mod proximity;
pub mod spatial;
pub mod status;
pub mod store;
pub mod viewport;

pub use error::{AppError, Result};
