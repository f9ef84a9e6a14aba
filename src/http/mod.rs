//! HTTP server module
//!
//! This module handles HTTP request routing and handling:
//! - Axum router with the upload/download endpoints
//! - Multipart upload validation
//! - Mapping of pipeline errors to HTTP status codes
//! - CORS middleware

pub mod handlers;
pub mod routes;

pub use routes::create_router;
