//! HTTP middleware components.
//!
//! Middleware run before route handlers and can short-circuit requests.

/// Basic auth for the admin routes
pub mod auth;
