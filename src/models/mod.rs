//! Data models for keys, links and deliveries.
//!
//! This module contains the structures stored by the key store and exchanged with clients.

/// API key model, status and source enums
pub mod api_key;
/// Link submissions, queued entries and delivery tasks
pub mod link;
