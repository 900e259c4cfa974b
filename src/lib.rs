//! Link relay: API key registration and link dispatch.
//!
//! Clients (bookmarklet, browser extensions, mobile apps) register an API key for an email
//! address and then submit links, either for immediate delivery or queued for a later flush.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum
//! - **Storage**: `KeyStore` trait, PostgreSQL via sqlx or in memory
//! - **Delivery**: bounded tokio channel drained by a worker pool
//! - **Format**: JSON requests/responses

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod router;
pub mod services;
pub mod state;
