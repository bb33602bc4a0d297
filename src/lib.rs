// HTTP API (axum routers)
pub mod api;

// Caller identity: bearer extraction and verification
pub mod auth;

// Configuration loading
pub mod config;

// Token encryption and user/credential persistence
pub mod credentials;

// OAuth providers, pending sessions and the link flow
pub mod oauth;
