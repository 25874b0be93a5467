//! Ripple Server - Social feed backend with realtime fan-out.
//!
//! This crate provides the Ripple backend, responsible for:
//! - Registering and authenticating users (access/refresh token lifecycle)
//! - Applying feed mutations (posts, likes) with idempotent semantics
//! - Broadcasting mutation events to all connected WebSocket clients
//!
//! # Architecture
//!
//! Every entry point (HTTP request or WebSocket handshake) passes the auth
//! gate, mutations go through the feed mutator against the storage
//! capability, and each successful mutation is fanned out by the broadcast
//! hub to all live connections.

pub mod auth;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod feed;
pub mod routes;
pub mod store;
pub mod token;
pub mod types;
