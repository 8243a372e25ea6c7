//! Integration test utilities for the relay gateway
//!
//! This crate provides helpers for running end-to-end tests against
//! in-process workers over real WebSocket connections.

pub mod helpers;

pub use helpers::*;
