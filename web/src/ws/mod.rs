//! Websocket transport for the web layer.
//!
//! This module contains only the Axum handler and the per-connection loop.
//! Registry, fanout and reconciliation live in the `presence` crate.

pub mod handler;
