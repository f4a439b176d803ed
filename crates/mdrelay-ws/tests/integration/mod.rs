//! Integration test support for mdrelay-ws.
//!
//! Shared fixtures for exercising the WebSocket feed against a local server.

pub mod common;
