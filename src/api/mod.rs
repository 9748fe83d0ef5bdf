//! HTTP API Module
//!
//! Operator-facing REST API: node status, queue introspection, and manual
//! sync triggering.

mod http;

pub use http::{AppState, HttpServer};
