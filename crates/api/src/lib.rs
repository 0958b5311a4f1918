//! HTTP gateway: admission lanes, relaying, and process configuration.

pub mod app;
pub mod config;
pub mod context;
pub mod credentials;
pub mod forward;
pub mod middleware;
