//! Worker autoscaler service
//!
//! HTTP surface, configuration and backend wiring around `autoscaler-lib`.

pub mod api;
pub mod backend;
pub mod config;
