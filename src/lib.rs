//! Xenstats - A Prometheus exporter for XenServer / XCP-ng pools
//!
//! This library logs in to a pool master over XenAPI, reads host, storage
//! and pool attributes on every scrape and renders them as Prometheus gauges.

pub mod app;
pub mod cli;
pub mod collector;
pub mod config;
pub mod core;
pub mod internal_metrics;
pub mod task_manager;
pub mod xenapi;

// Re-export core types for convenience
pub use crate::core::*;
