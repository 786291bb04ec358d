//! FeedPulse - feed synchronization scheduler.
//!
//! Keeps a collection of content feeds fresh for many subscribers without
//! overloading origin servers: a durable job queue with lease-based crash
//! recovery, an adaptive polling-interval calculator, a WebSub push
//! subscription manager, and redirect migration that preserves per-user read
//! history across feed identity changes.

pub mod backoff;
pub mod config;
pub mod db;
pub mod error;
pub mod feeds;
pub mod jobs;
pub mod logging;
pub mod web;
pub mod websub;

pub use config::Config;
pub use db::Database;
pub use error::{FeedPulseError, Result};
